//! Manual overrides and withdrawals driven from the admin console.
//!
//! Every balance change here goes through the same conditional store
//! operations as the reconciler, so an admin acting at the same moment as a
//! provider callback cannot double-credit or double-debit.

use crate::domain::account::{Amount, OwnerId, SavingsAccount};
use crate::domain::phone::PhoneNumber;
use crate::domain::ports::SharedLedgerStore;
use crate::domain::reference::Reference;
use crate::domain::transaction::{SettleOutcome, Settlement};
use crate::domain::withdrawal::{Withdrawal, WithdrawalDecision, WithdrawalOutcome};
use crate::error::{PaymentError, Result};
use log::{info, warn};
use serde::Serialize;

/// Outcome of one entry in a bulk verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkVerifyResult {
    pub reference: String,
    pub outcome: BulkOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum BulkOutcome {
    Verified,
    AlreadyFinal,
    NotFound,
    Error(String),
}

pub struct LedgerAdmin {
    store: SharedLedgerStore,
}

impl LedgerAdmin {
    pub fn new(store: SharedLedgerStore) -> Self {
        Self { store }
    }

    /// Confirms a pending deposit after manual review, crediting the owner.
    pub async fn verify_deposit(&self, reference: &Reference) -> Result<SettleOutcome> {
        let outcome = self
            .store
            .settle(reference, Settlement::manually_verified())
            .await?;
        match &outcome {
            SettleOutcome::Applied { .. } => info!("{} verified manually", reference),
            SettleOutcome::AlreadyTerminal(_) => {
                warn!("{} is already final; manual verification ignored", reference)
            }
            SettleOutcome::NotFound => {}
        }
        Ok(outcome)
    }

    /// Rejects a pending deposit, recording the reason in its audit trail.
    pub async fn reject_deposit(
        &self,
        reference: &Reference,
        reason: Option<&str>,
    ) -> Result<SettleOutcome> {
        let outcome = self
            .store
            .settle(reference, Settlement::rejected(reason))
            .await?;
        if let SettleOutcome::Applied { .. } = outcome {
            info!("{} rejected", reference);
        }
        Ok(outcome)
    }

    /// Verifies each reference independently; one failure does not stop the rest.
    pub async fn bulk_verify(&self, references: &[String]) -> Vec<BulkVerifyResult> {
        let mut results = Vec::with_capacity(references.len());
        for raw in references {
            let outcome = match raw.parse::<Reference>() {
                Err(e) => BulkOutcome::Error(e.to_string()),
                Ok(reference) => match self.verify_deposit(&reference).await {
                    Ok(SettleOutcome::Applied { .. }) => BulkOutcome::Verified,
                    Ok(SettleOutcome::AlreadyTerminal(_)) => BulkOutcome::AlreadyFinal,
                    Ok(SettleOutcome::NotFound) => BulkOutcome::NotFound,
                    Err(e) => BulkOutcome::Error(e.to_string()),
                },
            };
            results.push(BulkVerifyResult {
                reference: raw.clone(),
                outcome,
            });
        }
        results
    }

    pub async fn savings(&self, owner: &OwnerId) -> Result<SavingsAccount> {
        Ok(self
            .store
            .savings(owner)
            .await?
            .unwrap_or_else(|| SavingsAccount::new(owner.clone())))
    }

    /// Files a withdrawal request. The balance is checked here and again,
    /// atomically, when the request is approved.
    pub async fn request_withdrawal(
        &self,
        owner: OwnerId,
        amount: u64,
        phone_number: &str,
    ) -> Result<Withdrawal> {
        let amount = Amount::new(amount)?;
        let phone_number = PhoneNumber::normalize(phone_number)?;

        let account = self.savings(&owner).await?;
        if !account.balance.covers(amount) {
            return Err(PaymentError::InsufficientFunds {
                owner: owner.to_string(),
                balance: account.balance.0,
                requested: amount.value(),
            });
        }

        let withdrawal = self
            .store
            .insert_withdrawal(owner, amount, phone_number)
            .await?;
        info!(
            "Withdrawal {} of {} requested by {}",
            withdrawal.id, withdrawal.amount, withdrawal.owner_id
        );
        Ok(withdrawal)
    }

    pub async fn approve_withdrawal(&self, id: u64) -> Result<Withdrawal> {
        self.resolve(id, WithdrawalDecision::Approve).await
    }

    pub async fn reject_withdrawal(&self, id: u64) -> Result<Withdrawal> {
        self.resolve(id, WithdrawalDecision::Reject).await
    }

    async fn resolve(&self, id: u64, decision: WithdrawalDecision) -> Result<Withdrawal> {
        match self.store.resolve_withdrawal(id, decision).await? {
            WithdrawalOutcome::Resolved(withdrawal) => {
                info!("Withdrawal {} {:?}", id, withdrawal.status);
                Ok(withdrawal)
            }
            WithdrawalOutcome::AlreadyResolved(withdrawal) => Err(PaymentError::ValidationError(
                format!("Withdrawal {} is already {:?}", id, withdrawal.status),
            )),
            WithdrawalOutcome::NotFound => Err(PaymentError::NotFound(format!("Withdrawal {id}"))),
        }
    }
}
