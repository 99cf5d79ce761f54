use crate::domain::account::{Amount, OwnerId};
use crate::domain::phone::PhoneNumber;
use crate::domain::ports::{PushRequest, SharedLedgerStore, SharedPaymentGateway};
use crate::domain::reference::Reference;
use crate::domain::savings::MIN_DEPOSIT_AMOUNT;
use crate::domain::transaction::{PendingTransaction, Settlement};
use crate::error::{PaymentError, Result};
use chrono::Utc;
use log::{error, info, warn};

/// Fresh references tried before a collision is reported to the caller.
const MAX_REFERENCE_ATTEMPTS: i64 = 3;

/// What a push payment is for.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentPurpose {
    /// Tops up the owner's savings balance once confirmed.
    SavingsDeposit { owner_id: OwnerId },
    /// Pays the processing fee of a loan application. Record keeping only.
    LoanDisbursement {
        application_id: String,
        owner_id: Option<OwnerId>,
    },
}

impl PaymentPurpose {
    fn owner_id(&self) -> Option<&OwnerId> {
        match self {
            PaymentPurpose::SavingsDeposit { owner_id } => Some(owner_id),
            PaymentPurpose::LoanDisbursement { owner_id, .. } => owner_id.as_ref(),
        }
    }

    fn reference(&self, timestamp_ms: i64) -> Result<Reference> {
        match self {
            PaymentPurpose::SavingsDeposit { .. } => Ok(Reference::new_savings(timestamp_ms)),
            PaymentPurpose::LoanDisbursement { application_id, .. } => {
                Reference::new_loan(application_id, timestamp_ms)
            }
        }
    }

    fn minimum_amount(&self) -> u64 {
        match self {
            PaymentPurpose::SavingsDeposit { .. } => MIN_DEPOSIT_AMOUNT,
            PaymentPurpose::LoanDisbursement { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitiationRequest {
    pub purpose: PaymentPurpose,
    pub amount: u64,
    pub phone_number: String,
}

/// A push payment the provider accepted; track it by `reference`.
#[derive(Debug, Clone, PartialEq)]
pub struct Initiation {
    pub reference: Reference,
    pub display_text: String,
}

/// Starts mobile-money push payments.
///
/// The pending row is committed before the gateway is called, so a callback
/// can never arrive for a reference the ledger does not know. The gateway call
/// is never retried: on failure the caller initiates again and gets a new
/// reference.
pub struct PaymentInitiator {
    store: SharedLedgerStore,
    gateway: SharedPaymentGateway,
    callback_url: String,
}

impl PaymentInitiator {
    pub fn new(
        store: SharedLedgerStore,
        gateway: SharedPaymentGateway,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            callback_url: callback_url.into(),
        }
    }

    pub async fn initiate(&self, request: InitiationRequest) -> Result<Initiation> {
        let minimum = request.purpose.minimum_amount();
        if request.amount < minimum {
            return Err(PaymentError::ValidationError(format!(
                "Minimum amount is KES {minimum}"
            )));
        }
        let amount = Amount::new(request.amount)?;
        let phone_number = PhoneNumber::normalize(&request.phone_number)?;
        info!("Formatted phone: {}", phone_number);

        let pending = self
            .create_pending(&request.purpose, amount, phone_number)
            .await?;
        let reference = pending.reference;

        let push = PushRequest {
            amount: amount.value(),
            callback_url: self.callback_url.clone(),
            channel_id: self.gateway.channel_id().to_string(),
            phone_number: pending.phone_number.to_string(),
            api_ref: reference.to_string(),
        };

        match self.gateway.push_payment(&push).await {
            Ok(accepted) => {
                info!("STK push sent for {}", reference);
                Ok(Initiation {
                    reference,
                    display_text: accepted.display_text,
                })
            }
            Err(e) => {
                self.abandon(&reference, &e).await;
                Err(e)
            }
        }
    }

    async fn create_pending(
        &self,
        purpose: &PaymentPurpose,
        amount: Amount,
        phone_number: PhoneNumber,
    ) -> Result<PendingTransaction> {
        let now_ms = Utc::now().timestamp_millis();
        let mut attempt = 0;
        loop {
            let reference = purpose.reference(now_ms + attempt)?;
            let pending = PendingTransaction::new(
                reference,
                purpose.owner_id().cloned(),
                amount,
                phone_number.clone(),
            );
            match self.store.insert_pending(pending.clone()).await {
                Ok(()) => return Ok(pending),
                Err(e) if e.is_retryable() && attempt + 1 < MAX_REFERENCE_ATTEMPTS => {
                    warn!("{}; generating a new reference", e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Finalizes the pending row after the provider definitively refused the
    /// push. Transport failures leave it pending: the push may still have
    /// reached the phone, and its callback must be able to land.
    async fn abandon(&self, reference: &Reference, cause: &PaymentError) {
        if !matches!(cause, PaymentError::GatewayError(_)) {
            warn!(
                "Push for {} has unknown delivery ({}); leaving it pending",
                reference, cause
            );
            return;
        }
        let reason = format!("Initiation failed: {cause}");
        if let Err(e) = self
            .store
            .settle(reference, Settlement::failed(Some(&reason)))
            .await
        {
            error!("Failed to mark {} as failed: {}", reference, e);
        }
    }
}
