use super::account::{Amount, OwnerId, SavingsAccount};
use super::events::{ChangeFilter, Subscription};
use super::phone::PhoneNumber;
use super::reference::Reference;
use super::transaction::{PendingTransaction, Settlement, SettleOutcome};
use super::withdrawal::{Withdrawal, WithdrawalDecision, WithdrawalOutcome};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Durable ledger of pending payments, savings balances and withdrawals.
///
/// Every mutation that touches more than one row is a single conditional
/// operation on the store: callers never read a balance and write it back.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new pending row into the table its reference routes to.
    /// Fails with `DuplicateReference` if the reference already exists.
    async fn insert_pending(&self, tx: PendingTransaction) -> Result<()>;

    async fn get_pending(&self, reference: &Reference) -> Result<Option<PendingTransaction>>;

    /// Moves a pending row to a terminal state and, for a confirmed savings
    /// deposit, credits the owner's balance, as one atomic step guarded by
    /// `verified IS NULL`. A terminal row is returned untouched.
    async fn settle(&self, reference: &Reference, settlement: Settlement) -> Result<SettleOutcome>;

    async fn savings(&self, owner: &OwnerId) -> Result<Option<SavingsAccount>>;

    async fn all_savings(&self) -> Result<Vec<SavingsAccount>>;

    /// Creates a pending withdrawal with a store-assigned id.
    async fn insert_withdrawal(
        &self,
        owner: OwnerId,
        amount: Amount,
        phone_number: PhoneNumber,
    ) -> Result<Withdrawal>;

    async fn get_withdrawal(&self, id: u64) -> Result<Option<Withdrawal>>;

    /// Resolves a pending withdrawal. Approval debits the balance in the same
    /// atomic step and fails with `InsufficientFunds` if it does not cover
    /// the amount.
    async fn resolve_withdrawal(
        &self,
        id: u64,
        decision: WithdrawalDecision,
    ) -> Result<WithdrawalOutcome>;

    /// Registers interest in row changes matching `filter`.
    fn subscribe(&self, filter: ChangeFilter) -> Subscription;
}

pub type SharedLedgerStore = Arc<dyn LedgerStore>;

/// Push-payment request sent to the mobile-money provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushRequest {
    pub amount: u64,
    pub callback_url: String,
    pub channel_id: String,
    pub phone_number: String,
    pub api_ref: String,
}

/// What the provider asks the payer to do next.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PushAccepted {
    pub display_text: String,
}

/// Mobile-money provider that prompts the payer's phone.
///
/// Calls are fire-and-forget: a failure is returned to the caller and never
/// retried here. Retrying means initiating again with a fresh reference.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Channel the push is billed to.
    fn channel_id(&self) -> &str;

    async fn push_payment(&self, request: &PushRequest) -> Result<PushAccepted>;
}

pub type SharedPaymentGateway = Arc<dyn PaymentGateway>;
