use super::account::{Amount, OwnerId};
use super::phone::PhoneNumber;
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smallest withdrawal a user may request, in KES.
pub const MIN_WITHDRAWAL_AMOUNT: u64 = 500;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalDecision {
    Approve,
    Reject,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Withdrawal {
    pub id: u64,
    pub owner_id: OwnerId,
    pub amount: Amount,
    pub phone_number: PhoneNumber,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn new(
        id: u64,
        owner_id: OwnerId,
        amount: Amount,
        phone_number: PhoneNumber,
    ) -> Result<Self, PaymentError> {
        if amount.value() < MIN_WITHDRAWAL_AMOUNT {
            return Err(PaymentError::ValidationError(format!(
                "Minimum withdrawal amount is KES {MIN_WITHDRAWAL_AMOUNT}"
            )));
        }
        Ok(Self {
            id,
            owner_id,
            amount,
            phone_number,
            status: WithdrawalStatus::Pending,
            created_at: Utc::now(),
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == WithdrawalStatus::Pending
    }
}

/// Result of resolving a withdrawal against the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum WithdrawalOutcome {
    Resolved(Withdrawal),
    AlreadyResolved(Withdrawal),
    NotFound,
}
