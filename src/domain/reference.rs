//! Payment references.
//!
//! A reference is generated when a push payment is initiated and comes back
//! verbatim as `api_ref` in the provider callback. Its prefix decides which
//! ledger table the callback applies to, so it is parsed into a tagged union at
//! the edge instead of being prefix-matched inside business logic.

use crate::error::PaymentError;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SAVINGS_PREFIX: &str = "savings";
const LOAN_PREFIX: &str = "loan";
const NONCE_LEN: usize = 8;

/// What a pending payment pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    SavingsDeposit,
    LoanDisbursementPayment,
}

impl TransactionKind {
    pub fn table(&self) -> Table {
        match self {
            TransactionKind::SavingsDeposit => Table::SavingsDeposits,
            TransactionKind::LoanDisbursementPayment => Table::LoanDisbursements,
        }
    }
}

/// Ledger tables that hold pending payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    SavingsDeposits,
    LoanDisbursements,
    UserSavings,
    Withdrawals,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::SavingsDeposits => "savings_deposits",
            Table::LoanDisbursements => "loan_disbursements",
            Table::UserSavings => "user_savings",
            Table::Withdrawals => "withdrawals",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Reference {
    /// `savings_<timestamp_ms>_<nonce>`
    Savings { timestamp_ms: i64, nonce: String },
    /// `loan_<application_id>_<timestamp_ms>`
    Loan {
        application_id: String,
        timestamp_ms: i64,
    },
}

impl Reference {
    pub fn new_savings(timestamp_ms: i64) -> Self {
        let nonce = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        Reference::Savings {
            timestamp_ms,
            nonce,
        }
    }

    pub fn new_loan(application_id: &str, timestamp_ms: i64) -> Result<Self, PaymentError> {
        let application_id = application_id.trim();
        if application_id.is_empty() {
            return Err(PaymentError::ValidationError(
                "Application id must not be empty".to_string(),
            ));
        }
        Ok(Reference::Loan {
            application_id: application_id.to_string(),
            timestamp_ms,
        })
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            Reference::Savings { .. } => TransactionKind::SavingsDeposit,
            Reference::Loan { .. } => TransactionKind::LoanDisbursementPayment,
        }
    }

    pub fn table(&self) -> Table {
        self.kind().table()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Savings {
                timestamp_ms,
                nonce,
            } => write!(f, "{SAVINGS_PREFIX}_{timestamp_ms}_{nonce}"),
            Reference::Loan {
                application_id,
                timestamp_ms,
            } => write!(f, "{LOAN_PREFIX}_{application_id}_{timestamp_ms}"),
        }
    }
}

impl FromStr for Reference {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PaymentError::InvalidReference(s.to_string());

        let (prefix, rest) = s.split_once('_').ok_or_else(invalid)?;
        match prefix {
            SAVINGS_PREFIX => {
                let (timestamp, nonce) = rest.split_once('_').ok_or_else(invalid)?;
                let timestamp_ms = timestamp.parse().map_err(|_| invalid())?;
                if nonce.is_empty() || !nonce.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(invalid());
                }
                Ok(Reference::Savings {
                    timestamp_ms,
                    nonce: nonce.to_string(),
                })
            }
            LOAN_PREFIX => {
                let (application_id, timestamp) = rest.rsplit_once('_').ok_or_else(invalid)?;
                let timestamp_ms = timestamp.parse().map_err(|_| invalid())?;
                if application_id.is_empty() {
                    return Err(invalid());
                }
                Ok(Reference::Loan {
                    application_id: application_id.to_string(),
                    timestamp_ms,
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Reference {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.to_string()
    }
}
