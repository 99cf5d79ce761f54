use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Identifier of the account holder whose savings balance a payment affects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Result<Self, PaymentError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(PaymentError::ValidationError(
                "Owner id must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A positive, whole-unit currency amount (KES has no minor unit in this system).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    pub fn new(value: u64) -> Result<Self, PaymentError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = PaymentError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        // Amounts beyond i64::MAX are not representable as a balance; saturate.
        Self(i64::try_from(amount.0).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Savings balance of an owner.
///
/// Non-negative by policy only: withdrawals check funds before debiting, but
/// the type itself does not forbid a negative value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub i64);

impl Balance {
    pub const ZERO: Self = Self(0);

    pub fn new(amount: i64) -> Self {
        Self(amount)
    }

    pub fn covers(&self, amount: Amount) -> bool {
        *self >= Balance::from(amount)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The savings row of one owner. Created lazily on the first verified deposit.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SavingsAccount {
    pub owner_id: OwnerId,
    pub balance: Balance,
    pub updated_at: DateTime<Utc>,
}

impl SavingsAccount {
    pub fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            balance: Balance::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Credits a verified deposit.
    pub fn credit(&mut self, amount: Amount) {
        self.balance += amount.into();
        self.updated_at = Utc::now();
    }

    /// Debits an approved withdrawal if the balance covers it.
    pub fn debit(&mut self, amount: Amount) -> Result<(), PaymentError> {
        if self.balance.covers(amount) {
            self.balance -= amount.into();
            self.updated_at = Utc::now();
            Ok(())
        } else {
            Err(PaymentError::InsufficientFunds {
                owner: self.owner_id.to_string(),
                balance: self.balance.0,
                requested: amount.value(),
            })
        }
    }
}
