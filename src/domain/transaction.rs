use super::account::{Amount, OwnerId, SavingsAccount};
use super::phone::PhoneNumber;
use super::reference::{Reference, TransactionKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Verification state of a pending payment.
///
/// Stored as the tri-state `verified` column: `null` pending, `true`
/// confirmed, `false` failed or rejected. Leaves `Pending` at most once.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Verification {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

impl Verification {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verification::Pending)
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Verification::Pending => None,
            Verification::Confirmed => Some(true),
            Verification::Failed => Some(false),
        }
    }
}

impl From<Option<bool>> for Verification {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            None => Verification::Pending,
            Some(true) => Verification::Confirmed,
            Some(false) => Verification::Failed,
        }
    }
}

fn serialize_verified<S>(verified: &Verification, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    verified.as_flag().serialize(serializer)
}

fn deserialize_verified<'de, D>(deserializer: D) -> Result<Verification, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.into())
}

/// A push payment awaiting its provider callback.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PendingTransaction {
    pub reference: Reference,
    pub kind: TransactionKind,
    /// Account credited on confirmation. Absent for disbursement payments
    /// initiated without a signed-in user.
    pub owner_id: Option<OwnerId>,
    /// Loan application a disbursement payment belongs to.
    pub application_id: Option<String>,
    pub amount: Amount,
    pub phone_number: PhoneNumber,
    #[serde(
        serialize_with = "serialize_verified",
        deserialize_with = "deserialize_verified"
    )]
    pub verified: Verification,
    /// Provider receipt (M-Pesa code) recorded on confirmation.
    pub provider_receipt: Option<String>,
    /// Append-only audit trail.
    pub raw_provider_message: String,
    pub created_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(
        reference: Reference,
        owner_id: Option<OwnerId>,
        amount: Amount,
        phone_number: PhoneNumber,
    ) -> Self {
        let application_id = match &reference {
            Reference::Loan { application_id, .. } => Some(application_id.clone()),
            Reference::Savings { .. } => None,
        };
        let raw_provider_message = format!("STK Push initiated - Reference: {reference}");
        Self {
            kind: reference.kind(),
            reference,
            owner_id,
            application_id,
            amount,
            phone_number,
            verified: Verification::Pending,
            provider_receipt: None,
            raw_provider_message,
            created_at: Utc::now(),
        }
    }

    pub fn append_message(&mut self, note: &str) {
        if self.raw_provider_message.is_empty() {
            self.raw_provider_message = note.to_string();
        } else {
            self.raw_provider_message.push_str("\n\n");
            self.raw_provider_message.push_str(note);
        }
    }

    /// Applies a terminal outcome. Returns `false`, leaving the record
    /// untouched, when it is already terminal.
    pub fn apply(&mut self, settlement: &Settlement) -> bool {
        if self.verified.is_terminal() {
            return false;
        }
        self.verified = match settlement.outcome {
            Outcome::Confirmed => Verification::Confirmed,
            Outcome::Failed => Verification::Failed,
        };
        if let Some(receipt) = &settlement.provider_receipt {
            self.provider_receipt = Some(receipt.clone());
        }
        self.append_message(&settlement.note);
        true
    }

    /// Whether confirming this payment credits a savings balance.
    /// Disbursement payments are record keeping only.
    pub fn credits_balance(&self) -> Option<&OwnerId> {
        match self.kind {
            TransactionKind::SavingsDeposit => self.owner_id.as_ref(),
            TransactionKind::LoanDisbursementPayment => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Confirmed,
    Failed,
}

/// A terminal transition requested by the reconciler or an administrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub outcome: Outcome,
    /// Appended to the audit trail.
    pub note: String,
    pub provider_receipt: Option<String>,
}

impl Settlement {
    pub fn confirmed(receipt: Option<&str>, paid_on: Option<&str>) -> Self {
        Self {
            outcome: Outcome::Confirmed,
            note: format!(
                "M-Pesa Receipt: {}. Paid on {}",
                receipt.unwrap_or("N/A"),
                paid_on.unwrap_or("N/A")
            ),
            provider_receipt: receipt.map(str::to_string),
        }
    }

    pub fn failed(reason: Option<&str>) -> Self {
        Self {
            outcome: Outcome::Failed,
            note: format!("Payment failed: {}", reason.unwrap_or("Unknown error")),
            provider_receipt: None,
        }
    }

    pub fn rejected(reason: Option<&str>) -> Self {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("No reason provided");
        Self {
            outcome: Outcome::Failed,
            note: format!("[REJECTED: {reason}]"),
            provider_receipt: None,
        }
    }

    pub fn manually_verified() -> Self {
        Self {
            outcome: Outcome::Confirmed,
            note: "[VERIFIED: manual review]".to_string(),
            provider_receipt: None,
        }
    }
}

/// Result of a conditional settle against the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// The record moved from pending to terminal. `account` is the savings
    /// row after the credit, when one was applied.
    Applied {
        transaction: PendingTransaction,
        account: Option<SavingsAccount>,
    },
    /// The record was already terminal; nothing changed.
    AlreadyTerminal(PendingTransaction),
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingTransaction {
        PendingTransaction::new(
            "savings_1700000000_ab12cd".parse().unwrap(),
            Some(OwnerId::new("user-1").unwrap()),
            Amount::new(500).unwrap(),
            PhoneNumber::normalize("0712345678").unwrap(),
        )
    }

    #[test]
    fn test_new_record_is_pending_with_initiation_note() {
        let tx = pending();
        assert_eq!(tx.verified, Verification::Pending);
        assert_eq!(tx.kind, TransactionKind::SavingsDeposit);
        assert_eq!(
            tx.raw_provider_message,
            "STK Push initiated - Reference: savings_1700000000_ab12cd"
        );
    }

    #[test]
    fn test_apply_is_terminal_once() {
        let mut tx = pending();
        assert!(tx.apply(&Settlement::rejected(Some("Invalid code"))));
        assert_eq!(tx.verified, Verification::Failed);

        let before = tx.clone();
        assert!(!tx.apply(&Settlement::confirmed(Some("QWE123"), None)));
        assert_eq!(tx, before);
    }

    #[test]
    fn test_audit_trail_is_appended() {
        let mut tx = pending();
        tx.apply(&Settlement::confirmed(Some("QWE123"), Some("2024-01-01")));
        assert!(tx.raw_provider_message.starts_with("STK Push initiated"));
        assert!(
            tx.raw_provider_message
                .ends_with("M-Pesa Receipt: QWE123. Paid on 2024-01-01")
        );
        assert_eq!(tx.provider_receipt.as_deref(), Some("QWE123"));
    }

    #[test]
    fn test_verified_serializes_as_nullable_bool() {
        let mut tx = pending();
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["verified"], serde_json::Value::Null);

        tx.apply(&Settlement::failed(None));
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["verified"], serde_json::Value::Bool(false));
        assert_eq!(json["reference"], "savings_1700000000_ab12cd");

        let back: PendingTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(back.verified, Verification::Failed);
    }

    #[test]
    fn test_disbursement_never_credits() {
        let tx = PendingTransaction::new(
            "loan_42_1700000000".parse().unwrap(),
            Some(OwnerId::new("user-1").unwrap()),
            Amount::new(500).unwrap(),
            PhoneNumber::normalize("0712345678").unwrap(),
        );
        assert_eq!(tx.application_id.as_deref(), Some("42"));
        assert!(tx.credits_balance().is_none());
    }
}
