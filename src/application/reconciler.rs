use crate::domain::ports::SharedLedgerStore;
use crate::domain::reference::Reference;
use crate::domain::transaction::{SettleOutcome, Settlement};
use log::{error, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Provider statuses that confirm a payment.
const SUCCESS_STATUSES: &[&str] = &["payment.success", "success", "Success", "COMPLETED"];
/// Provider statuses that definitively fail a payment.
const FAILURE_STATUSES: &[&str] = &[
    "payment.failed",
    "payment.cancelled",
    "failed",
    "Failed",
    "FAILED",
    "cancelled",
    "CANCELLED",
];

/// Callback body posted by the provider. Unknown fields are ignored, and
/// fields the reconciler does not read are kept as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CallbackPayload {
    #[serde(default, deserialize_with = "deserialize_text")]
    pub api_ref: Option<String>,
    pub checkout_id: Option<Value>,
    pub transaction_id: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub amount: Option<CallbackAmount>,
    pub phone_number: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub mpesa_code: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub result_desc: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub payment_date: Option<String>,
}

/// Amount reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallbackAmount {
    Whole(u64),
    /// Present but not a whole, non-negative number. Never matches a record.
    Unreadable(Value),
}

impl From<u64> for CallbackAmount {
    fn from(amount: u64) -> Self {
        CallbackAmount::Whole(amount)
    }
}

/// Accepts a string or a number (rendered as text). Other JSON is dropped.
fn deserialize_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn whole(value: f64) -> Option<u64> {
    (value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64).then_some(value as u64)
}

/// Accepts the amount as a JSON number or a numeric string.
fn deserialize_amount<'de, D>(deserializer: D) -> Result<Option<CallbackAmount>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let parsed = match &value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(whole)),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(whole),
        _ => None,
    };
    Ok(Some(match parsed {
        Some(amount) => CallbackAmount::Whole(amount),
        None => CallbackAmount::Unreadable(value),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Failure,
    Unknown,
}

impl StatusClass {
    /// Exact-match classification; unrecognized statuses never finalize.
    pub fn of(status: Option<&str>) -> Self {
        match status {
            Some(s) if SUCCESS_STATUSES.contains(&s) => StatusClass::Success,
            Some(s) if FAILURE_STATUSES.contains(&s) => StatusClass::Failure,
            _ => StatusClass::Unknown,
        }
    }
}

/// What the reconciler did with a callback. Not sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Confirmed,
    Failed,
    Duplicate,
    UnknownStatus,
    AmountMismatch,
    UnknownReference,
    InvalidReference,
    InternalError,
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
    #[serde(skip)]
    pub disposition: Option<Disposition>,
}

impl Ack {
    fn processed(disposition: Disposition) -> Self {
        Self {
            success: true,
            message: "Callback processed".to_string(),
            disposition: Some(disposition),
        }
    }
}

/// Applies provider callbacks to the ledger exactly once per reference.
///
/// Holds no state between calls: duplicate and concurrent deliveries are
/// resolved by the store's conditional settle on `verified`.
pub struct CallbackReconciler {
    store: SharedLedgerStore,
}

impl CallbackReconciler {
    pub fn new(store: SharedLedgerStore) -> Self {
        Self { store }
    }

    /// Always acknowledges. Internal failures are logged, never surfaced, so
    /// the provider does not start retrying.
    pub async fn reconcile(&self, payload: CallbackPayload) -> Ack {
        info!(
            "Processing callback: api_ref={:?} status={:?} amount={:?} mpesa_code={:?}",
            payload.api_ref, payload.status, payload.amount, payload.mpesa_code
        );

        let reference = match payload.api_ref.as_deref().map(str::parse::<Reference>) {
            Some(Ok(reference)) => reference,
            Some(Err(e)) => {
                warn!("Ignoring callback: {}", e);
                return Ack::processed(Disposition::InvalidReference);
            }
            None => {
                warn!("Ignoring callback without api_ref");
                return Ack::processed(Disposition::InvalidReference);
            }
        };

        let settlement = match StatusClass::of(payload.status.as_deref()) {
            StatusClass::Success => Settlement::confirmed(
                payload.mpesa_code.as_deref(),
                payload.payment_date.as_deref(),
            ),
            StatusClass::Failure => Settlement::failed(payload.result_desc.as_deref()),
            StatusClass::Unknown => {
                warn!(
                    "Unrecognized status {:?} for {}; leaving it pending",
                    payload.status, reference
                );
                return Ack::processed(Disposition::UnknownStatus);
            }
        };

        match &payload.amount {
            Some(CallbackAmount::Unreadable(raw)) => {
                warn!(
                    "Unreadable amount {} for {}; leaving it pending",
                    raw, reference
                );
                return Ack::processed(Disposition::AmountMismatch);
            }
            Some(CallbackAmount::Whole(paid)) => match self.store.get_pending(&reference).await {
                Ok(Some(pending)) if pending.amount.value() != *paid => {
                    warn!(
                        "Amount mismatch for {}: expected {}, provider reported {}; leaving it pending",
                        reference, pending.amount, paid
                    );
                    return Ack::processed(Disposition::AmountMismatch);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to load {}: {}", reference, e);
                    return Ack::processed(Disposition::InternalError);
                }
            },
            None => {}
        }

        let disposition = match self.store.settle(&reference, settlement).await {
            Ok(SettleOutcome::Applied {
                transaction,
                account,
            }) => {
                if let Some(account) = account {
                    info!(
                        "{} verified; balance of {} is now {}",
                        reference, account.owner_id, account.balance
                    );
                } else {
                    info!("{} marked {:?}", reference, transaction.verified);
                }
                if transaction.verified.as_flag() == Some(true) {
                    Disposition::Confirmed
                } else {
                    Disposition::Failed
                }
            }
            Ok(SettleOutcome::AlreadyTerminal(transaction)) => {
                info!(
                    "Duplicate callback for {} (already {:?}); ignoring",
                    reference, transaction.verified
                );
                Disposition::Duplicate
            }
            Ok(SettleOutcome::NotFound) => {
                warn!("No {} row for {}", reference.table().name(), reference);
                Disposition::UnknownReference
            }
            Err(e) => {
                error!("Error processing callback for {}: {}", reference, e);
                Disposition::InternalError
            }
        };

        Ack::processed(disposition)
    }
}
