use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
    #[error("Gateway error: {0}")]
    GatewayError(String),
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("Reference {0} already exists")]
    DuplicateReference(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Insufficient funds for {owner}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        owner: String,
        balance: i64,
        requested: u64,
    },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    /// Errors after which the caller may retry with a freshly generated reference.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::DuplicateReference(_))
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        PaymentError::GatewayUnavailable(e.to_string())
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(e: rocksdb::Error) -> Self {
        PaymentError::InternalError(Box::new(e))
    }
}
