use std::time::Duration;

use thiserror::Error;
use trx_retry_types::{Timestamp, TransactionId};

pub type RetryDbResult<T> = Result<T, RetryDbError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryDbError {
    #[error("transaction {0} is already tracked")]
    DuplicateTracking(TransactionId),

    #[error("tracked transaction limit of {limit} reached")]
    CapacityExceeded { limit: usize },

    #[error("transaction {id} expiration {expiration} is more than {max_secs}s past head block time {head_time}")]
    ExpirationTooFar {
        id: TransactionId,
        expiration: Timestamp,
        head_time: Timestamp,
        max_secs: u64,
    },

    #[error("transaction {id} expiration {expiration} is not after head block time {head_time}")]
    AlreadyExpired {
        id: TransactionId,
        expiration: Timestamp,
        head_time: Timestamp,
    },

    #[error("invalid retry db config: {0}")]
    InvalidConfig(String),

    #[error("trace formatting failed: {0}")]
    Formatting(#[from] FormatError),

    /// Dual index desync or a delivery handle resolved twice
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Rendering a trace into its caller-facing form failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("abi schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("formatting exceeded time budget of {budget:?}")]
    Deadline { budget: Duration },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FormatError {
    fn from(err: serde_json::Error) -> Self {
        FormatError::Serialization(err.to_string())
    }
}
