use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Globally unique transaction identifier
///
/// Displayed and serialized as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransactionId(pub [u8; 32]);

#[derive(Debug, Error, PartialEq)]
pub enum TransactionIdError {
    #[error("invalid transaction id hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("transaction id must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

impl TransactionId {
    /// Compute a transaction id from packed transaction bytes
    pub fn compute(packed: &[u8]) -> Self {
        let digest = Sha256::digest(packed);
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest[..]);
        TransactionId(id)
    }

    /// Derive an id from a human readable label (scenario files, tests)
    pub fn from_label(label: &str) -> Self {
        Self::compute(label.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.short_hex())
    }
}

impl FromStr for TransactionId {
    type Err = TransactionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(TransactionIdError::InvalidLength(bytes.len()));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(TransactionId(id))
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Terminal status recorded in a transaction receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Succeeded, no error handler executed
    Executed,
    /// Objectively failed (not executed), error handler executed
    SoftFail,
    /// Objectively failed and error handler objectively failed, no state change
    HardFail,
    /// Delayed / deferred transaction scheduled for future execution
    Delayed,
    /// Deferred transaction expired without executing
    Expired,
}

impl ReceiptStatus {
    /// Executed and soft-failed transactions are the only ones whose traces
    /// can end up in a committed block.
    pub fn is_accepted(self) -> bool {
        matches!(self, ReceiptStatus::Executed | ReceiptStatus::SoftFail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptStatus::Executed => "executed",
            ReceiptStatus::SoftFail => "soft_fail",
            ReceiptStatus::HardFail => "hard_fail",
            ReceiptStatus::Delayed => "delayed",
            ReceiptStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub status: ReceiptStatus,
    pub cpu_usage_us: u32,
    pub net_usage_words: u32,
}

impl TransactionReceipt {
    pub fn new(status: ReceiptStatus) -> Self {
        Self {
            status,
            cpu_usage_us: 0,
            net_usage_words: 0,
        }
    }
}
