use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RetryDbError, RetryDbResult};

/// Default time budget for rendering a single trace.
pub const DEFAULT_ABI_SERIALIZER_MAX_TIME_MS: u64 = 10;

/// Default cap on simultaneously tracked transactions.
///
/// Bounds the tracked index; submissions past this limit are rejected rather
/// than evicting transactions somebody is still waiting on.
pub const DEFAULT_MAX_TRACKED: usize = 100_000;

/// Default maximum distance between head block time and a tracked
/// transaction's expiration.
pub const DEFAULT_MAX_EXPIRATION_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDbConfig {
    /// Maximum time allowed for ABI-aware trace formatting, in milliseconds.
    #[serde(default = "default_abi_serializer_max_time_ms")]
    pub abi_serializer_max_time_ms: u64,

    /// Maximum number of transactions tracked at once.
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,

    /// Maximum expiration window, in seconds past head block time.
    #[serde(default = "default_max_expiration_secs")]
    pub max_expiration_secs: u64,
}

fn default_abi_serializer_max_time_ms() -> u64 {
    DEFAULT_ABI_SERIALIZER_MAX_TIME_MS
}

fn default_max_tracked() -> usize {
    DEFAULT_MAX_TRACKED
}

fn default_max_expiration_secs() -> u64 {
    DEFAULT_MAX_EXPIRATION_SECS
}

impl Default for RetryDbConfig {
    fn default() -> Self {
        Self {
            abi_serializer_max_time_ms: DEFAULT_ABI_SERIALIZER_MAX_TIME_MS,
            max_tracked: DEFAULT_MAX_TRACKED,
            max_expiration_secs: DEFAULT_MAX_EXPIRATION_SECS,
        }
    }
}

impl RetryDbConfig {
    pub fn abi_serializer_max_time(&self) -> Duration {
        Duration::from_millis(self.abi_serializer_max_time_ms)
    }

    pub fn max_expiration(&self) -> Duration {
        Duration::from_secs(self.max_expiration_secs)
    }

    pub fn validate(&self) -> RetryDbResult<()> {
        if self.abi_serializer_max_time_ms == 0 {
            return Err(RetryDbError::InvalidConfig(
                "abi_serializer_max_time_ms must be greater than zero".into(),
            ));
        }
        if self.max_tracked == 0 {
            return Err(RetryDbError::InvalidConfig("max_tracked must be greater than zero".into()));
        }
        if self.max_expiration_secs == 0 {
            return Err(RetryDbError::InvalidConfig(
                "max_expiration_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
