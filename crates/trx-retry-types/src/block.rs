use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Block height in the chain. Zero is never a produced block.
pub type BlockNumber = u32;

/// Point in time with whole-second precision (seconds since the Unix epoch).
///
/// Transaction expirations and block timestamps share this resolution so the
/// expiry sweep compares like with like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs)
    }

    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// Pre-epoch datetimes clamp to the epoch.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.timestamp().max(0) as u64)
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        i64::try_from(self.0)
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    pub fn saturating_add(self, window: Duration) -> Self {
        Timestamp(self.0.saturating_add(window.as_secs()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            None => write!(f, "{}s", self.0),
        }
    }
}

/// Most recent committed block seen by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadBlock {
    pub block_num: BlockNumber,
    pub timestamp: Timestamp,
}
