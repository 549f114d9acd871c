use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;
use trx_retry_types::{BlockNumber, Timestamp, TransactionId};

use crate::error::{RetryDbError, RetryDbResult};
use crate::formatter::TraceRepresentation;

/// Terminal answer for a tracked transaction. Delivered exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrackOutcome {
    /// Included in committed block `block_num`
    Committed {
        block_num: BlockNumber,
        trace: TraceRepresentation,
    },
    /// Expired, never included
    Expired {
        id: TransactionId,
        expiration: Timestamp,
    },
}

impl TrackOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TrackOutcome::Committed { .. })
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, TrackOutcome::Expired { .. })
    }
}

/// Receiving half handed to whoever called `track`.
///
/// Yields `RecvError` if tracking was cancelled before an outcome was reached.
pub type TrackReceiver = oneshot::Receiver<TrackOutcome>;

/// Sending half owned by the tracked index entry
#[derive(Debug)]
pub struct DeliveryHandle {
    sender: Option<oneshot::Sender<TrackOutcome>>,
}

impl DeliveryHandle {
    pub fn channel() -> (Self, TrackReceiver) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender: Some(sender) }, receiver)
    }

    /// Resolve the handle. A second call is an invariant violation and leaves
    /// the first outcome in place.
    ///
    /// A receiver that has already gone away is not an error; the caller simply
    /// stopped waiting.
    pub fn resolve(&mut self, outcome: TrackOutcome) -> RetryDbResult<()> {
        let sender = self.sender.take().ok_or_else(|| {
            RetryDbError::InvariantViolation("delivery handle resolved twice".into())
        })?;
        if sender.send(outcome).is_err() {
            debug!("track receiver dropped before delivery");
        }
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.is_none()
    }
}
