use parking_lot::RwLock;
use std::sync::Arc;
use trx_retry_types::{BlockNumber, HeadBlock, Timestamp, TransactionId, TransactionTrace};

use crate::classifier::TraceDisposition;
use crate::delivery::TrackReceiver;
use crate::error::RetryDbResult;
use crate::reconciler::CommitSummary;
use crate::retry_db::TrxRetryDb;
use crate::tracked_index::TrackedStatus;

/// Cloneable handle to a [`TrxRetryDb`] shared between the apply pipeline and
/// API readers.
///
/// Pipeline events, `track` and `cancel` take the write lock; queries take the
/// read lock. No method holds the lock across an await point.
#[derive(Clone)]
pub struct SharedRetryDb {
    inner: Arc<RwLock<TrxRetryDb>>,
}

impl SharedRetryDb {
    pub fn new(db: TrxRetryDb) -> Self {
        Self {
            inner: Arc::new(RwLock::new(db)),
        }
    }

    pub fn track(&self, id: TransactionId, expiration: Timestamp) -> RetryDbResult<TrackReceiver> {
        self.inner.write().track(id, expiration)
    }

    pub fn cancel(&self, id: &TransactionId) -> bool {
        self.inner.write().cancel(id)
    }

    pub fn on_trace_produced(&self, trace: Arc<TransactionTrace>) -> TraceDisposition {
        self.inner.write().on_trace_produced(trace)
    }

    pub fn on_block_committed(&self, block_num: BlockNumber, block_time: Timestamp) -> Option<CommitSummary> {
        self.inner.write().on_block_committed(block_num, block_time)
    }

    pub fn status(&self, id: &TransactionId) -> Option<TrackedStatus> {
        self.inner.read().status(id)
    }

    pub fn size(&self) -> usize {
        self.inner.read().size()
    }

    pub fn head_block(&self) -> Option<HeadBlock> {
        self.inner.read().head_block()
    }

    /// Run `f` under the read lock
    pub fn with_read<R>(&self, f: impl FnOnce(&TrxRetryDb) -> R) -> R {
        f(&self.inner.read())
    }
}
