use std::sync::Arc;
use tracing::{debug, error, info};
use trx_retry_types::{BlockNumber, HeadBlock, Timestamp, TransactionId, TransactionTrace};

use crate::classifier::{classify, TraceClass, TraceDisposition};
use crate::config::RetryDbConfig;
use crate::delivery::{DeliveryHandle, TrackReceiver};
use crate::error::{RetryDbError, RetryDbResult};
use crate::formatter::{render_trace, TraceFormatter};
use crate::reconciler::{CommitSummary, Reconciler};
use crate::telemetry;
use crate::trace_cache::{OnBlockSlot, TraceCache};
use crate::tracked_index::{TrackedIndex, TrackedStatus};

/// Tracks submitted transactions until they are committed or expire.
///
/// Fed by the apply pipeline through [`TrxRetryDb::on_trace_produced`] and
/// [`TrxRetryDb::on_block_committed`]; both must be called from the single
/// timeline that applies transactions and never fail outward.
pub struct TrxRetryDb {
    config: RetryDbConfig,
    formatter: Arc<dyn TraceFormatter>,
    cached_traces: TraceCache,
    onblock_trace: OnBlockSlot,
    tracked: TrackedIndex,
    head: Option<HeadBlock>,
}

impl TrxRetryDb {
    pub fn new(config: RetryDbConfig, formatter: Arc<dyn TraceFormatter>) -> RetryDbResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            formatter,
            cached_traces: TraceCache::new(),
            onblock_trace: OnBlockSlot::default(),
            tracked: TrackedIndex::new(),
            head: None,
        })
    }

    // ==================== CALLER-FACING ====================

    /// Start tracking `id`. The receiver yields exactly one [`TrackOutcome`].
    ///
    /// If the transaction already executed in the block being built, its cached
    /// trace is adopted right away.
    ///
    /// [`TrackOutcome`]: crate::delivery::TrackOutcome
    pub fn track(&mut self, id: TransactionId, expiration: Timestamp) -> RetryDbResult<TrackReceiver> {
        if self.tracked.contains(&id) {
            return Err(RetryDbError::DuplicateTracking(id));
        }
        if self.tracked.len() >= self.config.max_tracked {
            return Err(RetryDbError::CapacityExceeded {
                limit: self.config.max_tracked,
            });
        }
        if let Some(head) = self.head {
            if expiration <= head.timestamp {
                return Err(RetryDbError::AlreadyExpired {
                    id,
                    expiration,
                    head_time: head.timestamp,
                });
            }
            if expiration > head.timestamp.saturating_add(self.config.max_expiration()) {
                return Err(RetryDbError::ExpirationTooFar {
                    id,
                    expiration,
                    head_time: head.timestamp,
                    max_secs: self.config.max_expiration_secs,
                });
            }
        }

        let (handle, receiver) = DeliveryHandle::channel();
        self.tracked.track(id, expiration, handle)?;

        if let Some(trace) = self.cached_traces.get(&id) {
            let representation = render_trace(self.formatter.as_ref(), trace, self.config.abi_serializer_max_time());
            self.tracked.record_trace(&id, Arc::clone(trace), representation);
        }

        telemetry::tracked(self.tracked.len());
        debug!(trx = %id.short_hex(), %expiration, tracked = self.tracked.len(), "tracking transaction");
        Ok(receiver)
    }

    /// Stop tracking without delivering an outcome. The receiver observes a
    /// closed channel. Returns false if `id` was not tracked.
    pub fn cancel(&mut self, id: &TransactionId) -> bool {
        let removed = self.tracked.remove(id).is_some();
        if removed {
            telemetry::tracked(self.tracked.len());
            debug!(trx = %id.short_hex(), "tracking cancelled");
        }
        removed
    }

    pub fn status(&self, id: &TransactionId) -> Option<TrackedStatus> {
        self.tracked.find(id).map(|entry| entry.status())
    }

    pub fn is_tracked(&self, id: &TransactionId) -> bool {
        self.tracked.contains(id)
    }

    /// Number of tracked transactions
    pub fn size(&self) -> usize {
        self.tracked.len()
    }

    pub fn head_block(&self) -> Option<HeadBlock> {
        self.head
    }

    pub fn cached_trace_count(&self) -> usize {
        self.cached_traces.len()
    }

    pub fn onblock_trace(&self) -> Option<&Arc<TransactionTrace>> {
        self.onblock_trace.get()
    }

    pub fn config(&self) -> &RetryDbConfig {
        &self.config
    }

    pub fn check_consistency(&self) -> RetryDbResult<()> {
        self.tracked.check_consistency()
    }

    // ==================== PIPELINE-FACING ====================

    /// Record a trace from the apply pipeline. Never fails: formatting errors
    /// degrade to the raw trace.
    pub fn on_trace_produced(&mut self, trace: Arc<TransactionTrace>) -> TraceDisposition {
        self.cache_transaction_trace(trace)
    }

    /// Reconcile at a block boundary. Errors are logged and dropped.
    pub fn on_block_committed(&mut self, block_num: BlockNumber, block_time: Timestamp) -> Option<CommitSummary> {
        match self.commit_block(block_num, block_time) {
            Ok(summary) => Some(summary),
            Err(err) => {
                telemetry::pipeline_error("on_block_committed");
                error!(block_num, error = %err, "trx retry commit_block ERROR");
                None
            }
        }
    }

    /// Store a potentially relevant trace in the short lived cache so it can be
    /// matched if its block is committed.
    ///
    /// Never resolves a delivery handle: nothing is final before the commit.
    pub fn cache_transaction_trace(&mut self, trace: Arc<TransactionTrace>) -> TraceDisposition {
        match classify(&trace) {
            TraceClass::Ignored => TraceDisposition::Ignored,
            TraceClass::OnBlock => {
                self.onblock_trace.store(trace);
                TraceDisposition::OnBlock
            }
            TraceClass::FailedDeferred(deferred_id) => {
                self.record_if_tracked(&deferred_id, &trace);
                self.cached_traces.insert(deferred_id, trace);
                TraceDisposition::FailedDeferred { deferred_id }
            }
            TraceClass::Ordinary => {
                let tracked = self.record_if_tracked(&trace.id, &trace);
                self.cached_traces.insert(trace.id, trace);
                TraceDisposition::Cached { tracked }
            }
        }
    }

    fn record_if_tracked(&mut self, id: &TransactionId, trace: &Arc<TransactionTrace>) -> bool {
        if !self.tracked.contains(id) {
            return false;
        }
        let representation = render_trace(self.formatter.as_ref(), trace, self.config.abi_serializer_max_time());
        self.tracked.record_trace(id, Arc::clone(trace), representation)
    }

    /// Commit a block: deliver results for tracked transactions matched to
    /// `block_num`, expire overdue ones, and drop every cached trace.
    pub fn commit_block(&mut self, block_num: BlockNumber, block_time: Timestamp) -> RetryDbResult<CommitSummary> {
        let mut summary = Reconciler::new(
            &mut self.tracked,
            &self.cached_traces,
            self.formatter.as_ref(),
            self.config.abi_serializer_max_time(),
        )
        .run(block_num, block_time);

        // drop any unprocessed cached traces
        summary.cleared_traces = self.cached_traces.len();
        self.cached_traces.clear();
        self.onblock_trace.clear();
        self.head = Some(HeadBlock {
            block_num,
            timestamp: block_time,
        });

        telemetry::committed(summary.committed.len());
        telemetry::expired(summary.expired.len());
        telemetry::tracked(self.tracked.len());

        if summary.invariant_violations > 0 {
            return Err(RetryDbError::InvariantViolation(format!(
                "{} tracked transactions could not be resolved at block {}",
                summary.invariant_violations, block_num
            )));
        }
        self.tracked.check_consistency()?;

        if summary.cleared_traces > 0 {
            debug!(block_num, cleared = summary.cleared_traces, "dropped cached traces");
        }
        if block_num % 1000 == 0 {
            info!(
                block_num,
                tracked = self.tracked.len(),
                next_expiration = ?self.tracked.next_expiration(),
                "trx retry db checkpoint"
            );
        }
        Ok(summary)
    }
}
