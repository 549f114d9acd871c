// Block-commit reconciliation
//
// Runs once per committed block after every trace of that block went through
// the classifier. A tracked entry commits when its last-known block number is
// the committed block, wherever that trace came from; everything speculative
// still in the cache is discarded by the caller afterwards.
//
// ORDER:
// 1. Catch up tracked entries whose latest trace is only in the cache
// 2. Deliver `Committed` for every entry filed under this block
// 3. Deliver `Expired` for entries whose expiration <= block time
// 4. (caller) clear the trace cache and on-block slot

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use trx_retry_types::{BlockNumber, Timestamp, TransactionId};

use crate::delivery::TrackOutcome;
use crate::formatter::{render_trace, TraceFormatter};
use crate::trace_cache::TraceCache;
use crate::tracked_index::{TrackedIndex, TrackedTransaction};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub block_num: BlockNumber,
    pub block_time: Timestamp,
    pub committed: Vec<TransactionId>,
    pub expired: Vec<TransactionId>,
    /// Cached traces discarded at the boundary
    pub cleared_traces: usize,
    /// Handles that could not be resolved; always zero unless the index is broken
    pub invariant_violations: usize,
}

pub struct Reconciler<'a> {
    tracked: &'a mut TrackedIndex,
    cache: &'a TraceCache,
    formatter: &'a dyn TraceFormatter,
    max_time: Duration,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        tracked: &'a mut TrackedIndex,
        cache: &'a TraceCache,
        formatter: &'a dyn TraceFormatter,
        max_time: Duration,
    ) -> Self {
        Self {
            tracked,
            cache,
            formatter,
            max_time,
        }
    }

    pub fn run(mut self, block_num: BlockNumber, block_time: Timestamp) -> CommitSummary {
        let mut summary = CommitSummary {
            block_num,
            block_time,
            ..CommitSummary::default()
        };

        self.catch_up(block_num);

        for entry in self.tracked.take_block(block_num) {
            let id = entry.id();
            if Self::finalize(entry, block_num) {
                summary.committed.push(id);
            } else {
                summary.invariant_violations += 1;
            }
        }

        for entry in self.tracked.sweep_expired(block_time) {
            let id = entry.id();
            if Self::expire(entry) {
                summary.expired.push(id);
            } else {
                summary.invariant_violations += 1;
            }
        }

        if !summary.committed.is_empty() || !summary.expired.is_empty() {
            info!(
                block_num,
                committed = summary.committed.len(),
                expired = summary.expired.len(),
                remaining = self.tracked.len(),
                "reconciled tracked transactions"
            );
        }
        summary
    }

    /// Bring tracked entries up to date with cached traces of this block.
    ///
    /// Ordinary traces were applied by the classifier already. This covers
    /// transactions tracked after they executed and any entry whose recorded
    /// trace is older than the cached one.
    fn catch_up(&mut self, block_num: BlockNumber) {
        let cache = self.cache;
        for (id, trace) in cache.iter() {
            if trace.block_num != block_num {
                continue;
            }
            let Some(entry) = self.tracked.find(id) else {
                continue;
            };
            if entry.is_rendered_from(trace) {
                continue;
            }
            debug!(trx = %id.short_hex(), block_num, "adopting cached trace at commit");
            let representation = render_trace(self.formatter, trace, self.max_time);
            self.tracked.record_trace(id, Arc::clone(trace), representation);
        }
    }

    fn finalize(entry: TrackedTransaction, block_num: BlockNumber) -> bool {
        let id = entry.id();
        let (trace, mut handle) = entry.into_parts();
        let Some(trace) = trace else {
            error!(trx = %id, block_num, "matched transaction has no trace");
            return false;
        };
        match handle.resolve(TrackOutcome::Committed { block_num, trace }) {
            Ok(()) => true,
            Err(err) => {
                error!(trx = %id, block_num, error = %err, "failed to deliver committed outcome");
                false
            }
        }
    }

    fn expire(mut entry: TrackedTransaction) -> bool {
        let outcome = TrackOutcome::Expired {
            id: entry.id(),
            expiration: entry.expiration(),
        };
        match entry.handle_mut().resolve(outcome) {
            Ok(()) => {
                debug!(trx = %entry.id().short_hex(), expiration = %entry.expiration(), "tracked transaction expired");
                true
            }
            Err(err) => {
                error!(trx = %entry.id(), error = %err, "failed to deliver expired outcome");
                false
            }
        }
    }
}
