// Tracked transaction index
//
// Every transaction the node has promised to answer lives here until it is
// either committed or expired.
//
// INVARIANTS:
// 1. At most one entry per transaction id
// 2. `by_id` and `by_expiry` always hold exactly the same set of entries
// 3. `by_block` holds exactly the entries that carry a provisional trace,
//    filed under their last-known block number
// 4. Expiry keys never change after insertion (only block number and the
//    provisional trace are mutable)
// 5. All mutation goes through `track`, `record_trace`, `remove`,
//    `take_block` and `sweep_expired`

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::error;
use trx_retry_types::{BlockNumber, Timestamp, TransactionId, TransactionTrace};

use crate::delivery::DeliveryHandle;
use crate::error::{RetryDbError, RetryDbResult};
use crate::formatter::TraceRepresentation;

/// Position in the by-expiry index. The insertion sequence breaks ties so
/// transactions sharing an expiration keep their tracking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct ExpiryKey {
    expiration: Timestamp,
    seq: u64,
}

#[derive(Debug)]
pub struct TrackedTransaction {
    id: TransactionId,
    expiration: Timestamp,
    seq: u64,
    block_num: BlockNumber,
    trace: Option<TraceRepresentation>,
    /// Raw trace `trace` was rendered from
    source: Option<Arc<TransactionTrace>>,
    handle: DeliveryHandle,
}

impl TrackedTransaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn expiration(&self) -> Timestamp {
        self.expiration
    }

    /// Block of the most recent matching trace, 0 if never matched
    pub fn block_num(&self) -> BlockNumber {
        self.block_num
    }

    /// Provisional until the block it came from is committed
    pub fn trace(&self) -> Option<&TraceRepresentation> {
        self.trace.as_ref()
    }

    /// True if the provisional trace was rendered from exactly `source`
    pub fn is_rendered_from(&self, source: &Arc<TransactionTrace>) -> bool {
        self.source.as_ref().is_some_and(|recorded| Arc::ptr_eq(recorded, source))
    }

    pub(crate) fn handle_mut(&mut self) -> &mut DeliveryHandle {
        &mut self.handle
    }

    pub(crate) fn into_parts(self) -> (Option<TraceRepresentation>, DeliveryHandle) {
        (self.trace, self.handle)
    }

    fn expiry_key(&self) -> ExpiryKey {
        ExpiryKey {
            expiration: self.expiration,
            seq: self.seq,
        }
    }

    pub fn status(&self) -> TrackedStatus {
        TrackedStatus {
            id: self.id,
            expiration: self.expiration,
            block_num: self.block_num,
            trace: self.trace.clone(),
        }
    }
}

/// Snapshot of a tracked transaction for readers outside the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedStatus {
    pub id: TransactionId,
    pub expiration: Timestamp,
    pub block_num: BlockNumber,
    pub trace: Option<TraceRepresentation>,
}

#[derive(Debug, Default)]
pub struct TrackedIndex {
    by_id: HashMap<TransactionId, TrackedTransaction>,
    by_expiry: BTreeMap<ExpiryKey, TransactionId>,
    by_block: BTreeMap<BlockNumber, BTreeSet<TransactionId>>,
    next_seq: u64,
}

impl TrackedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, id: TransactionId, expiration: Timestamp, handle: DeliveryHandle) -> RetryDbResult<()> {
        if self.by_id.contains_key(&id) {
            return Err(RetryDbError::DuplicateTracking(id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let entry = TrackedTransaction {
            id,
            expiration,
            seq,
            block_num: 0,
            trace: None,
            source: None,
            handle,
        };
        self.by_expiry.insert(entry.expiry_key(), id);
        self.by_id.insert(id, entry);
        Ok(())
    }

    pub fn find(&self, id: &TransactionId) -> Option<&TrackedTransaction> {
        self.by_id.get(id)
    }

    /// Replace the provisional result of `id` with a newer execution. The
    /// block number is taken from `source`. Returns false if `id` is not
    /// tracked.
    pub fn record_trace(
        &mut self,
        id: &TransactionId,
        source: Arc<TransactionTrace>,
        trace: TraceRepresentation,
    ) -> bool {
        let Some(entry) = self.by_id.get_mut(id) else {
            return false;
        };
        let previous = entry.trace.as_ref().map(|_| entry.block_num);
        entry.block_num = source.block_num;
        entry.trace = Some(trace);
        entry.source = Some(source);
        let block_num = entry.block_num;

        if let Some(previous) = previous {
            Self::unfile(&mut self.by_block, previous, id);
        }
        self.by_block.entry(block_num).or_default().insert(*id);
        true
    }

    /// Remove and return every entry whose provisional trace belongs to
    /// `block_num`, ordered by id.
    pub fn take_block(&mut self, block_num: BlockNumber) -> Vec<TrackedTransaction> {
        let Some(ids) = self.by_block.remove(&block_num) else {
            return Vec::new();
        };
        let mut taken = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entry) = self.by_id.remove(&id) else {
                error!(trx = %id, block_num, "tracked index desync: block entry without transaction");
                continue;
            };
            if self.by_expiry.remove(&entry.expiry_key()).is_none() {
                error!(trx = %id, "tracked index desync: entry missing from expiry index");
            }
            taken.push(entry);
        }
        taken
    }

    #[cfg(test)]
    pub(crate) fn handle_mut(&mut self, id: &TransactionId) -> Option<&mut DeliveryHandle> {
        self.by_id.get_mut(id).map(TrackedTransaction::handle_mut)
    }

    fn unfile(by_block: &mut BTreeMap<BlockNumber, BTreeSet<TransactionId>>, block_num: BlockNumber, id: &TransactionId) {
        if let Some(ids) = by_block.get_mut(&block_num) {
            ids.remove(id);
            if ids.is_empty() {
                by_block.remove(&block_num);
            }
        }
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn remove(&mut self, id: &TransactionId) -> Option<TrackedTransaction> {
        let entry = self.by_id.remove(id)?;
        if self.by_expiry.remove(&entry.expiry_key()).is_none() {
            error!(trx = %id, "tracked index desync: entry missing from expiry index");
        }
        if entry.trace.is_some() {
            Self::unfile(&mut self.by_block, entry.block_num, id);
        }
        Some(entry)
    }

    /// Remove and return every entry with `expiration <= now`, earliest first.
    ///
    /// Only the expired prefix of the expiry index is visited.
    pub fn sweep_expired(&mut self, now: Timestamp) -> Vec<TrackedTransaction> {
        let mut expired = Vec::new();
        while let Some(first) = self.by_expiry.first_entry() {
            if first.key().expiration > now {
                break;
            }
            let id = first.remove();
            match self.by_id.remove(&id) {
                Some(entry) => {
                    if entry.trace.is_some() {
                        Self::unfile(&mut self.by_block, entry.block_num, &id);
                    }
                    expired.push(entry);
                }
                None => error!(trx = %id, "tracked index desync: expiry entry without transaction"),
            }
        }
        expired
    }

    /// Earliest expiration currently tracked
    pub fn next_expiration(&self) -> Option<Timestamp> {
        self.by_expiry.keys().next().map(|key| key.expiration)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Verify all views hold exactly the same entries
    pub fn check_consistency(&self) -> RetryDbResult<()> {
        if self.by_id.len() != self.by_expiry.len() {
            return Err(RetryDbError::InvariantViolation(format!(
                "tracked index sizes differ: {} by id, {} by expiry",
                self.by_id.len(),
                self.by_expiry.len()
            )));
        }
        for (key, id) in &self.by_expiry {
            match self.by_id.get(id) {
                Some(entry) if entry.expiry_key() == *key => {}
                Some(_) => {
                    return Err(RetryDbError::InvariantViolation(format!(
                        "expiry key of {} does not match its entry",
                        id
                    )))
                }
                None => {
                    return Err(RetryDbError::InvariantViolation(format!(
                        "{} in expiry index but not tracked",
                        id
                    )))
                }
            }
        }
        let filed: usize = self.by_block.values().map(BTreeSet::len).sum();
        let with_trace = self.by_id.values().filter(|entry| entry.trace.is_some()).count();
        if filed != with_trace {
            return Err(RetryDbError::InvariantViolation(format!(
                "block index holds {} entries, {} tracked transactions have a trace",
                filed, with_trace
            )));
        }
        for (block_num, ids) in &self.by_block {
            for id in ids {
                match self.by_id.get(id) {
                    Some(entry) if entry.trace.is_some() && entry.block_num == *block_num => {}
                    _ => {
                        return Err(RetryDbError::InvariantViolation(format!(
                            "{} filed under block {} does not match its entry",
                            id, block_num
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(label: &str) -> TransactionId {
        TransactionId::from_label(label)
    }

    fn track(index: &mut TrackedIndex, label: &str, expiration: u64) -> RetryDbResult<()> {
        let (handle, _rx) = DeliveryHandle::channel();
        index.track(id(label), Timestamp::from_secs(expiration), handle)
    }

    #[test]
    fn test_duplicate_tracking_rejected() {
        let mut index = TrackedIndex::new();
        track(&mut index, "a", 10).unwrap();
        assert_eq!(track(&mut index, "a", 20), Err(RetryDbError::DuplicateTracking(id("a"))));
        assert_eq!(index.len(), 1);
        assert_eq!(index.find(&id("a")).unwrap().expiration(), Timestamp::from_secs(10));
    }

    #[test]
    fn test_retrack_after_remove() {
        let mut index = TrackedIndex::new();
        track(&mut index, "a", 10).unwrap();
        assert!(index.remove(&id("a")).is_some());
        assert!(index.remove(&id("a")).is_none());
        track(&mut index, "a", 30).unwrap();
        assert_eq!(index.len(), 1);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_sweep_is_ordered_prefix() {
        let mut index = TrackedIndex::new();
        track(&mut index, "late", 50).unwrap();
        track(&mut index, "early", 10).unwrap();
        track(&mut index, "edge", 20).unwrap();
        track(&mut index, "tie", 10).unwrap();

        let expired: Vec<_> = index
            .sweep_expired(Timestamp::from_secs(20))
            .into_iter()
            .map(|t| t.id())
            .collect();
        assert_eq!(expired, vec![id("early"), id("tie"), id("edge")]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.next_expiration(), Some(Timestamp::from_secs(50)));
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_sweep_nothing_expired() {
        let mut index = TrackedIndex::new();
        track(&mut index, "a", 100).unwrap();
        assert!(index.sweep_expired(Timestamp::from_secs(99)).is_empty());
        assert_eq!(index.len(), 1);
    }

    fn source(label: &str, block_num: BlockNumber) -> Arc<TransactionTrace> {
        Arc::new(TransactionTrace::new(id(label), block_num, Timestamp::from_secs(block_num as u64)))
    }

    fn formatted(v: u64) -> TraceRepresentation {
        TraceRepresentation::Formatted(serde_json::json!({ "v": v }))
    }

    #[test]
    fn test_record_trace_overwrites() {
        let mut index = TrackedIndex::new();
        track(&mut index, "a", 100).unwrap();
        let entry = index.find(&id("a")).unwrap();
        assert_eq!(entry.block_num(), 0);
        assert!(entry.trace().is_none());

        let first = source("a", 4);
        let second = source("a", 5);
        assert!(index.record_trace(&id("a"), Arc::clone(&first), formatted(1)));
        assert!(index.record_trace(&id("a"), Arc::clone(&second), formatted(2)));
        assert!(!index.record_trace(&id("nobody"), source("nobody", 5), formatted(3)));

        let entry = index.find(&id("a")).unwrap();
        assert!(entry.is_rendered_from(&second));
        assert!(!entry.is_rendered_from(&first));
        let status = entry.status();
        assert_eq!(status.block_num, 5);
        assert_eq!(status.trace, Some(formatted(2)));
        assert!(index.take_block(4).is_empty());
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_take_block_returns_only_entries_of_that_block() {
        let mut index = TrackedIndex::new();
        for label in ["b", "a", "later", "untraced"] {
            track(&mut index, label, 100).unwrap();
        }
        index.record_trace(&id("a"), source("a", 7), formatted(1));
        index.record_trace(&id("b"), source("b", 7), formatted(1));
        index.record_trace(&id("later"), source("later", 8), formatted(1));

        let mut expected = vec![id("a"), id("b")];
        expected.sort();
        let taken: Vec<_> = index.take_block(7).into_iter().map(|t| t.id()).collect();
        assert_eq!(taken, expected);
        assert_eq!(index.len(), 2);
        assert!(index.take_block(7).is_empty());
        index.check_consistency().unwrap();

        assert_eq!(index.take_block(8).len(), 1);
        assert!(index.contains(&id("untraced")));
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_remove_and_sweep_unfile_traced_entries() {
        let mut index = TrackedIndex::new();
        track(&mut index, "gone", 100).unwrap();
        track(&mut index, "old", 10).unwrap();
        index.record_trace(&id("gone"), source("gone", 3), formatted(1));
        index.record_trace(&id("old"), source("old", 3), formatted(1));

        assert!(index.remove(&id("gone")).is_some());
        assert_eq!(index.sweep_expired(Timestamp::from_secs(10)).len(), 1);
        index.check_consistency().unwrap();
        assert!(index.take_block(3).is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Track(u8, u64),
        Remove(u8),
        Record(u8, u32),
        Take(u32),
        Sweep(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..16, 0u64..100).prop_map(|(i, e)| Op::Track(i, e)),
            (0u8..16).prop_map(Op::Remove),
            (0u8..16, 0u32..4).prop_map(|(i, b)| Op::Record(i, b)),
            (0u32..4).prop_map(Op::Take),
            (0u64..100).prop_map(Op::Sweep),
        ]
    }

    proptest! {
        #[test]
        fn prop_views_stay_consistent(ops in proptest::collection::vec(op(), 0..64)) {
            let mut index = TrackedIndex::new();
            let mut model: HashMap<u8, u64> = HashMap::new();
            let mut blocks: HashMap<u8, u32> = HashMap::new();
            for op in ops {
                match op {
                    Op::Track(i, e) => {
                        let result = track(&mut index, &i.to_string(), e);
                        prop_assert_eq!(result.is_ok(), !model.contains_key(&i));
                        model.entry(i).or_insert(e);
                    }
                    Op::Remove(i) => {
                        prop_assert_eq!(index.remove(&id(&i.to_string())).is_some(), model.remove(&i).is_some());
                        blocks.remove(&i);
                    }
                    Op::Record(i, b) => {
                        let label = i.to_string();
                        let recorded = index.record_trace(&id(&label), source(&label, b), formatted(b as u64));
                        prop_assert_eq!(recorded, model.contains_key(&i));
                        if recorded {
                            blocks.insert(i, b);
                        }
                    }
                    Op::Take(b) => {
                        let taken = index.take_block(b);
                        let expected: Vec<u8> = blocks.iter().filter(|(_, blk)| **blk == b).map(|(i, _)| *i).collect();
                        prop_assert_eq!(taken.len(), expected.len());
                        for i in expected {
                            model.remove(&i);
                            blocks.remove(&i);
                        }
                    }
                    Op::Sweep(now) => {
                        let swept = index.sweep_expired(Timestamp::from_secs(now));
                        let mut last = Timestamp::EPOCH;
                        for entry in &swept {
                            prop_assert!(entry.expiration() <= Timestamp::from_secs(now));
                            prop_assert!(entry.expiration() >= last);
                            last = entry.expiration();
                        }
                        let before = model.len();
                        model.retain(|_, exp| *exp > now);
                        blocks.retain(|i, _| model.contains_key(i));
                        prop_assert_eq!(swept.len(), before - model.len());
                    }
                }
                prop_assert!(index.check_consistency().is_ok());
                prop_assert_eq!(index.len(), model.len());
            }
        }
    }
}
