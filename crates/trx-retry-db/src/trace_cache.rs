use std::collections::HashMap;
use std::sync::Arc;
use trx_retry_types::{TransactionId, TransactionTrace};

/// Short lived cache of traces from the block currently being built.
///
/// Emptied at every block commit; nothing in here outlives the block it was
/// produced in.
#[derive(Debug, Default)]
pub struct TraceCache {
    traces: HashMap<TransactionId, Arc<TransactionTrace>>,
}

impl TraceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns the trace it replaced
    pub fn insert(&mut self, id: TransactionId, trace: Arc<TransactionTrace>) -> Option<Arc<TransactionTrace>> {
        self.traces.insert(id, trace)
    }

    pub fn get(&self, id: &TransactionId) -> Option<&Arc<TransactionTrace>> {
        self.traces.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TransactionId, &Arc<TransactionTrace>)> {
        self.traces.iter()
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn clear(&mut self) {
        self.traces.clear();
    }
}

/// Holds the trace of the implicit block-closing transaction. Last write wins.
#[derive(Debug, Default)]
pub struct OnBlockSlot {
    trace: Option<Arc<TransactionTrace>>,
}

impl OnBlockSlot {
    pub fn store(&mut self, trace: Arc<TransactionTrace>) {
        self.trace = Some(trace);
    }

    pub fn get(&self) -> Option<&Arc<TransactionTrace>> {
        self.trace.as_ref()
    }

    pub fn take(&mut self) -> Option<Arc<TransactionTrace>> {
        self.trace.take()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.is_none()
    }

    pub fn clear(&mut self) {
        self.trace = None;
    }
}
