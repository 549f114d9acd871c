// Execution traces as produced by the block producer's apply pipeline.
//
// A trace is the record of one application attempt of a transaction. The same
// transaction id may be traced several times before a block is committed
// (speculative execution, re-ordering, retries).

use serde::{Deserialize, Serialize};

use crate::block::{BlockNumber, Timestamp};
use crate::transaction::{ReceiptStatus, TransactionId, TransactionReceipt};

/// Account that owns the implicit block-closing action
pub const SYSTEM_ACCOUNT: &str = "sys";

/// Name of the implicit block-closing action
pub const ONBLOCK_ACTION: &str = "onblock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTrace {
    pub receiver: String,
    pub account: String,
    pub name: String,
    /// Packed action payload; decoding requires the contract's ABI
    #[serde(with = "hex")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub console: String,
}

impl ActionTrace {
    pub fn new(account: impl Into<String>, name: impl Into<String>, data: Vec<u8>) -> Self {
        let account = account.into();
        Self {
            receiver: account.clone(),
            account,
            name: name.into(),
            data,
            console: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTrace {
    pub id: TransactionId,
    pub block_num: BlockNumber,
    pub block_time: Timestamp,
    /// Absent when the transaction never produced a receipt (e.g. it was rejected
    /// before being applied)
    pub receipt: Option<TransactionReceipt>,
    pub elapsed_us: u64,
    pub net_usage: u64,
    pub scheduled: bool,
    pub action_traces: Vec<ActionTrace>,
    pub except: Option<String>,
    /// Set when this trace is the error handler run for a failed deferred transaction
    pub failed_dtrx_trace: Option<Box<TransactionTrace>>,
}

impl TransactionTrace {
    /// Trace of an executed transaction without actions
    pub fn new(id: TransactionId, block_num: BlockNumber, block_time: Timestamp) -> Self {
        Self {
            id,
            block_num,
            block_time,
            receipt: Some(TransactionReceipt::new(ReceiptStatus::Executed)),
            elapsed_us: 0,
            net_usage: 0,
            scheduled: false,
            action_traces: Vec::new(),
            except: None,
            failed_dtrx_trace: None,
        }
    }

    /// Trace of the implicit block-closing transaction for `block_num`
    pub fn onblock(block_num: BlockNumber, block_time: Timestamp) -> Self {
        let id = TransactionId::compute(format!("{}:{}", ONBLOCK_ACTION, block_num).as_bytes());
        Self::new(id, block_num, block_time)
            .with_action(ActionTrace::new(SYSTEM_ACCOUNT, ONBLOCK_ACTION, block_num.to_le_bytes().to_vec()))
    }

    pub fn with_status(mut self, status: ReceiptStatus) -> Self {
        match self.receipt.as_mut() {
            Some(receipt) => receipt.status = status,
            None => self.receipt = Some(TransactionReceipt::new(status)),
        }
        self
    }

    pub fn without_receipt(mut self) -> Self {
        self.receipt = None;
        self
    }

    pub fn with_action(mut self, action: ActionTrace) -> Self {
        self.action_traces.push(action);
        self
    }

    pub fn with_failed_dtrx(mut self, failed: TransactionTrace) -> Self {
        self.failed_dtrx_trace = Some(Box::new(failed));
        self
    }

    pub fn with_except(mut self, except: impl Into<String>) -> Self {
        self.except = Some(except.into());
        self
    }

    pub fn status(&self) -> Option<ReceiptStatus> {
        self.receipt.as_ref().map(|r| r.status)
    }

    /// Block-closing traces carry exactly the system `onblock` action as their
    /// first action.
    pub fn is_onblock(&self) -> bool {
        match self.action_traces.first() {
            Some(act) => act.account == SYSTEM_ACCOUNT && act.name == ONBLOCK_ACTION,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onblock_detection() {
        let trace = TransactionTrace::onblock(7, Timestamp::from_secs(70));
        assert!(trace.is_onblock());
        assert_eq!(trace.status(), Some(ReceiptStatus::Executed));

        let ordinary = TransactionTrace::new(TransactionId::from_label("x"), 7, Timestamp::from_secs(70))
            .with_action(ActionTrace::new("token", "transfer", vec![]));
        assert!(!ordinary.is_onblock());
        assert!(!TransactionTrace::new(TransactionId::from_label("y"), 1, Timestamp::EPOCH).is_onblock());
    }

    #[test]
    fn test_onblock_ids_differ_per_block() {
        let a = TransactionTrace::onblock(1, Timestamp::EPOCH);
        let b = TransactionTrace::onblock(2, Timestamp::EPOCH);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_with_status_creates_missing_receipt() {
        let trace = TransactionTrace::new(TransactionId::from_label("z"), 1, Timestamp::EPOCH)
            .without_receipt()
            .with_status(ReceiptStatus::SoftFail);
        assert_eq!(trace.status(), Some(ReceiptStatus::SoftFail));
    }

    #[test]
    fn test_action_data_serializes_as_hex() {
        let act = ActionTrace::new("token", "transfer", vec![0x01, 0xff]);
        let value = serde_json::to_value(&act).unwrap();
        assert_eq!(value["data"], "01ff");
        let back: ActionTrace = serde_json::from_value(value).unwrap();
        assert_eq!(back, act);
    }
}
