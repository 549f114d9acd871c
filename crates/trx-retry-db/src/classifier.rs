use serde::Serialize;
use trx_retry_types::{TransactionId, TransactionTrace};

/// Where an incoming trace belongs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceClass {
    /// No receipt, or a status that can never be part of a block
    Ignored,
    /// Implicit block-closing transaction
    OnBlock,
    /// Error handler for a failed deferred transaction; cached under the
    /// deferred transaction's id
    FailedDeferred(TransactionId),
    Ordinary,
}

/// Classify one trace from the apply pipeline.
///
/// Soft-failed traces are kept because their error handler (and anything it
/// sends inline) is still part of the block.
pub fn classify(trace: &TransactionTrace) -> TraceClass {
    match trace.status() {
        Some(status) if status.is_accepted() => {}
        _ => return TraceClass::Ignored,
    }
    if trace.is_onblock() {
        TraceClass::OnBlock
    } else if let Some(failed) = trace.failed_dtrx_trace.as_deref() {
        TraceClass::FailedDeferred(failed.id)
    } else {
        TraceClass::Ordinary
    }
}

/// What the tracker did with a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum TraceDisposition {
    Ignored,
    OnBlock,
    FailedDeferred { deferred_id: TransactionId },
    Cached { tracked: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use trx_retry_types::{ReceiptStatus, Timestamp};

    fn trace(label: &str) -> TransactionTrace {
        TransactionTrace::new(TransactionId::from_label(label), 1, Timestamp::from_secs(10))
    }

    #[test]
    fn test_rejected_statuses_are_ignored() {
        for status in [ReceiptStatus::HardFail, ReceiptStatus::Delayed, ReceiptStatus::Expired] {
            assert_eq!(classify(&trace("a").with_status(status)), TraceClass::Ignored);
        }
        assert_eq!(classify(&trace("a").without_receipt()), TraceClass::Ignored);
    }

    #[test]
    fn test_soft_fail_is_kept() {
        assert_eq!(classify(&trace("a").with_status(ReceiptStatus::SoftFail)), TraceClass::Ordinary);
    }

    #[test]
    fn test_onblock_before_failed_deferred() {
        let onblock = TransactionTrace::onblock(1, Timestamp::from_secs(10)).with_failed_dtrx(trace("d"));
        assert_eq!(classify(&onblock), TraceClass::OnBlock);
    }

    #[test]
    fn test_failed_deferred_keyed_by_deferred_id() {
        let wrapper = trace("onerror").with_failed_dtrx(trace("deferred"));
        assert_eq!(
            classify(&wrapper),
            TraceClass::FailedDeferred(TransactionId::from_label("deferred"))
        );
    }

    #[test]
    fn test_hard_failed_onblock_is_ignored() {
        let onblock = TransactionTrace::onblock(1, Timestamp::from_secs(10)).with_status(ReceiptStatus::HardFail);
        assert_eq!(classify(&onblock), TraceClass::Ignored);
    }
}
