//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; without an installed recorder
//! every call is a no-op.

pub const TRACKED: &str = "trx_retry_tracked";
pub const COMMITTED_TOTAL: &str = "trx_retry_committed_total";
pub const EXPIRED_TOTAL: &str = "trx_retry_expired_total";
pub const FORMAT_FALLBACK_TOTAL: &str = "trx_retry_format_fallback_total";
pub const PIPELINE_ERRORS_TOTAL: &str = "trx_retry_pipeline_errors_total";

pub(crate) fn tracked(count: usize) {
    ::metrics::gauge!(TRACKED, count as f64);
}

pub(crate) fn committed(count: usize) {
    if count > 0 {
        ::metrics::counter!(COMMITTED_TOTAL, count as u64);
    }
}

pub(crate) fn expired(count: usize) {
    if count > 0 {
        ::metrics::counter!(EXPIRED_TOTAL, count as u64);
    }
}

pub(crate) fn format_fallback() {
    ::metrics::increment_counter!(FORMAT_FALLBACK_TOTAL);
}

pub(crate) fn pipeline_error(entry_point: &'static str) {
    ::metrics::increment_counter!(PIPELINE_ERRORS_TOTAL, "entry_point" => entry_point);
}
