// === Transaction retry tracking ===
//
// Remembers every transaction the node promised to answer, caches speculative
// execution traces for the block being built, and reconciles the two whenever a
// block is committed.
pub mod classifier;
pub mod config;
pub mod delivery;
pub mod error;
pub mod formatter;
pub mod reconciler;
pub mod retry_db;
pub mod shared;
pub mod telemetry;
pub mod trace_cache;
pub mod tracked_index;

// === Re-exports ===
pub use classifier::{classify, TraceClass, TraceDisposition};
pub use config::RetryDbConfig;
pub use delivery::{DeliveryHandle, TrackOutcome, TrackReceiver};
pub use error::{FormatError, RetryDbError, RetryDbResult};
pub use formatter::{render_trace, JsonTraceFormatter, TraceFormatter, TraceRepresentation};
pub use reconciler::CommitSummary;
pub use retry_db::TrxRetryDb;
pub use shared::SharedRetryDb;
pub use tracked_index::{TrackedIndex, TrackedStatus, TrackedTransaction};
pub use trace_cache::{OnBlockSlot, TraceCache};
