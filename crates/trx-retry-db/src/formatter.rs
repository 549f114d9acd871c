use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use trx_retry_types::TransactionTrace;

use crate::error::FormatError;
use crate::telemetry;

/// Converts a raw trace into the caller-facing form returned by send-transaction
/// style APIs.
///
/// Implementations must honour `max_time` and fail with
/// [`FormatError::Deadline`] instead of running past it.
pub trait TraceFormatter: Send + Sync {
    fn format(&self, trace: &TransactionTrace, max_time: Duration) -> Result<Value, FormatError>;
}

/// What a tracked transaction will be answered with
#[derive(Debug, Clone, PartialEq)]
pub enum TraceRepresentation {
    Formatted(Value),
    /// Formatting failed; the unformatted trace is delivered instead
    Raw(Arc<TransactionTrace>),
}

impl TraceRepresentation {
    pub fn is_formatted(&self) -> bool {
        matches!(self, TraceRepresentation::Formatted(_))
    }
}

impl Serialize for TraceRepresentation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TraceRepresentation::Formatted(value) => value.serialize(serializer),
            TraceRepresentation::Raw(trace) => trace.as_ref().serialize(serializer),
        }
    }
}

/// Render `trace`, falling back to the raw trace when the formatter fails.
/// Never fails.
pub fn render_trace(
    formatter: &dyn TraceFormatter,
    trace: &Arc<TransactionTrace>,
    max_time: Duration,
) -> TraceRepresentation {
    match formatter.format(trace, max_time) {
        Ok(value) => TraceRepresentation::Formatted(value),
        Err(err) => {
            telemetry::format_fallback();
            warn!(trx = %trace.id.short_hex(), error = %err, "trace formatting failed, keeping raw trace");
            TraceRepresentation::Raw(Arc::clone(trace))
        }
    }
}

/// JSON formatter with a registry of known contract ABIs.
///
/// Action payloads of registered contracts are decoded into a `data` object and
/// the raw bytes are kept under `hex_data`. Payloads of unregistered contracts
/// stay hex encoded. A registered contract that does not declare the action, or a
/// payload that does not decode, is a schema mismatch.
#[derive(Debug, Clone, Default)]
pub struct JsonTraceFormatter {
    abis: HashMap<String, HashSet<String>>,
}

impl JsonTraceFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_abi<I, S>(mut self, account: impl Into<String>, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register_abi(account, actions);
        self
    }

    pub fn register_abi<I, S>(&mut self, account: impl Into<String>, actions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abis
            .entry(account.into())
            .or_default()
            .extend(actions.into_iter().map(Into::into));
    }

    pub fn has_abi(&self, account: &str) -> bool {
        self.abis.contains_key(account)
    }
}

impl TraceFormatter for JsonTraceFormatter {
    fn format(&self, trace: &TransactionTrace, max_time: Duration) -> Result<Value, FormatError> {
        let started = Instant::now();
        let mut rendered = serde_json::to_value(trace)?;

        for (index, act) in trace.action_traces.iter().enumerate() {
            if started.elapsed() > max_time {
                return Err(FormatError::Deadline { budget: max_time });
            }
            let Some(actions) = self.abis.get(&act.account) else {
                continue;
            };
            if !actions.contains(&act.name) {
                return Err(FormatError::SchemaMismatch(format!(
                    "action {}::{} not declared in abi",
                    act.account, act.name
                )));
            }
            let decoded: Value = serde_json::from_slice(&act.data).map_err(|e| {
                FormatError::SchemaMismatch(format!("{}::{} payload: {}", act.account, act.name, e))
            })?;
            if let Some(slot) = rendered
                .get_mut("action_traces")
                .and_then(|traces| traces.get_mut(index))
                .and_then(Value::as_object_mut)
            {
                let hex_data = slot.remove("data").unwrap_or(Value::Null);
                slot.insert("hex_data".into(), hex_data);
                slot.insert("data".into(), decoded);
            }
        }

        if started.elapsed() > max_time {
            return Err(FormatError::Deadline { budget: max_time });
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trx_retry_types::{ActionTrace, Timestamp, TransactionId};

    const BUDGET: Duration = Duration::from_secs(5);

    fn transfer_trace(payload: &[u8]) -> TransactionTrace {
        TransactionTrace::new(TransactionId::from_label("t"), 3, Timestamp::from_secs(30))
            .with_action(ActionTrace::new("token", "transfer", payload.to_vec()))
    }

    struct AlwaysFails;

    impl TraceFormatter for AlwaysFails {
        fn format(&self, _: &TransactionTrace, _: Duration) -> Result<Value, FormatError> {
            Err(FormatError::SchemaMismatch("no abi".into()))
        }
    }

    #[test]
    fn test_unregistered_contract_keeps_hex_payload() {
        let value = JsonTraceFormatter::new()
            .format(&transfer_trace(b"{\"qty\":1}"), BUDGET)
            .unwrap();
        assert_eq!(value["action_traces"][0]["data"], hex::encode(b"{\"qty\":1}"));
        assert!(value["action_traces"][0].get("hex_data").is_none());
    }

    #[test]
    fn test_registered_contract_decodes_payload() {
        let formatter = JsonTraceFormatter::new().with_abi("token", ["transfer"]);
        assert!(formatter.has_abi("token"));
        assert!(!formatter.has_abi("sys"));
        let value = formatter.format(&transfer_trace(b"{\"qty\":1}"), BUDGET).unwrap();
        assert_eq!(value["action_traces"][0]["data"]["qty"], 1);
        assert_eq!(value["action_traces"][0]["hex_data"], hex::encode(b"{\"qty\":1}"));
    }

    #[test]
    fn test_undeclared_action_is_schema_mismatch() {
        let formatter = JsonTraceFormatter::new().with_abi("token", ["issue"]);
        let err = formatter.format(&transfer_trace(b"{}"), BUDGET).unwrap_err();
        assert!(matches!(err, FormatError::SchemaMismatch(_)));
    }

    #[test]
    fn test_undecodable_payload_is_schema_mismatch() {
        let formatter = JsonTraceFormatter::new().with_abi("token", ["transfer"]);
        let err = formatter.format(&transfer_trace(&[0xff, 0x00]), BUDGET).unwrap_err();
        assert!(matches!(err, FormatError::SchemaMismatch(_)));
    }

    #[test]
    fn test_render_falls_back_to_raw() {
        let trace = Arc::new(transfer_trace(b"{}"));
        match render_trace(&AlwaysFails, &trace, BUDGET) {
            TraceRepresentation::Raw(raw) => assert!(Arc::ptr_eq(&raw, &trace)),
            other => panic!("expected raw fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_representation_serializes_as_trace() {
        let trace = Arc::new(transfer_trace(b"{}"));
        let raw = serde_json::to_value(TraceRepresentation::Raw(Arc::clone(&trace))).unwrap();
        assert_eq!(raw, serde_json::to_value(&*trace).unwrap());
    }
}
