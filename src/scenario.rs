// Scripted replay of apply-pipeline events.
//
// Stands in for the block producer and the API layer: a scenario lists client
// submissions, execution traces and block commits in the order the node would
// observe them. Each accepted submission gets a client task that waits on its
// receiver, the way an API handler would.

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trx_retry_db::{
    CommitSummary, JsonTraceFormatter, RetryDbConfig, SharedRetryDb, TrackOutcome, TrxRetryDb,
};
use trx_retry_types::{
    ActionTrace, BlockNumber, HeadBlock, ReceiptStatus, Timestamp, TransactionId, TransactionTrace,
};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("invalid timestamp {value:?}: {source}")]
    InvalidTime {
        value: String,
        source: chrono::ParseError,
    },

    #[error("invalid hex payload for {account}::{name}: {source}")]
    InvalidHex {
        account: String,
        name: String,
        source: hex::FromHexError,
    },

    #[error("invalid json payload for {account}::{name}: {source}")]
    InvalidJson {
        account: String,
        name: String,
        source: serde_json::Error,
    },
}

/// Seconds since the epoch, or an RFC 3339 string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScenarioTime {
    Secs(u64),
    Rfc3339(String),
}

impl ScenarioTime {
    pub fn resolve(&self) -> Result<Timestamp, ScenarioError> {
        match self {
            ScenarioTime::Secs(secs) => Ok(Timestamp::from_secs(*secs)),
            ScenarioTime::Rfc3339(value) => DateTime::parse_from_rfc3339(value)
                .map(|dt| Timestamp::from_datetime(dt.into()))
                .map_err(|source| ScenarioError::InvalidTime {
                    value: value.clone(),
                    source,
                }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioAction {
    pub account: String,
    pub name: String,
    /// Payload given as JSON, packed as its JSON bytes
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Payload given as raw hex; takes precedence over `data`
    #[serde(default)]
    pub hex_data: Option<String>,
}

impl ScenarioAction {
    fn to_action(&self) -> Result<ActionTrace, ScenarioError> {
        let data = match (&self.hex_data, &self.data) {
            (Some(hex_data), _) => hex::decode(hex_data).map_err(|source| ScenarioError::InvalidHex {
                account: self.account.clone(),
                name: self.name.clone(),
                source,
            })?,
            (None, Some(value)) => serde_json::to_vec(value).map_err(|source| ScenarioError::InvalidJson {
                account: self.account.clone(),
                name: self.name.clone(),
                source,
            })?,
            (None, None) => Vec::new(),
        };
        Ok(ActionTrace::new(self.account.clone(), self.name.clone(), data))
    }
}

fn default_status() -> ReceiptStatus {
    ReceiptStatus::Executed
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceStep {
    pub id: String,
    pub block_num: BlockNumber,
    /// Defaults to the head block time
    #[serde(default)]
    pub block_time: Option<ScenarioTime>,
    #[serde(default = "default_status")]
    pub status: ReceiptStatus,
    #[serde(default)]
    pub onblock: bool,
    /// Id of the deferred transaction this trace reports a failure for
    #[serde(default)]
    pub failed_dtrx: Option<String>,
    #[serde(default)]
    pub except: Option<String>,
    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
}

impl TraceStep {
    fn to_trace(&self, head: Option<HeadBlock>) -> Result<TransactionTrace, ScenarioError> {
        let block_time = match &self.block_time {
            Some(time) => time.resolve()?,
            None => head.map(|head| head.timestamp).unwrap_or(Timestamp::EPOCH),
        };

        let mut trace = if self.onblock {
            TransactionTrace::onblock(self.block_num, block_time)
        } else {
            TransactionTrace::new(resolve_id(&self.id), self.block_num, block_time)
        };
        trace = trace.with_status(self.status);
        for action in &self.actions {
            trace = trace.with_action(action.to_action()?);
        }
        if let Some(except) = &self.except {
            trace = trace.with_except(except.clone());
        }
        if let Some(deferred) = &self.failed_dtrx {
            trace = trace.with_failed_dtrx(
                TransactionTrace::new(resolve_id(deferred), self.block_num, block_time)
                    .with_status(ReceiptStatus::HardFail),
            );
        }
        Ok(trace)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Client submission accepted for tracking
    Track { id: String, expiration: ScenarioTime },
    /// Client withdrew before an outcome
    Cancel { id: String },
    /// One application attempt reported by the pipeline
    Trace(TraceStep),
    /// Block committed
    Commit {
        block_num: BlockNumber,
        timestamp: ScenarioTime,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    /// Contract ABIs known to the formatter: account -> declared actions
    #[serde(default)]
    pub abis: BTreeMap<String, Vec<String>>,
    pub steps: Vec<Step>,
}

impl Scenario {
    /// JSON files are parsed as JSON, everything else as YAML
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
        if is_json {
            serde_json::from_str(&contents).with_context(|| format!("invalid scenario {}", path.display()))
        } else {
            Self::from_yaml(&contents).with_context(|| format!("invalid scenario {}", path.display()))
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn formatter(&self) -> JsonTraceFormatter {
        let mut formatter = JsonTraceFormatter::new();
        for (account, actions) in &self.abis {
            formatter.register_abi(account.clone(), actions.iter().cloned());
        }
        formatter
    }
}

/// Labels that are 64 hex characters are taken as ids, anything else is hashed
pub fn resolve_id(label: &str) -> TransactionId {
    label.parse().unwrap_or_else(|_| TransactionId::from_label(label))
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedStep {
    pub step: usize,
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClientResult {
    Resolved { outcome: TrackOutcome },
    /// Tracking was cancelled before an outcome was reached
    Cancelled,
    /// Still tracked when the scenario ended
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub id: String,
    pub result: ClientResult,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub name: Option<String>,
    pub commits: Vec<CommitSummary>,
    pub rejected: Vec<RejectedStep>,
    pub outcomes: Vec<ReplayOutcome>,
    /// Block commits the tracker logged and dropped
    pub pipeline_errors: usize,
}

impl ReplayReport {
    pub fn outcome(&self, id: &str) -> Option<&ClientResult> {
        self.outcomes.iter().rev().find(|o| o.id == id).map(|o| &o.result)
    }
}

struct ClientWaiter {
    label: String,
    id: TransactionId,
    task: JoinHandle<Result<TrackOutcome, tokio::sync::oneshot::error::RecvError>>,
}

/// Replay `scenario` against a fresh tracker built from `config`
pub async fn replay(scenario: &Scenario, config: RetryDbConfig) -> Result<ReplayReport> {
    let db = TrxRetryDb::new(config, Arc::new(scenario.formatter()))?;
    replay_on(&SharedRetryDb::new(db), scenario).await
}

pub async fn replay_on(db: &SharedRetryDb, scenario: &Scenario) -> Result<ReplayReport> {
    let mut report = ReplayReport {
        name: scenario.name.clone(),
        ..ReplayReport::default()
    };
    let mut waiters: Vec<ClientWaiter> = Vec::new();

    for (index, step) in scenario.steps.iter().enumerate() {
        match step {
            Step::Track { id, expiration } => {
                let expiration = expiration.resolve().with_context(|| format!("step {}", index))?;
                match db.track(resolve_id(id), expiration) {
                    Ok(receiver) => waiters.push(ClientWaiter {
                        label: id.clone(),
                        id: resolve_id(id),
                        task: tokio::spawn(receiver),
                    }),
                    Err(err) => {
                        warn!(step = index, id = %id, error = %err, "track rejected");
                        report.rejected.push(RejectedStep {
                            step: index,
                            id: id.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }
            Step::Cancel { id } => {
                if !db.cancel(&resolve_id(id)) {
                    debug!(step = index, id = %id, "cancel for untracked transaction");
                }
            }
            Step::Trace(trace) => {
                let trace = trace
                    .to_trace(db.head_block())
                    .with_context(|| format!("step {}", index))?;
                let disposition = db.on_trace_produced(Arc::new(trace));
                debug!(step = index, ?disposition, "trace recorded");
            }
            Step::Commit { block_num, timestamp } => {
                let timestamp = timestamp.resolve().with_context(|| format!("step {}", index))?;
                match db.on_block_committed(*block_num, timestamp) {
                    Some(summary) => report.commits.push(summary),
                    None => report.pipeline_errors += 1,
                }
            }
        }
    }

    // only the latest waiter for an id can still be tracked
    let mut latest: HashMap<TransactionId, usize> = HashMap::new();
    for (index, waiter) in waiters.iter().enumerate() {
        latest.insert(waiter.id, index);
    }

    for (index, waiter) in waiters.into_iter().enumerate() {
        let still_tracked = latest.get(&waiter.id) == Some(&index) && db.status(&waiter.id).is_some();
        let result = if still_tracked {
            waiter.task.abort();
            ClientResult::Pending
        } else {
            match waiter.task.await {
                Ok(Ok(outcome)) => ClientResult::Resolved { outcome },
                Ok(Err(_)) => ClientResult::Cancelled,
                Err(err) => bail!("client task for {} failed: {}", waiter.label, err),
            }
        };
        report.outcomes.push(ReplayOutcome {
            id: waiter.label,
            result,
        });
    }

    info!(
        steps = scenario.steps.len(),
        commits = report.commits.len(),
        rejected = report.rejected.len(),
        "scenario replayed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
name: mixed
abis:
  token: [transfer]
steps:
  - { op: track, id: T1, expiration: 100 }
  - { op: track, id: T2, expiration: 10 }
  - { op: track, id: T3, expiration: 1000 }
  - { op: track, id: T1, expiration: 100 }
  - op: trace
    id: T1
    block_num: 5
    actions:
      - { account: token, name: transfer, data: { qty: 3 } }
  - { op: trace, id: onblock, block_num: 5, onblock: true }
  - { op: cancel, id: T3 }
  - { op: commit, block_num: 5, timestamp: 50 }
"#;

    #[tokio::test]
    async fn test_replay_reports_every_client() {
        let scenario = Scenario::from_yaml(SCENARIO).unwrap();
        assert!(scenario.formatter().has_abi("token"));
        let report = replay(&scenario, RetryDbConfig::default()).await.unwrap();

        assert_eq!(report.name.as_deref(), Some("mixed"));
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].step, 3);
        assert_eq!(report.commits.len(), 1);
        assert_eq!(report.pipeline_errors, 0);

        match report.outcome("T1") {
            Some(ClientResult::Resolved {
                outcome: TrackOutcome::Committed { block_num, trace },
            }) => {
                assert_eq!(*block_num, 5);
                assert!(trace.is_formatted());
            }
            other => panic!("unexpected T1 result {:?}", other),
        }
        assert!(matches!(
            report.outcome("T2"),
            Some(ClientResult::Resolved {
                outcome: TrackOutcome::Expired { .. }
            })
        ));
        assert!(matches!(report.outcome("T3"), Some(ClientResult::Cancelled)));
    }

    #[tokio::test]
    async fn test_unresolved_clients_are_pending() {
        let scenario = Scenario::from_yaml(
            "steps:\n  - { op: track, id: slow, expiration: 500 }\n  - { op: commit, block_num: 1, timestamp: 10 }\n",
        )
        .unwrap();
        let report = replay(&scenario, RetryDbConfig::default()).await.unwrap();
        assert!(matches!(report.outcome("slow"), Some(ClientResult::Pending)));
    }

    #[tokio::test]
    async fn test_retracked_id_reports_both_clients() {
        let scenario = Scenario::from_yaml(
            r#"
steps:
  - { op: track, id: again, expiration: 10 }
  - { op: commit, block_num: 1, timestamp: 20 }
  - { op: track, id: again, expiration: 100 }
"#,
        )
        .unwrap();
        let report = replay(&scenario, RetryDbConfig::default()).await.unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(
            report.outcomes[0].result,
            ClientResult::Resolved {
                outcome: TrackOutcome::Expired { .. }
            }
        ));
        assert!(matches!(report.outcomes[1].result, ClientResult::Pending));
    }

    fn committed_in(report: &ReplayReport, id: &str) -> Option<BlockNumber> {
        match report.outcome(id) {
            Some(ClientResult::Resolved {
                outcome: TrackOutcome::Committed { block_num, .. },
            }) => Some(*block_num),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_demo_scenarios_match_their_descriptions() {
        let basic = Scenario::from_yaml(include_str!("../demos/basic.yaml")).unwrap();
        let report = replay(&basic, RetryDbConfig::default()).await.unwrap();
        assert_eq!(committed_in(&report, "T1"), Some(5));
        assert!(matches!(
            report.outcome("T2"),
            Some(ClientResult::Resolved {
                outcome: TrackOutcome::Expired { .. }
            })
        ));

        let speculation = Scenario::from_yaml(include_str!("../demos/speculation.yaml")).unwrap();
        let report = replay(&speculation, RetryDbConfig::default()).await.unwrap();
        assert_eq!(committed_in(&report, "early"), Some(8));
        assert_eq!(committed_in(&report, "deferred"), Some(8));
        assert_eq!(committed_in(&report, "skipped"), Some(9));
        assert!(matches!(report.outcome("late"), Some(ClientResult::Cancelled)));
        assert_eq!(report.pipeline_errors, 0);
    }

    #[test]
    fn test_time_formats() {
        assert_eq!(ScenarioTime::Secs(5).resolve().unwrap(), Timestamp::from_secs(5));
        assert_eq!(
            ScenarioTime::Rfc3339("1970-01-01T00:01:40Z".into()).resolve().unwrap(),
            Timestamp::from_secs(100)
        );
        assert!(ScenarioTime::Rfc3339("yesterday".into()).resolve().is_err());
    }

    #[test]
    fn test_resolve_id_accepts_hex_or_label() {
        let hex_id = "11".repeat(32);
        assert_eq!(resolve_id(&hex_id), TransactionId([0x11; 32]));
        assert_eq!(resolve_id("T1"), TransactionId::from_label("T1"));
    }

    #[test]
    fn test_action_payloads() {
        let hex_action = ScenarioAction {
            account: "token".into(),
            name: "transfer".into(),
            data: None,
            hex_data: Some("zz".into()),
        };
        assert!(matches!(hex_action.to_action(), Err(ScenarioError::InvalidHex { .. })));

        let json_action = ScenarioAction {
            account: "token".into(),
            name: "transfer".into(),
            data: Some(serde_json::json!({"qty": 1})),
            hex_data: None,
        };
        assert_eq!(json_action.to_action().unwrap().data, br#"{"qty":1}"#.to_vec());
    }
}
