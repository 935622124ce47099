//! Registry records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pipeline role of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerType {
    Ingest,
    RuleEngine,
    Persistence,
    Outbound,
    Backchannel,
    Unclassified,
}

impl WorkerType {
    pub const ALL: [WorkerType; 6] = [
        WorkerType::Ingest,
        WorkerType::RuleEngine,
        WorkerType::Persistence,
        WorkerType::Outbound,
        WorkerType::Backchannel,
        WorkerType::Unclassified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::Ingest => "INGEST",
            WorkerType::RuleEngine => "RULE_ENGINE",
            WorkerType::Persistence => "PERSISTENCE",
            WorkerType::Outbound => "OUTBOUND",
            WorkerType::Backchannel => "BACKCHANNEL",
            WorkerType::Unclassified => "UNCLASSIFIED",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised worker type or state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} [{value}]")]
pub struct ParseNameError {
    kind: &'static str,
    value: String,
}

impl FromStr for WorkerType {
    type Err = ParseNameError;

    /// Case-insensitive, so lowercased configuration keys resolve too.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseNameError {
                kind: "moduleType",
                value: s.to_string(),
            })
    }
}

/// Health a worker reports with its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Unknown => "UNKNOWN",
            WorkerState::Healthy => "HEALTHY",
            WorkerState::Unhealthy => "UNHEALTHY",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerState {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            WorkerState::Unknown,
            WorkerState::Healthy,
            WorkerState::Unhealthy,
        ]
        .into_iter()
        .find(|state| state.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| ParseNameError {
            kind: "state",
            value: s.to_string(),
        })
    }
}

/// One registered worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub worker_type: WorkerType,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub state: WorkerState,
}

impl WorkerRecord {
    /// Fresh registration: heartbeat stamped now so the first sweep keeps it.
    pub fn registered(id: impl Into<String>, worker_type: WorkerType, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            worker_type,
            registered_at: now,
            last_heartbeat: now,
            state: WorkerState::Unknown,
        }
    }

    /// Whether the last heartbeat is older than `timeout` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now - self.last_heartbeat > timeout,
            Err(_) => false,
        }
    }
}

/// Progress of one worker inside a global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Started,
    Sent,
    Successful,
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Started => "STARTED",
            TransactionState::Sent => "SENT",
            TransactionState::Successful => "SUCCESSFUL",
            TransactionState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionState {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            TransactionState::Started,
            TransactionState::Sent,
            TransactionState::Successful,
            TransactionState::Failed,
        ]
        .into_iter()
        .find(|state| state.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| ParseNameError {
            kind: "transaction state",
            value: s.to_string(),
        })
    }
}

/// Bookkeeping row for one worker inside one global transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_id: String,
    pub module_id: String,
    pub state: TransactionState,
}

impl TransactionRecord {
    pub fn new(tx_id: impl Into<String>, module_id: impl Into<String>, state: TransactionState) -> Self {
        Self {
            tx_id: tx_id.into(),
            module_id: module_id.into(),
            state,
        }
    }
}

/// One per-instance configuration of a worker type, optionally held by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub worker_type: WorkerType,
    pub config_id: String,
    pub module_id: Option<String>,
    pub setup: Value,
}

impl Assignment {
    pub fn free(worker_type: WorkerType, config_id: impl Into<String>, setup: Value) -> Self {
        Self {
            worker_type,
            config_id: config_id.into(),
            module_id: None,
            setup,
        }
    }
}
