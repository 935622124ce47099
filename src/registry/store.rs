//! Persistence interfaces of the fleet registry.
//!
//! Implementations:
//! - `InMemory*Store`: process-local tables, lost on restart
//! - `Sqlite*Store`: SQLite tables surviving coordinator restarts

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::model::{Assignment, TransactionRecord, WorkerRecord, WorkerState, WorkerType};

/// Result type for registry storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during registry storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("Invalid stored value: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown storage type: {0}")]
    UnknownBackend(String),
}

/// Table of registered workers, at most one row per id.
#[async_trait]
pub trait ModuleStore: Send + Sync {
    /// Insert or replace the record with this id.
    async fn put_module(&self, record: &WorkerRecord) -> Result<()>;

    async fn get_module(&self, id: &str) -> Result<Option<WorkerRecord>>;

    /// Delete a record. False when it was already gone.
    async fn delete_module(&self, id: &str) -> Result<bool>;

    /// Every record, oldest registration first.
    async fn list_modules(&self) -> Result<Vec<WorkerRecord>>;

    /// Records of one worker type, oldest registration first.
    async fn list_modules_by_type(&self, worker_type: WorkerType) -> Result<Vec<WorkerRecord>>;

    /// Stamp a heartbeat. False for an unknown id; nothing is created.
    async fn touch_module(&self, id: &str, state: WorkerState, at: DateTime<Utc>) -> Result<bool>;

    /// Stamp every record's heartbeat, keeping states.
    async fn touch_all_modules(&self, at: DateTime<Utc>) -> Result<usize>;

    async fn clear_modules(&self) -> Result<()>;
}

/// Rows tracking workers inside global transactions, unique per (tx, module).
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert, or update the state of an existing (tx, module) row.
    async fn put_transaction(&self, record: &TransactionRecord) -> Result<()>;

    async fn list_transactions(&self, tx_id: &str) -> Result<Vec<TransactionRecord>>;

    async fn delete_transactions(&self, tx_id: &str) -> Result<usize>;

    async fn delete_module_transactions(&self, module_id: &str) -> Result<usize>;

    async fn clear_transactions(&self) -> Result<()>;
}

/// Per-worker-type pools of instance configurations.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Add a configuration, or refresh its setup keeping any holder.
    async fn put_config(&self, worker_type: WorkerType, config_id: &str, setup: &Value)
        -> Result<()>;

    /// Configurations of a type, by config id.
    async fn list_assignments(&self, worker_type: WorkerType) -> Result<Vec<Assignment>>;

    /// The configuration held by `module_id`, else the first free one now
    /// assigned to it. None when the pool is exhausted.
    async fn claim(&self, worker_type: WorkerType, module_id: &str) -> Result<Option<Assignment>>;

    /// Free whatever `module_id` holds.
    async fn release_module(&self, module_id: &str) -> Result<usize>;

    /// Free every assignment of `worker_type` whose holder is not in `live`.
    async fn release_orphans(&self, worker_type: WorkerType, live: &[String]) -> Result<usize>;

    /// Free every assignment of every type.
    async fn release_all(&self) -> Result<()>;
}

/// The registry's tables, shared by every registry component.
#[derive(Clone)]
pub struct Stores {
    pub modules: Arc<dyn ModuleStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub assignments: Arc<dyn AssignmentStore>,
}
