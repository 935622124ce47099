//! Setup documents handed to workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::model::WorkerType;
use super::protocol::HEARTBEAT_KEY;
use super::store::AssignmentStore;
use super::Result;
use crate::transfer::Args;

/// Part of every setup document: the heartbeat period a worker should use.
///
/// Half the liveness timeout, minus a millisecond, so two heartbeats fit in
/// one timeout window.
pub fn common_setup(liveness_timeout: Duration) -> Args {
    let half = (liveness_timeout.as_millis() / 2) as i64;
    let mut setup = Args::new();
    setup.insert(HEARTBEAT_KEY.to_string(), json!((half - 1).max(0)));
    setup
}

/// Supplies the type-specific part of a worker's setup.
#[async_trait]
pub trait SetupProvider: Send + Sync {
    /// Setup for `module_id`. An empty object when nothing is available.
    async fn setup_for(&self, module_id: &str) -> Result<Value>;

    /// Drop claims of workers not in `live`. Called before [`Self::setup_for`].
    async fn release_orphans(&self, _live: &[String]) -> Result<usize> {
        Ok(0)
    }
}

/// The same document for every worker of a type.
pub struct StaticSetup {
    document: Value,
}

impl StaticSetup {
    pub fn new(document: Value) -> Self {
        Self { document }
    }
}

#[async_trait]
impl SetupProvider for StaticSetup {
    async fn setup_for(&self, _module_id: &str) -> Result<Value> {
        Ok(self.document.clone())
    }
}

/// A pool of per-instance configurations, each held by at most one worker.
///
/// A worker asking again gets back the configuration it already holds.
pub struct AssignedSetup {
    worker_type: WorkerType,
    assignments: Arc<dyn AssignmentStore>,
}

impl AssignedSetup {
    pub fn new(worker_type: WorkerType, assignments: Arc<dyn AssignmentStore>) -> Self {
        Self {
            worker_type,
            assignments,
        }
    }

    /// Add configurations to the pool, keyed by position. Existing holders
    /// keep their claims.
    pub async fn seed(&self, configs: &[Value]) -> Result<()> {
        for (index, setup) in configs.iter().enumerate() {
            let config_id = format!("{}-{index}", self.worker_type.as_str().to_lowercase());
            self.assignments
                .put_config(self.worker_type, &config_id, setup)
                .await?;
        }
        info!(worker_type = %self.worker_type, configs = configs.len(), "Seeded assignment pool");
        Ok(())
    }
}

#[async_trait]
impl SetupProvider for AssignedSetup {
    async fn setup_for(&self, module_id: &str) -> Result<Value> {
        match self.assignments.claim(self.worker_type, module_id).await? {
            Some(assignment) => {
                debug!(
                    module_id = %module_id,
                    config_id = %assignment.config_id,
                    "Assigned configuration"
                );
                Ok(assignment.setup)
            }
            None => {
                warn!(module_id = %module_id, worker_type = %self.worker_type, "No free configuration");
                Ok(json!({}))
            }
        }
    }

    async fn release_orphans(&self, live: &[String]) -> Result<usize> {
        let released = self
            .assignments
            .release_orphans(self.worker_type, live)
            .await?;
        if released > 0 {
            info!(worker_type = %self.worker_type, released, "Released orphaned assignments");
        }
        Ok(released)
    }
}
