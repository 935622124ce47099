//! Heartbeat-driven liveness.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::model::WorkerState;
use super::reset::ModuleReset;
use super::store::ModuleStore;
use super::Result;

/// Default liveness timeout.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Prunes workers whose heartbeat has gone stale.
///
/// The sweep runs on a period equal to the timeout, so a dead worker is
/// removed between one and two timeouts after its last heartbeat.
pub struct LivenessMonitor {
    modules: Arc<dyn ModuleStore>,
    reset: ModuleReset,
    timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(modules: Arc<dyn ModuleStore>, reset: ModuleReset, timeout: Duration) -> Self {
        Self {
            modules,
            reset,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stamp every persisted worker as just seen.
    ///
    /// Run once at startup: after a coordinator restart the stored heartbeats
    /// are as old as the outage, and the workers deserve a full timeout to
    /// check in again.
    pub async fn init(&self) -> Result<()> {
        let touched = self.modules.touch_all_modules(Utc::now()).await?;
        info!(modules = touched, timeout = ?self.timeout, "Liveness monitor initialised");
        Ok(())
    }

    /// Record a heartbeat. False for an unknown id, which stays unknown.
    pub async fn received_heartbeat(&self, module_id: &str, state: WorkerState) -> Result<bool> {
        let known = self
            .modules
            .touch_module(module_id, state, Utc::now())
            .await?;
        if known {
            debug!(module_id = %module_id, state = %state, "Heartbeat");
        } else {
            warn!(module_id = %module_id, "Heartbeat from unknown module");
        }
        Ok(known)
    }

    /// Reset every worker whose heartbeat is older than the timeout.
    /// Returns the ids that were reset.
    pub async fn sweep(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let stale: Vec<String> = self
            .modules
            .list_modules()
            .await?
            .into_iter()
            .filter(|record| record.is_stale(now, self.timeout))
            .map(|record| record.id)
            .collect();

        let mut reset = Vec::with_capacity(stale.len());
        for module_id in stale {
            warn!(module_id = %module_id, timeout = ?self.timeout, "Module missed heartbeats");
            if self.reset.reset(&module_id).await? {
                reset.push(module_id);
            }
        }
        if !reset.is_empty() {
            info!(count = reset.len(), "Pruned dead modules");
        }
        Ok(reset)
    }

    /// Sweep forever, one sweep per timeout period.
    pub async fn run(self: Arc<Self>) {
        info!(period = ?self.timeout, "Starting liveness monitor");
        let mut ticker = interval_at(Instant::now() + self.timeout, self.timeout);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                error!(error = %e, "Liveness sweep failed");
            }
        }
    }
}
