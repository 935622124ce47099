//! Retry-with-exclusion on top of the batch executor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::executor::{gone_modules, ModuleTransactionCoordinator};
use super::resource::{ResourceError, ResourcePool};
use super::task::{ResultVerifier, TransactionalCommandTask};
use crate::config::CoordinatorConfig;
use crate::registry::{ModuleReset, ModuleStore, Result, Stores, WorkerType};
use crate::transfer::{Command, CommandError, TransportError, TransportLayer};

/// Submits configuration changes to the fleet.
///
/// When a batch reports workers that no longer exist, they are reset, their
/// tasks are dropped and the remainder is resubmitted, for at most
/// `max_retry_depth` rounds.
pub struct ModuleUpdateManager {
    executor: ModuleTransactionCoordinator,
    modules: Arc<dyn ModuleStore>,
    reset: ModuleReset,
    task_timeout: Duration,
    max_retry_depth: usize,
}

impl ModuleUpdateManager {
    pub fn new(
        transport: Arc<dyn TransportLayer>,
        stores: &Stores,
        config: &CoordinatorConfig,
    ) -> Self {
        let resources = Arc::new(ResourcePool::new(transport, config.control_timeout()));
        Self {
            executor: ModuleTransactionCoordinator::new(resources, stores.transactions.clone()),
            modules: stores.modules.clone(),
            reset: ModuleReset::new(
                stores.modules.clone(),
                stores.transactions.clone(),
                stores.assignments.clone(),
            ),
            task_timeout: config.task_timeout(),
            max_retry_depth: config.max_retry_depth,
        }
    }

    pub fn executor(&self) -> &ModuleTransactionCoordinator {
        &self.executor
    }

    /// Run one command per listed worker in a single batch.
    pub async fn run_module_instance_commands(
        &self,
        commands: Vec<(String, Command)>,
    ) -> Result<Vec<CommandError>> {
        let tasks = commands
            .into_iter()
            .map(|(module_id, command)| {
                TransactionalCommandTask::new(module_id, command, self.task_timeout)
            })
            .collect();
        self.run_tasks(tasks).await
    }

    /// Run each command on every registered worker of its type, oldest
    /// registration first.
    pub async fn run_module_type_commands(
        &self,
        commands: Vec<(WorkerType, Command)>,
    ) -> Result<Vec<CommandError>> {
        let mut tasks = Vec::new();
        for (worker_type, command) in commands {
            let targets = self.modules.list_modules_by_type(worker_type).await?;
            if targets.is_empty() {
                debug!(module_type = %worker_type, method = %command.method, "No modules of type");
            }
            for record in targets {
                tasks.push(TransactionalCommandTask::new(
                    record.id,
                    command.clone(),
                    self.task_timeout,
                ));
            }
        }
        self.run_tasks(tasks).await
    }

    /// Run a prepared task list, excluding vanished workers between rounds.
    ///
    /// Returns the errors of the last round; empty on success.
    pub async fn run_tasks(
        &self,
        mut tasks: Vec<TransactionalCommandTask>,
    ) -> Result<Vec<CommandError>> {
        self.prune_resources().await?;

        let mut errors = Vec::new();
        for depth in 0..self.max_retry_depth {
            if tasks.is_empty() {
                return Ok(Vec::new());
            }

            let outcomes = self.executor.execute_order_dependent_tasks(&tasks).await;
            let gone = gone_modules(&outcomes);
            errors = outcomes.into_iter().flatten().collect();
            if gone.is_empty() {
                return Ok(errors);
            }

            warn!(depth, gone = gone.len(), "Batch hit vanished modules; excluding them");
            for module_id in &gone {
                self.forget(module_id).await?;
            }
            tasks.retain(|task| !gone.contains(&task.module_id));
        }

        if !errors.is_empty() {
            warn!(
                depth = self.max_retry_depth,
                errors = errors.len(),
                "Giving up after maximum retry depth"
            );
        }
        Ok(errors)
    }

    /// Send one command outside any transaction. The verified reply, or
    /// `None` if the worker failed or rejected it.
    pub async fn run_single_instance_command(
        &self,
        module_id: &str,
        command: &Command,
        verifier: &dyn ResultVerifier,
    ) -> Result<Option<Value>> {
        let resource = self.executor.resources().get(module_id).await;
        match resource.send_command(command, self.task_timeout).await {
            Ok(reply) => match verifier.verify(&reply) {
                Ok(()) => Ok(Some(reply)),
                Err(e) => {
                    warn!(module_id = %module_id, method = %command.method, error = %e, "Reply failed verification");
                    Ok(None)
                }
            },
            Err(e) => {
                warn!(module_id = %module_id, method = %command.method, error = %e, "Single command failed");
                if let ResourceError::Connection {
                    source: TransportError::NoHandlers { .. },
                    ..
                } = e
                {
                    self.forget(module_id).await?;
                }
                Ok(None)
            }
        }
    }

    /// Drop pool handles of workers no longer in the registry.
    async fn prune_resources(&self) -> Result<()> {
        let live: HashSet<String> = self
            .modules
            .list_modules()
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect();
        let dropped = self.executor.resources().retain(&live).await;
        if dropped > 0 {
            debug!(dropped, "Dropped handles of unregistered modules");
        }
        Ok(())
    }

    async fn forget(&self, module_id: &str) -> Result<()> {
        let found = self.reset.reset(module_id).await?;
        self.executor.resources().remove(module_id).await;
        info!(module_id = %module_id, found, "Excluded vanished module");
        Ok(())
    }
}
