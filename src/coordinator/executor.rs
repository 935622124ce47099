//! Ordered multi-worker batch execution.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::resource::{ModuleResource, ResourcePool};
use super::task::TransactionalCommandTask;
use crate::registry::{TransactionRecord, TransactionState, TransactionStore};
use crate::transfer::CommandError;

/// Per task: `None` on success, otherwise the error with its worker id set.
pub type TaskOutcome = Option<CommandError>;

/// A worker touched by the batch.
struct Participant {
    resource: Arc<ModuleResource>,
    /// Why the begin failed, replayed to later tasks for the same worker.
    begin_error: Option<CommandError>,
    failed: bool,
}

/// Runs a batch of tasks under one global transaction id.
///
/// Tasks run one after another in list order and every task is attempted,
/// so the caller sees the full error set. Afterwards every touched worker is
/// committed if all tasks succeeded, rolled back otherwise. Several tasks for
/// one worker share that worker's transaction.
pub struct ModuleTransactionCoordinator {
    resources: Arc<ResourcePool>,
    transactions: Arc<dyn TransactionStore>,
}

impl ModuleTransactionCoordinator {
    pub fn new(resources: Arc<ResourcePool>, transactions: Arc<dyn TransactionStore>) -> Self {
        Self {
            resources,
            transactions,
        }
    }

    pub fn resources(&self) -> &Arc<ResourcePool> {
        &self.resources
    }

    pub async fn execute_order_dependent_tasks(
        &self,
        tasks: &[TransactionalCommandTask],
    ) -> Vec<TaskOutcome> {
        let tx_id = Uuid::new_v4().to_string();
        info!(tx_id = %tx_id, tasks = tasks.len(), "Executing order-dependent tasks");

        let mut participants: Vec<Participant> = Vec::new();
        let mut outcomes = Vec::with_capacity(tasks.len());

        for task in tasks {
            let index = match participants
                .iter()
                .position(|p| p.resource.module_id() == task.module_id)
            {
                Some(index) => index,
                None => {
                    participants.push(self.begin(&tx_id, &task.module_id).await);
                    participants.len() - 1
                }
            };
            let participant = &mut participants[index];

            let result = match &participant.begin_error {
                Some(e) => Err(e.clone()),
                None => self.run_task(&tx_id, &participant.resource, task).await,
            };

            match result {
                Ok(()) => {
                    debug!(tx_id = %tx_id, module_id = %task.module_id, method = %task.command.method, "Task succeeded");
                    if !participant.failed {
                        self.record(&tx_id, &task.module_id, TransactionState::Successful)
                            .await;
                    }
                    outcomes.push(None);
                }
                Err(e) => {
                    warn!(tx_id = %tx_id, module_id = %task.module_id, method = %task.command.method, error = %e, "Task failed");
                    participant.failed = true;
                    self.record(&tx_id, &task.module_id, TransactionState::Failed)
                        .await;
                    outcomes.push(Some(e.with_module(task.module_id.clone())));
                }
            }
        }

        let all_succeeded = outcomes.iter().all(Option::is_none);
        self.finish(&tx_id, &participants, all_succeeded).await;

        if let Err(e) = self.transactions.delete_transactions(&tx_id).await {
            warn!(tx_id = %tx_id, error = %e, "Failed to delete transaction records");
        }
        outcomes
    }

    async fn begin(&self, tx_id: &str, module_id: &str) -> Participant {
        let resource = self.resources.get(module_id).await;
        self.record(tx_id, module_id, TransactionState::Started).await;
        let begin_error = resource.start(tx_id).await.err().map(CommandError::from);
        Participant {
            resource,
            begin_error,
            failed: false,
        }
    }

    async fn run_task(
        &self,
        tx_id: &str,
        resource: &ModuleResource,
        task: &TransactionalCommandTask,
    ) -> Result<(), CommandError> {
        let reply = resource.send_command(&task.command, task.timeout).await?;
        self.record(tx_id, &task.module_id, TransactionState::Sent).await;
        task.verifier.verify(&reply)
    }

    /// Commit or roll back every participant, one after another in the order
    /// they joined. Failures are logged, never propagated.
    async fn finish(&self, tx_id: &str, participants: &[Participant], commit: bool) {
        let phase = if commit { "commit" } else { "rollback" };
        let mut done = 0;
        for p in participants {
            let result = if commit {
                p.resource.commit(tx_id).await
            } else {
                p.resource.rollback(tx_id).await
            };
            match result {
                Ok(()) => done += 1,
                Err(e) => error!(tx_id = %tx_id, module_id = %p.resource.module_id(), phase, error = %e, "Finishing transaction failed"),
            }
        }
        if commit {
            info!(tx_id = %tx_id, "Committed {} / {} modules", done, participants.len());
        } else {
            info!(tx_id = %tx_id, "Rolled back {} / {} modules", done, participants.len());
        }
    }

    /// Transaction records are bookkeeping for operators; failing to write
    /// one does not fail the batch.
    async fn record(&self, tx_id: &str, module_id: &str, state: TransactionState) {
        let record = TransactionRecord::new(tx_id, module_id, state);
        if let Err(e) = self.transactions.put_transaction(&record).await {
            warn!(tx_id = %tx_id, module_id = %module_id, state = %state, error = %e, "Failed to record transaction state");
        }
    }
}

/// Worker ids whose tasks failed because nobody is listening at their address.
pub fn gone_modules(outcomes: &[TaskOutcome]) -> HashSet<String> {
    outcomes
        .iter()
        .flatten()
        .filter(|e| e.is_no_handlers())
        .filter_map(|e| e.module_id.clone())
        .collect()
}
