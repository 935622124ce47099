//! Per-worker cleanup.

use std::sync::Arc;

use tracing::{debug, info};

use super::store::{AssignmentStore, ModuleStore, TransactionStore};
use super::Result;

/// Removes everything the registry holds for one worker id.
///
/// Idempotent: a second reset for the same id finds nothing and reports so.
#[derive(Clone)]
pub struct ModuleReset {
    modules: Arc<dyn ModuleStore>,
    transactions: Arc<dyn TransactionStore>,
    assignments: Arc<dyn AssignmentStore>,
}

impl ModuleReset {
    pub fn new(
        modules: Arc<dyn ModuleStore>,
        transactions: Arc<dyn TransactionStore>,
        assignments: Arc<dyn AssignmentStore>,
    ) -> Self {
        Self {
            modules,
            transactions,
            assignments,
        }
    }

    /// Delete the worker's transaction rows, free its assignment and delete
    /// its record. True when a record was found.
    pub async fn reset(&self, module_id: &str) -> Result<bool> {
        let transactions = self
            .transactions
            .delete_module_transactions(module_id)
            .await?;
        let released = self.assignments.release_module(module_id).await?;
        let found = self.modules.delete_module(module_id).await?;

        if found {
            info!(
                module_id = %module_id,
                transactions,
                released,
                "Module reset"
            );
        } else {
            debug!(module_id = %module_id, "Module already gone");
        }
        Ok(found)
    }
}
