//! In-memory registry stores.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::registry::{
    Assignment, AssignmentStore, ModuleStore, Stores, TransactionRecord, TransactionStore,
    WorkerRecord, WorkerState, WorkerType,
};

use super::Result;

/// Worker table held in memory.
#[derive(Default)]
pub struct InMemoryModuleStore {
    modules: RwLock<HashMap<String, WorkerRecord>>,
}

impl InMemoryModuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn registration_order(records: &mut [WorkerRecord]) {
    records.sort_by(|a, b| {
        a.registered_at
            .cmp(&b.registered_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl ModuleStore for InMemoryModuleStore {
    async fn put_module(&self, record: &WorkerRecord) -> Result<()> {
        self.modules
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_module(&self, id: &str) -> Result<Option<WorkerRecord>> {
        Ok(self.modules.read().await.get(id).cloned())
    }

    async fn delete_module(&self, id: &str) -> Result<bool> {
        Ok(self.modules.write().await.remove(id).is_some())
    }

    async fn list_modules(&self) -> Result<Vec<WorkerRecord>> {
        let mut records: Vec<_> = self.modules.read().await.values().cloned().collect();
        registration_order(&mut records);
        Ok(records)
    }

    async fn list_modules_by_type(&self, worker_type: WorkerType) -> Result<Vec<WorkerRecord>> {
        let mut records: Vec<_> = self
            .modules
            .read()
            .await
            .values()
            .filter(|r| r.worker_type == worker_type)
            .cloned()
            .collect();
        registration_order(&mut records);
        Ok(records)
    }

    async fn touch_module(&self, id: &str, state: WorkerState, at: DateTime<Utc>) -> Result<bool> {
        let mut modules = self.modules.write().await;
        match modules.get_mut(id) {
            Some(record) => {
                record.last_heartbeat = at;
                record.state = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_all_modules(&self, at: DateTime<Utc>) -> Result<usize> {
        let mut modules = self.modules.write().await;
        for record in modules.values_mut() {
            record.last_heartbeat = at;
        }
        Ok(modules.len())
    }

    async fn clear_modules(&self) -> Result<()> {
        self.modules.write().await.clear();
        Ok(())
    }
}

/// Transaction rows held in memory, keyed by (tx, module).
#[derive(Default)]
pub struct InMemoryTransactionStore {
    transactions: RwLock<BTreeMap<(String, String), TransactionRecord>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn put_transaction(&self, record: &TransactionRecord) -> Result<()> {
        let key = (record.tx_id.clone(), record.module_id.clone());
        self.transactions.write().await.insert(key, record.clone());
        Ok(())
    }

    async fn list_transactions(&self, tx_id: &str) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .filter(|r| r.tx_id == tx_id)
            .cloned()
            .collect())
    }

    async fn delete_transactions(&self, tx_id: &str) -> Result<usize> {
        let mut transactions = self.transactions.write().await;
        let before = transactions.len();
        transactions.retain(|(tx, _), _| tx != tx_id);
        Ok(before - transactions.len())
    }

    async fn delete_module_transactions(&self, module_id: &str) -> Result<usize> {
        let mut transactions = self.transactions.write().await;
        let before = transactions.len();
        transactions.retain(|(_, module), _| module != module_id);
        Ok(before - transactions.len())
    }

    async fn clear_transactions(&self) -> Result<()> {
        self.transactions.write().await.clear();
        Ok(())
    }
}

/// Assignment pools held in memory, keyed by (type, config id).
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    assignments: RwLock<BTreeMap<(WorkerType, String), Assignment>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn put_config(
        &self,
        worker_type: WorkerType,
        config_id: &str,
        setup: &Value,
    ) -> Result<()> {
        self.assignments
            .write()
            .await
            .entry((worker_type, config_id.to_string()))
            .and_modify(|a| a.setup = setup.clone())
            .or_insert_with(|| Assignment::free(worker_type, config_id, setup.clone()));
        Ok(())
    }

    async fn list_assignments(&self, worker_type: WorkerType) -> Result<Vec<Assignment>> {
        Ok(self
            .assignments
            .read()
            .await
            .values()
            .filter(|a| a.worker_type == worker_type)
            .cloned()
            .collect())
    }

    async fn claim(&self, worker_type: WorkerType, module_id: &str) -> Result<Option<Assignment>> {
        let mut assignments = self.assignments.write().await;
        let pool = || assignments.values().filter(|a| a.worker_type == worker_type);

        let config_id = pool()
            .find(|a| a.module_id.as_deref() == Some(module_id))
            .or_else(|| pool().find(|a| a.module_id.is_none()))
            .map(|a| a.config_id.clone());
        let Some(config_id) = config_id else {
            return Ok(None);
        };

        let Some(assignment) = assignments.get_mut(&(worker_type, config_id)) else {
            return Ok(None);
        };
        assignment.module_id = Some(module_id.to_string());
        Ok(Some(assignment.clone()))
    }

    async fn release_module(&self, module_id: &str) -> Result<usize> {
        let mut released = 0;
        for assignment in self.assignments.write().await.values_mut() {
            if assignment.module_id.as_deref() == Some(module_id) {
                assignment.module_id = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn release_orphans(&self, worker_type: WorkerType, live: &[String]) -> Result<usize> {
        let mut released = 0;
        for assignment in self.assignments.write().await.values_mut() {
            if assignment.worker_type != worker_type {
                continue;
            }
            if let Some(holder) = &assignment.module_id {
                if !live.contains(holder) {
                    assignment.module_id = None;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn release_all(&self) -> Result<()> {
        for assignment in self.assignments.write().await.values_mut() {
            assignment.module_id = None;
        }
        Ok(())
    }
}

impl Stores {
    /// Fresh in-memory tables.
    pub fn in_memory() -> Self {
        Self {
            modules: Arc::new(InMemoryModuleStore::new()),
            transactions: Arc::new(InMemoryTransactionStore::new()),
            assignments: Arc::new(InMemoryAssignmentStore::new()),
        }
    }
}
