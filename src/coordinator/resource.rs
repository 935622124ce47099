//! Per-worker transactional handle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::transfer::{
    Command, CommandError, Envelope, ErrorCode, TransportError, TransportLayer,
};

/// Result type for [`ModuleResource`] operations.
pub type Result<T> = std::result::Result<T, ResourceError>;

/// Failure of an exchange with one worker.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// The worker could not be reached or did not answer in time.
    #[error("Connection to module {module_id} failed: {source}")]
    Connection {
        module_id: String,
        #[source]
        source: TransportError,
    },

    /// The worker answered with an error.
    #[error("Module {module_id} rejected {method}: {error}")]
    Rejected {
        module_id: String,
        method: String,
        error: CommandError,
    },

    /// The handle's transaction state does not allow the call.
    #[error("Inconsistent transaction state on module {module_id}: {reason}")]
    Inconsistent { module_id: String, reason: String },
}

impl ResourceError {
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ResourceError::Connection { .. })
    }
}

impl From<ResourceError> for CommandError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::Connection { module_id, source } => {
                CommandError::from(source).with_module(module_id)
            }
            ResourceError::Rejected {
                module_id, error, ..
            } => error.with_module(module_id),
            ResourceError::Inconsistent { module_id, reason } => {
                CommandError::new(ErrorCode::CommandNotExecuted, reason).with_module(module_id)
            }
        }
    }
}

/// Drives one worker through begin, command, commit or rollback.
///
/// At most one transaction is open per handle. The open state is released on
/// commit and rollback whether or not the worker acknowledged, so a lost
/// reply never leaves the worker blocked for later batches.
pub struct ModuleResource {
    module_id: String,
    transport: Arc<dyn TransportLayer>,
    control_timeout: Duration,
    open: Mutex<Option<String>>,
}

impl ModuleResource {
    pub fn new(
        module_id: impl Into<String>,
        transport: Arc<dyn TransportLayer>,
        control_timeout: Duration,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            transport,
            control_timeout,
            open: Mutex::new(None),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Id of the open transaction, if any.
    pub async fn current_transaction(&self) -> Option<String> {
        self.open.lock().await.clone()
    }

    /// Tell the worker to begin `tx_id`. The transaction is open only once
    /// the worker acknowledged.
    pub async fn start(&self, tx_id: &str) -> Result<()> {
        let mut open = self.open.lock().await;
        if let Some(current) = open.as_deref() {
            return Err(self.inconsistent(format!("transaction {current} already open")));
        }
        self.exchange(Command::transaction_begin(tx_id), self.control_timeout)
            .await?;
        *open = Some(tx_id.to_string());
        debug!(module_id = %self.module_id, tx_id = %tx_id, "Transaction started");
        Ok(())
    }

    /// Forward `command` with its own deadline.
    pub async fn send_command(&self, command: &Command, timeout: Duration) -> Result<Value> {
        self.exchange(command.clone(), timeout).await
    }

    pub async fn commit(&self, tx_id: &str) -> Result<()> {
        let mut open = self.open.lock().await;
        match open.as_deref() {
            None => return Err(self.inconsistent(format!("commit of {tx_id} without open transaction"))),
            Some(current) if current != tx_id => {
                return Err(self.inconsistent(format!("commit of {tx_id} while {current} is open")))
            }
            Some(_) => {}
        }
        let result = self
            .exchange(Command::transaction_commit(tx_id), self.control_timeout)
            .await;
        *open = None;
        result.map(|_| ())
    }

    /// Roll back `tx_id`. A no-op when nothing is open.
    pub async fn rollback(&self, tx_id: &str) -> Result<()> {
        let mut open = self.open.lock().await;
        match open.as_deref() {
            None => {
                debug!(module_id = %self.module_id, tx_id = %tx_id, "Nothing to roll back");
                return Ok(());
            }
            Some(current) if current != tx_id => {
                return Err(self.inconsistent(format!("rollback of {tx_id} while {current} is open")))
            }
            Some(_) => {}
        }
        let result = self
            .exchange(Command::transaction_rollback(tx_id), self.control_timeout)
            .await;
        *open = None;
        if let Err(e) = &result {
            warn!(module_id = %self.module_id, tx_id = %tx_id, error = %e, "Rollback not acknowledged");
        }
        result.map(|_| ())
    }

    async fn exchange(&self, command: Command, timeout: Duration) -> Result<Value> {
        let method = command.method.clone();
        match self
            .transport
            .send(Envelope::command(&self.module_id, command), timeout)
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ResourceError::Rejected {
                module_id: self.module_id.clone(),
                method,
                error,
            }),
            Err(source) => Err(ResourceError::Connection {
                module_id: self.module_id.clone(),
                source,
            }),
        }
    }

    fn inconsistent(&self, reason: String) -> ResourceError {
        ResourceError::Inconsistent {
            module_id: self.module_id.clone(),
            reason,
        }
    }
}

/// One [`ModuleResource`] per worker id, created on first use.
pub struct ResourcePool {
    transport: Arc<dyn TransportLayer>,
    control_timeout: Duration,
    resources: RwLock<HashMap<String, Arc<ModuleResource>>>,
}

impl ResourcePool {
    pub fn new(transport: Arc<dyn TransportLayer>, control_timeout: Duration) -> Self {
        Self {
            transport,
            control_timeout,
            resources: RwLock::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn TransportLayer> {
        &self.transport
    }

    pub async fn get(&self, module_id: &str) -> Arc<ModuleResource> {
        if let Some(resource) = self.resources.read().await.get(module_id) {
            return resource.clone();
        }
        self.resources
            .write()
            .await
            .entry(module_id.to_string())
            .or_insert_with(|| {
                Arc::new(ModuleResource::new(
                    module_id,
                    self.transport.clone(),
                    self.control_timeout,
                ))
            })
            .clone()
    }

    /// Drop the handle of a worker that is gone.
    pub async fn remove(&self, module_id: &str) -> bool {
        self.resources.write().await.remove(module_id).is_some()
    }

    /// Drop the handles of workers missing from `live`. A handle a running
    /// batch still holds is kept. Returns how many were dropped.
    pub async fn retain(&self, live: &HashSet<String>) -> usize {
        let mut resources = self.resources.write().await;
        let before = resources.len();
        resources.retain(|module_id, resource| {
            live.contains(module_id) || Arc::strong_count(resource) > 1
        });
        before - resources.len()
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.resources.read().await.is_empty()
    }
}
