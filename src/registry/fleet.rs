//! The registry workers talk to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::liveness::LivenessMonitor;
use super::model::{WorkerRecord, WorkerState, WorkerType};
use super::protocol::*;
use super::reset::ModuleReset;
use super::setup::{common_setup, SetupProvider};
use super::store::Stores;
use super::Result;
use crate::transfer::{
    str_arg, Args, Body, CommandError, Envelope, MessageHandler, SpecialCommand, TransportLayer,
    WorkerReply, REGISTRY_ADDRESS, RESET_BROADCAST_ADDRESS,
};

/// Default deadline for the reset instruction sent to an unknown worker.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Owns the worker table and hands out setups.
///
/// Bound at [`REGISTRY_ADDRESS`]; workers register, heartbeat, request their
/// setup and unregister through it.
pub struct SetupCoordinator {
    transport: Arc<dyn TransportLayer>,
    stores: Stores,
    reset: ModuleReset,
    liveness: Arc<LivenessMonitor>,
    providers: HashMap<WorkerType, Arc<dyn SetupProvider>>,
    reset_timeout: Duration,
}

impl SetupCoordinator {
    pub fn new(transport: Arc<dyn TransportLayer>, stores: Stores, liveness_timeout: Duration) -> Self {
        let reset = ModuleReset::new(
            stores.modules.clone(),
            stores.transactions.clone(),
            stores.assignments.clone(),
        );
        let liveness = Arc::new(LivenessMonitor::new(
            stores.modules.clone(),
            reset.clone(),
            liveness_timeout,
        ));
        Self {
            transport,
            stores,
            reset,
            liveness,
            providers: HashMap::new(),
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }

    pub fn with_provider(mut self, worker_type: WorkerType, provider: Arc<dyn SetupProvider>) -> Self {
        self.providers.insert(worker_type, provider);
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn liveness(&self) -> Arc<LivenessMonitor> {
        self.liveness.clone()
    }

    pub fn module_reset(&self) -> &ModuleReset {
        &self.reset
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Listen at the registry address.
    pub async fn bind(self: &Arc<Self>) {
        self.transport
            .register_handler(REGISTRY_ADDRESS, self.clone())
            .await;
    }

    /// Create a record with a fresh id, stamped as just seen.
    pub async fn register(&self, worker_type: WorkerType) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let record = WorkerRecord::registered(&id, worker_type, Utc::now());
        self.stores.modules.put_module(&record).await?;
        info!(module_id = %id, module_type = %worker_type, "Module registered");
        Ok(id)
    }

    /// Delete a record. False for an unknown id.
    pub async fn unregister(&self, module_id: &str) -> Result<bool> {
        let found = self.stores.modules.delete_module(module_id).await?;
        if found {
            info!(module_id = %module_id, "Module unregistered");
        } else {
            debug!(module_id = %module_id, "Unregister for unknown module");
        }
        Ok(found)
    }

    pub async fn heartbeat(&self, module_id: &str, state: WorkerState) -> Result<bool> {
        self.liveness.received_heartbeat(module_id, state).await
    }

    /// Setup document for a registered worker. None for an unknown id.
    pub async fn send_setup(&self, module_id: &str) -> Result<Option<Value>> {
        let Some(record) = self.stores.modules.get_module(module_id).await? else {
            return Ok(None);
        };
        self.stores
            .modules
            .touch_module(module_id, record.state, Utc::now())
            .await?;

        let mut setup = common_setup(self.liveness.timeout());
        match self.providers.get(&record.worker_type) {
            Some(provider) => {
                let live: Vec<String> = self
                    .stores
                    .modules
                    .list_modules_by_type(record.worker_type)
                    .await?
                    .into_iter()
                    .map(|r| r.id)
                    .collect();
                provider.release_orphans(&live).await?;
                match provider.setup_for(module_id).await? {
                    Value::Object(specific) => setup.extend(specific),
                    Value::Null => {}
                    other => {
                        setup.insert(SETUP_KEY.to_string(), other);
                    }
                }
            }
            None if record.worker_type == WorkerType::Unclassified => {}
            None => {
                warn!(module_id = %module_id, module_type = %record.worker_type, "No setup for module type");
                setup.insert(
                    ERROR_KEY.to_string(),
                    Value::from(format!("unsupported moduleType [{}]", record.worker_type)),
                );
            }
        }
        debug!(module_id = %module_id, module_type = %record.worker_type, "Sending setup");
        Ok(Some(Value::Object(setup)))
    }

    /// Registered workers, oldest first.
    pub async fn modules(&self) -> Result<Vec<WorkerRecord>> {
        Ok(self.stores.modules.list_modules().await?)
    }

    pub async fn modules_of_type(&self, worker_type: WorkerType) -> Result<Vec<WorkerRecord>> {
        Ok(self.stores.modules.list_modules_by_type(worker_type).await?)
    }

    /// Forget the whole fleet and tell every worker to re-register.
    ///
    /// Returns the number of broadcast listeners reached.
    pub async fn reset_all(&self) -> Result<usize> {
        self.stores.transactions.clear_transactions().await?;
        self.stores.assignments.release_all().await?;
        self.stores.modules.clear_modules().await?;
        let reached = self
            .transport
            .publish(
                RESET_BROADCAST_ADDRESS,
                Envelope::special(RESET_BROADCAST_ADDRESS, SpecialCommand::ResetConnection)
                    .from_sender(REGISTRY_ADDRESS),
            )
            .await;
        info!(listeners = reached, "Fleet reset");
        Ok(reached)
    }

    /// Tell a worker the registry does not know it, without waiting on the reply.
    fn request_reconnect(&self, module_id: &str) {
        let transport = self.transport.clone();
        let timeout = self.reset_timeout;
        let envelope = Envelope::special(module_id, SpecialCommand::ResetConnection)
            .from_sender(REGISTRY_ADDRESS);
        let module_id = module_id.to_string();
        tokio::spawn(async move {
            match transport.send(envelope, timeout).await {
                Ok(Ok(_)) => debug!(module_id = %module_id, "Unknown module told to reconnect"),
                Ok(Err(e)) => warn!(module_id = %module_id, error = %e, "Reconnect refused"),
                Err(e) => warn!(module_id = %module_id, error = %e, "Reconnect not delivered"),
            }
        });
    }

    async fn handle_command(&self, method: &str, args: &Args) -> WorkerReply {
        match method {
            REGISTER => {
                let worker_type = str_arg(args, MODULE_TYPE_ARG)?
                    .parse::<WorkerType>()
                    .map_err(|e| CommandError::invalid_message(e.to_string()))?;
                let id = self.register(worker_type).await?;
                Ok(json!({ ID_ARG: id }))
            }
            UNREGISTER => {
                let id = str_arg(args, ID_ARG)?;
                if self.unregister(id).await? {
                    Ok(json!({}))
                } else {
                    Ok(json!({ ERROR_KEY: "unknown id", ID_ARG: id }))
                }
            }
            HEARTBEAT => {
                let id = str_arg(args, ID_ARG)?;
                let state = args
                    .get(STATE_ARG)
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default();
                if self.heartbeat(id, state).await? {
                    Ok(json!({}))
                } else {
                    Ok(json!({ UNKNOWN_MODULE_KEY: UNKNOWN_MODULE }))
                }
            }
            SEND_SETUP => {
                let id = str_arg(args, ID_ARG)?;
                match self.send_setup(id).await? {
                    Some(setup) => Ok(setup),
                    None => {
                        warn!(module_id = %id, "Setup requested by unknown module");
                        self.request_reconnect(id);
                        Ok(json!({}))
                    }
                }
            }
            other => Err(CommandError::rejected(format!("unknown method [{other}]"))),
        }
    }
}

#[async_trait]
impl MessageHandler for SetupCoordinator {
    async fn handle(&self, envelope: Envelope) -> WorkerReply {
        match envelope.body {
            Body::Command(command) => self.handle_command(&command.method, &command.args).await,
            Body::Special(special) => Err(CommandError::rejected(format!(
                "unsupported special command [{}]",
                special.name()
            ))),
        }
    }
}
