//! Keeps a worker registered with the fleet registry.
//!
//! Lifecycle: register (retried with backoff), bind the connection under the
//! returned id, request and apply the setup, then heartbeat on the period the
//! setup names. An unknown-module heartbeat reply, a failed heartbeat, a
//! `resetConnection` from the registry or a fleet-wide reset broadcast all
//! lead back to a fresh registration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{Configurable, ControlSignal, WorkerConnection};
use crate::registry::protocol;
use crate::registry::WorkerType;
use crate::transfer::{
    Command, CommandError, Envelope, MessageHandler, TransportLayer, WorkerReply,
    REGISTRY_ADDRESS, RESET_BROADCAST_ADDRESS,
};
use crate::utils::retry::{is_retryable, registration_backoff};

/// Default heartbeat period when the setup does not name one.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(20_000);
/// Default deadline for requests to the registry.
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Agent settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub registry_address: String,
    pub request_timeout: Duration,
    pub default_heartbeat: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            registry_address: REGISTRY_ADDRESS.to_string(),
            request_timeout: DEFAULT_REGISTRY_TIMEOUT,
            default_heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Registration failed: {0}")]
    Registration(CommandError),

    #[error("Control channel closed")]
    ControlClosed,
}

/// Why a registered session ended.
enum SessionEnd {
    Reconnect,
    Exit(i32),
}

/// Forwards fleet-wide reset broadcasts into the agent's control channel.
struct ResetListener {
    signals: mpsc::UnboundedSender<ControlSignal>,
}

#[async_trait]
impl MessageHandler for ResetListener {
    async fn handle(&self, _envelope: Envelope) -> WorkerReply {
        let _ = self.signals.send(ControlSignal::ResetConnection);
        Ok(json!({}))
    }
}

/// Handle to a spawned agent.
pub struct AgentHandle {
    pub join: JoinHandle<Result<i32, AgentError>>,
    id: watch::Receiver<Option<String>>,
}

impl AgentHandle {
    /// Currently registered id, published once the setup step is done.
    pub fn id(&self) -> Option<String> {
        self.id.borrow().clone()
    }

    /// Wait until the agent holds a registration different from `previous`.
    pub async fn registered_after(&mut self, previous: Option<&str>) -> Option<String> {
        loop {
            if let Some(id) = self.id.borrow_and_update().clone() {
                if Some(id.as_str()) != previous {
                    return Some(id);
                }
            }
            if self.id.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Wait for the first registration.
    pub async fn registered(&mut self) -> Option<String> {
        self.registered_after(None).await
    }
}

/// Registration and heartbeat loop for one worker.
pub struct WorkerAgent<H: Configurable> {
    transport: Arc<dyn TransportLayer>,
    worker_type: WorkerType,
    connection: Arc<WorkerConnection<H>>,
    config: AgentConfig,
    id: watch::Sender<Option<String>>,
}

/// A live registration.
struct Session {
    id: String,
    heartbeat: Duration,
}

impl<H: Configurable> WorkerAgent<H> {
    pub fn new(
        transport: Arc<dyn TransportLayer>,
        worker_type: WorkerType,
        connection: Arc<WorkerConnection<H>>,
        config: AgentConfig,
    ) -> Self {
        let (id, _) = watch::channel(None);
        Self {
            transport,
            worker_type,
            connection,
            config,
            id,
        }
    }

    pub fn connection(&self) -> &Arc<WorkerConnection<H>> {
        &self.connection
    }

    /// Run the agent on its own task.
    pub fn spawn(self, signals: mpsc::UnboundedReceiver<ControlSignal>) -> AgentHandle {
        let id = self.id.subscribe();
        let join = tokio::spawn(self.run(signals));
        AgentHandle { join, id }
    }

    /// Run until told to exit. Returns the requested exit status.
    ///
    /// `signals` is the receiver paired with this agent's connection.
    pub async fn run(
        self,
        mut signals: mpsc::UnboundedReceiver<ControlSignal>,
    ) -> Result<i32, AgentError> {
        let token = self
            .transport
            .subscribe(
                RESET_BROADCAST_ADDRESS,
                Arc::new(ResetListener {
                    signals: self.connection.signal_sender(),
                }),
            )
            .await;

        let outcome = loop {
            let session = match self.connect().await {
                Ok(session) => session,
                Err(e) => break Err(e),
            };
            let id = session.id.clone();

            match self.serve(&session, &mut signals).await {
                Ok(SessionEnd::Reconnect) => {
                    info!(module_id = %id, module_type = %self.worker_type, "Re-registering");
                    self.disconnect(&id).await;
                    // Resets queued against the old session are already handled.
                    let mut exit = None;
                    while let Ok(signal) = signals.try_recv() {
                        if let ControlSignal::Exit(code) = signal {
                            exit = Some(code);
                        }
                    }
                    if let Some(code) = exit {
                        break Ok(code);
                    }
                }
                Ok(SessionEnd::Exit(code)) => {
                    self.disconnect(&id).await;
                    self.unregister(&id).await;
                    break Ok(code);
                }
                Err(e) => {
                    self.disconnect(&id).await;
                    break Err(e);
                }
            }
        };

        self.transport
            .unsubscribe(RESET_BROADCAST_ADDRESS, token)
            .await;
        outcome
    }

    async fn request(&self, command: Command) -> WorkerReply {
        let envelope = Envelope::command(&self.config.registry_address, command);
        match self
            .transport
            .send(envelope, self.config.request_timeout)
            .await
        {
            Ok(reply) => reply,
            Err(e) => Err(e.into()),
        }
    }

    async fn register_once(&self) -> Result<String, CommandError> {
        let reply = self
            .request(Command::bare(protocol::REGISTER).with_arg(
                protocol::MODULE_TYPE_ARG,
                self.worker_type.to_string(),
            ))
            .await?;
        reply
            .get(protocol::ID_ARG)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CommandError::invalid_message("register reply without id"))
    }

    /// Register, bind and apply setup.
    async fn connect(&self) -> Result<Session, AgentError> {
        let id = (|| self.register_once())
            .retry(registration_backoff())
            .when(is_retryable)
            .notify(|err: &CommandError, dur: Duration| {
                warn!(error = %err, delay = ?dur, "Registration failed, retrying");
            })
            .await
            .map_err(AgentError::Registration)?;

        self.transport
            .register_handler(&id, self.connection.clone())
            .await;
        info!(module_id = %id, module_type = %self.worker_type, "Registered with fleet registry");

        let mut heartbeat = None;
        match self
            .request(Command::bare(protocol::SEND_SETUP).with_arg(protocol::ID_ARG, id.as_str()))
            .await
        {
            Ok(setup) => {
                heartbeat = setup.get(protocol::HEARTBEAT_KEY).and_then(Value::as_u64);
                if let Some(err) = setup.get(protocol::ERROR_KEY) {
                    error!(module_id = %id, error = %err, "Registry refused setup");
                } else if let Err(e) = self.connection.with_handler(|h| h.apply_setup(&setup)).await
                {
                    error!(module_id = %id, error = %e, "Failed to apply setup");
                }
            }
            Err(e) => warn!(module_id = %id, error = %e, "Setup request failed"),
        }

        self.id.send_replace(Some(id.clone()));
        Ok(Session {
            heartbeat: self.heartbeat_period(heartbeat),
            id,
        })
    }

    fn heartbeat_period(&self, setup_heartbeat: Option<u64>) -> Duration {
        match setup_heartbeat {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => self.config.default_heartbeat,
        }
    }

    async fn serve(
        &self,
        session: &Session,
        signals: &mut mpsc::UnboundedReceiver<ControlSignal>,
    ) -> Result<SessionEnd, AgentError> {
        let id = session.id.as_str();
        let period = session.heartbeat;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(module_id = %id, period = ?period, "Heartbeat loop started");

        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(ControlSignal::ResetConnection) => return Ok(SessionEnd::Reconnect),
                    Some(ControlSignal::Exit(code)) => return Ok(SessionEnd::Exit(code)),
                    None => return Err(AgentError::ControlClosed),
                },
                _ = ticker.tick() => {
                    if !self.heartbeat(id).await {
                        return Ok(SessionEnd::Reconnect);
                    }
                }
            }
        }
    }

    /// Send one heartbeat. False when the registration is no longer valid.
    async fn heartbeat(&self, id: &str) -> bool {
        let state = self.connection.with_handler(|h| h.health()).await;
        let command = Command::bare(protocol::HEARTBEAT)
            .with_arg(protocol::ID_ARG, id)
            .with_arg(protocol::STATE_ARG, state.to_string());
        match self.request(command).await {
            Ok(reply) if reply.get(protocol::UNKNOWN_MODULE_KEY).is_some() => {
                warn!(module_id = %id, "Registry no longer knows this worker");
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(module_id = %id, error = %e, "Heartbeat failed");
                false
            }
        }
    }

    async fn disconnect(&self, id: &str) {
        self.transport.unregister_handler(id).await;
        self.connection.reset().await;
        self.id.send_replace(None);
    }

    async fn unregister(&self, id: &str) {
        let command = Command::bare(protocol::UNREGISTER).with_arg(protocol::ID_ARG, id);
        if let Err(e) = self.request(command).await {
            debug!(module_id = %id, error = %e, "Unregister on exit failed");
        }
    }
}
