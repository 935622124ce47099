//! Worker-side runtime.
//!
//! A worker owns one [`Configurable`] handler (for instance the engine
//! configuration store), exposes it to the coordinator through a
//! [`WorkerConnection`], and keeps itself registered with the fleet registry
//! through a [`WorkerAgent`].

mod agent;
mod connection;
mod transaction;

pub use agent::{AgentConfig, AgentError, AgentHandle, WorkerAgent};
pub use connection::{ControlSignal, WorkerConnection};
pub use transaction::TransactionManager;

use serde_json::Value;

use crate::compensation::Compensable;
use crate::registry::WorkerState;
use crate::transfer::CommandError;

/// A compensable handler that can also be configured wholesale.
pub trait Configurable: Compensable {
    /// Install a setup document received from the registry. Produces no undos.
    fn apply_setup(&mut self, setup: &Value) -> Result<(), CommandError>;

    /// Drop all local configuration.
    fn reset(&mut self);

    /// State reported with each heartbeat.
    fn health(&self) -> WorkerState {
        WorkerState::Healthy
    }
}
