//! Engine configuration store.
//!
//! The rule-evaluation worker keeps the set of event types, statements,
//! listeners and virtual sensors its engine runs. Every change goes through
//! [`EngineConfigStore`], which guards each registration against duplicates
//! and hands back the compensating action reversing it. The engine itself
//! sits behind [`RuleEngine`]; query evaluation is not modelled here.

mod memory;
mod store;

pub use memory::InMemoryEngine;
pub use store::EngineConfigStore;

use serde_json::Value;

use crate::compensation::Operation;
use crate::transfer::CommandError;

/// Keys of engine command arguments and setup documents.
pub mod keys {
    pub const NAME: &str = "name";
    pub const CONFIG: &str = "config";
    pub const QUERY: &str = "query";
    pub const TARGETS: &str = "targets";
    pub const ID: &str = "id";
    pub const STATEMENT_NAME: &str = "statementName";
    pub const LISTENER_ADDRESS: &str = "address";
    pub const EVENT_TYPES: &str = "eventTypes";
    pub const STATEMENTS: &str = "statements";
    pub const LISTENERS: &str = "listeners";
    pub const VIRTUAL_SENSORS: &str = "virtualSensors";
    pub const VIRTUAL_SENSOR_ID: &str = "virtualSensorId";
    pub const RESULT_EVENT_TYPE: &str = "resultEventType";
    pub const RESULT_STATEMENT: &str = "resultStatement";
    pub const RESULT_STATEMENT_NAME: &str = "resultStatementName";
    pub const LISTENER_COUNT: &str = "listenerCount";
    pub const PROCESSED_EVENTS: &str = "processedEvents";
}

/// Rejection raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        CommandError::rejected(err.0)
    }
}

/// The evaluation engine a rule worker drives.
pub trait RuleEngine: Send {
    fn add_event_type(&mut self, name: &str, definition: &Value) -> Result<(), EngineError>;
    fn remove_event_type(&mut self, name: &str) -> Result<(), EngineError>;
    fn has_event_type(&self, name: &str) -> bool;
    fn event_type_names(&self) -> Vec<String>;

    fn create_statement(&mut self, name: &str, query: &str) -> Result<(), EngineError>;
    fn destroy_statement(&mut self, name: &str) -> Result<(), EngineError>;
    fn statement_text(&self, name: &str) -> Option<String>;
    fn statement_names(&self) -> Vec<String>;

    /// Attach one listener to a statement's output.
    fn attach_listener(&mut self, statement: &str) -> Result<(), EngineError>;
    fn detach_listener(&mut self, statement: &str) -> Result<(), EngineError>;
    fn has_listeners(&self, statement: &str) -> bool;

    /// Feed one event through the engine.
    fn send_event(&mut self, event_type: &str, event: &Value) -> Result<(), EngineError>;

    /// Number of events evaluated so far.
    fn processed_events(&self) -> u64;

    /// Remove every statement, listener and event type.
    fn destroy_all(&mut self);
}

/// Operations of the engine configuration store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    RegisterEventType,
    UnregisterEventType,
    RegisterStatement,
    UnregisterStatement,
    RegisterUpdateListener,
    UnregisterUpdateListener,
    RegisterVirtualSensor,
    UnregisterVirtualSensor,
    UpdateVirtualSensorTargets,
    GetStatements,
    GetEventTypes,
    GetUpdateListenerCount,
    CountProcessedEvents,
    Reset,
}

impl Operation for EngineOp {
    fn method_name(&self) -> &'static str {
        match self {
            EngineOp::RegisterEventType => "registerEventType",
            EngineOp::UnregisterEventType => "unregisterEventType",
            EngineOp::RegisterStatement => "registerStatement",
            EngineOp::UnregisterStatement => "unregisterStatement",
            EngineOp::RegisterUpdateListener => "registerUpdateListener",
            EngineOp::UnregisterUpdateListener => "unregisterUpdateListener",
            EngineOp::RegisterVirtualSensor => "registerVirtualSensor",
            EngineOp::UnregisterVirtualSensor => "unregisterVirtualSensor",
            EngineOp::UpdateVirtualSensorTargets => "updateVirtualSensorTargets",
            EngineOp::GetStatements => "getStatements",
            EngineOp::GetEventTypes => "getEventTypes",
            EngineOp::GetUpdateListenerCount => "getUpdateListenerCount",
            EngineOp::CountProcessedEvents => "countProcessedEvents",
            EngineOp::Reset => "reset",
        }
    }
}

#[cfg(test)]
mod tests;
