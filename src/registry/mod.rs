//! Fleet registry.
//!
//! Tracks which workers exist, what type each one is and when it last
//! checked in. Workers reach it through [`SetupCoordinator`] at
//! [`crate::transfer::REGISTRY_ADDRESS`]; [`LivenessMonitor`] prunes the ones
//! that stop heartbeating, and [`ModuleReset`] clears everything a pruned
//! worker held.

mod fleet;
mod liveness;
mod model;
mod reset;
mod setup;
mod store;

pub use fleet::{SetupCoordinator, DEFAULT_RESET_TIMEOUT};
pub use liveness::{LivenessMonitor, DEFAULT_LIVENESS_TIMEOUT};
pub use model::{
    Assignment, ParseNameError, TransactionRecord, TransactionState, WorkerRecord, WorkerState,
    WorkerType,
};
pub use reset::ModuleReset;
pub use setup::{common_setup, AssignedSetup, SetupProvider, StaticSetup};
pub use store::{AssignmentStore, ModuleStore, StorageError, Stores, TransactionStore};

use crate::transfer::CommandError;

/// Method names and reply keys of the registry protocol.
pub mod protocol {
    pub const REGISTER: &str = "register";
    pub const UNREGISTER: &str = "unregister";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const SEND_SETUP: &str = "sendSetup";

    pub const MODULE_TYPE_ARG: &str = "moduleType";
    pub const ID_ARG: &str = "id";
    pub const STATE_ARG: &str = "state";

    /// Heartbeat period in a setup document, in milliseconds.
    pub const HEARTBEAT_KEY: &str = "heartbeat";
    /// Non-object type-specific setups are nested under this key.
    pub const SETUP_KEY: &str = "setup";
    pub const ERROR_KEY: &str = "error";
    /// Key of the heartbeat reply for a module the registry does not know.
    pub const UNKNOWN_MODULE_KEY: &str = "ERROR";
    pub const UNKNOWN_MODULE: &str = "Unknown module!";
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised by registry components.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    UnknownName(#[from] ParseNameError),
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownName(e) => CommandError::invalid_message(e.to_string()),
            RegistryError::Storage(e) => CommandError::unknown(e.to_string()),
        }
    }
}
