//! Fleet-side transaction coordination.
//!
//! A batch of [`TransactionalCommandTask`]s is driven through every target
//! worker's [`ModuleResource`] by [`ModuleTransactionCoordinator`]: begin,
//! command, verify, then commit everywhere or roll back everywhere.
//! [`ModuleUpdateManager`] wraps that with recovery from workers that have
//! disappeared without the registry noticing.

mod executor;
mod resource;
mod task;
mod update;

pub use executor::{gone_modules, ModuleTransactionCoordinator, TaskOutcome};
pub use resource::{ModuleResource, ResourceError, ResourcePool};
pub use task::{AcceptAll, NoErrorMember, ResultVerifier, TransactionalCommandTask};
pub use update::ModuleUpdateManager;
