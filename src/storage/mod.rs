//! Storage implementations of the registry tables.

use tracing::{error, info};

use crate::config::StorageConfig;
use crate::registry::Stores;

pub use crate::registry::StorageError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryAssignmentStore, InMemoryModuleStore, InMemoryTransactionStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{sqlite_stores, SqliteAssignmentStore, SqliteModuleStore, SqliteTransactionStore};

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Stores> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type.as_str() {
        "memory" => Ok(Stores::in_memory()),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;
            sqlite_stores(pool).await
        }
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => {
            error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::UnknownBackend("sqlite".to_string()))
        }
        other => {
            error!("Unknown storage type: {}", other);
            Err(StorageError::UnknownBackend(other.to_string()))
        }
    }
}
