//! SQLite implementations of the registry stores.

mod assignment_store;
mod module_store;
mod transaction_store;

pub use assignment_store::SqliteAssignmentStore;
pub use module_store::SqliteModuleStore;
pub use transaction_store::SqliteTransactionStore;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::registry::Stores;

use super::Result;

/// Create every registry table on `pool` and wrap it in the store trio.
pub async fn sqlite_stores(pool: SqlitePool) -> Result<Stores> {
    let modules = SqliteModuleStore::new(pool.clone());
    modules.init().await?;

    let transactions = SqliteTransactionStore::new(pool.clone());
    transactions.init().await?;

    let assignments = SqliteAssignmentStore::new(pool);
    assignments.init().await?;

    Ok(Stores {
        modules: Arc::new(modules),
        transactions: Arc::new(transactions),
        assignments: Arc::new(assignments),
    })
}
