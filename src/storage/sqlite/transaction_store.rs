//! SQLite TransactionStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use crate::registry::{TransactionRecord, TransactionState, TransactionStore};
use crate::storage::schema::{FleetTransactions, CREATE_TRANSACTIONS_TABLE};
use crate::storage::{Result, StorageError};

/// SQLite implementation of TransactionStore.
pub struct SqliteTransactionStore {
    pool: SqlitePool,
}

impl SqliteTransactionStore {
    /// Create a new SQLite transaction store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_TRANSACTIONS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for SqliteTransactionStore {
    async fn put_transaction(&self, record: &TransactionRecord) -> Result<()> {
        let updated_at = chrono::Utc::now().to_rfc3339();

        let query = Query::insert()
            .into_table(FleetTransactions::Table)
            .columns([
                FleetTransactions::TxId,
                FleetTransactions::ModuleId,
                FleetTransactions::State,
                FleetTransactions::UpdatedAt,
            ])
            .values_panic([
                record.tx_id.as_str().into(),
                record.module_id.as_str().into(),
                record.state.as_str().into(),
                updated_at.into(),
            ])
            .on_conflict(
                OnConflict::columns([FleetTransactions::TxId, FleetTransactions::ModuleId])
                    .update_columns([FleetTransactions::State, FleetTransactions::UpdatedAt])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_transactions(&self, tx_id: &str) -> Result<Vec<TransactionRecord>> {
        let query = Query::select()
            .columns([
                FleetTransactions::TxId,
                FleetTransactions::ModuleId,
                FleetTransactions::State,
            ])
            .from(FleetTransactions::Table)
            .and_where(Expr::col(FleetTransactions::TxId).eq(tx_id))
            .order_by(FleetTransactions::ModuleId, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let state: String = row.get("state");
                Ok(TransactionRecord {
                    tx_id: row.get("tx_id"),
                    module_id: row.get("module_id"),
                    state: state
                        .parse::<TransactionState>()
                        .map_err(|e| StorageError::InvalidState(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn delete_transactions(&self, tx_id: &str) -> Result<usize> {
        let query = Query::delete()
            .from_table(FleetTransactions::Table)
            .and_where(Expr::col(FleetTransactions::TxId).eq(tx_id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_module_transactions(&self, module_id: &str) -> Result<usize> {
        let query = Query::delete()
            .from_table(FleetTransactions::Table)
            .and_where(Expr::col(FleetTransactions::ModuleId).eq(module_id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear_transactions(&self) -> Result<()> {
        let query = Query::delete()
            .from_table(FleetTransactions::Table)
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
