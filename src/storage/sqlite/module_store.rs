//! SQLite ModuleStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::registry::{ModuleStore, WorkerRecord, WorkerState, WorkerType};
use crate::storage::schema::{FleetModules, CREATE_MODULES_TABLE};
use crate::storage::{Result, StorageError};

/// SQLite implementation of ModuleStore.
pub struct SqliteModuleStore {
    pool: SqlitePool,
}

impl SqliteModuleStore {
    /// Create a new SQLite module store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_MODULES_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    fn select() -> SelectStatement {
        Query::select()
            .columns([
                FleetModules::Id,
                FleetModules::WorkerType,
                FleetModules::State,
                FleetModules::RegisteredAt,
                FleetModules::LastHeartbeat,
            ])
            .from(FleetModules::Table)
            .order_by(FleetModules::RegisteredAt, Order::Asc)
            .order_by(FleetModules::Id, Order::Asc)
            .to_owned()
    }

    async fn fetch(&self, sql: String) -> Result<Vec<WorkerRecord>> {
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let text: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&text)?.with_timezone(&Utc))
}

fn decode(row: &SqliteRow) -> Result<WorkerRecord> {
    let worker_type: String = row.get("worker_type");
    let state: String = row.get("state");
    Ok(WorkerRecord {
        id: row.get("id"),
        worker_type: worker_type
            .parse::<WorkerType>()
            .map_err(|e| StorageError::InvalidState(e.to_string()))?,
        state: state
            .parse::<WorkerState>()
            .map_err(|e| StorageError::InvalidState(e.to_string()))?,
        registered_at: timestamp(row, "registered_at")?,
        last_heartbeat: timestamp(row, "last_heartbeat")?,
    })
}

#[async_trait]
impl ModuleStore for SqliteModuleStore {
    async fn put_module(&self, record: &WorkerRecord) -> Result<()> {
        let query = Query::insert()
            .into_table(FleetModules::Table)
            .columns([
                FleetModules::Id,
                FleetModules::WorkerType,
                FleetModules::State,
                FleetModules::RegisteredAt,
                FleetModules::LastHeartbeat,
            ])
            .values_panic([
                record.id.as_str().into(),
                record.worker_type.as_str().into(),
                record.state.as_str().into(),
                record.registered_at.to_rfc3339().into(),
                record.last_heartbeat.to_rfc3339().into(),
            ])
            .on_conflict(
                OnConflict::column(FleetModules::Id)
                    .update_columns([
                        FleetModules::WorkerType,
                        FleetModules::State,
                        FleetModules::RegisteredAt,
                        FleetModules::LastHeartbeat,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_module(&self, id: &str) -> Result<Option<WorkerRecord>> {
        let query = Self::select()
            .and_where(Expr::col(FleetModules::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        Ok(self.fetch(query).await?.into_iter().next())
    }

    async fn delete_module(&self, id: &str) -> Result<bool> {
        let query = Query::delete()
            .from_table(FleetModules::Table)
            .and_where(Expr::col(FleetModules::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_modules(&self) -> Result<Vec<WorkerRecord>> {
        let query = Self::select().to_string(SqliteQueryBuilder);
        self.fetch(query).await
    }

    async fn list_modules_by_type(&self, worker_type: WorkerType) -> Result<Vec<WorkerRecord>> {
        let query = Self::select()
            .and_where(Expr::col(FleetModules::WorkerType).eq(worker_type.as_str()))
            .to_string(SqliteQueryBuilder);
        self.fetch(query).await
    }

    async fn touch_module(&self, id: &str, state: WorkerState, at: DateTime<Utc>) -> Result<bool> {
        let query = Query::update()
            .table(FleetModules::Table)
            .value(FleetModules::State, state.as_str())
            .value(FleetModules::LastHeartbeat, at.to_rfc3339())
            .and_where(Expr::col(FleetModules::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_all_modules(&self, at: DateTime<Utc>) -> Result<usize> {
        let query = Query::update()
            .table(FleetModules::Table)
            .value(FleetModules::LastHeartbeat, at.to_rfc3339())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear_modules(&self) -> Result<()> {
        let query = Query::delete()
            .from_table(FleetModules::Table)
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
