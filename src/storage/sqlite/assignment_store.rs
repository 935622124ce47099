//! SQLite AssignmentStore implementation.

use async_trait::async_trait;
use sea_query::{
    Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder, UpdateStatement,
};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::registry::{Assignment, AssignmentStore, WorkerType};
use crate::storage::schema::{FleetAssignments, CREATE_ASSIGNMENTS_TABLE};
use crate::storage::{Result, StorageError};

/// SQLite implementation of AssignmentStore.
pub struct SqliteAssignmentStore {
    pool: SqlitePool,
}

impl SqliteAssignmentStore {
    /// Create a new SQLite assignment store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_ASSIGNMENTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn select(worker_type: WorkerType) -> SelectStatement {
        Query::select()
            .columns([
                FleetAssignments::WorkerType,
                FleetAssignments::ConfigId,
                FleetAssignments::ModuleId,
                FleetAssignments::SetupJson,
            ])
            .from(FleetAssignments::Table)
            .and_where(Expr::col(FleetAssignments::WorkerType).eq(worker_type.as_str()))
            .order_by(FleetAssignments::ConfigId, Order::Asc)
            .to_owned()
    }

    async fn fetch_one(&self, sql: String) -> Result<Option<Assignment>> {
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn free(&self, sql: String) -> Result<usize> {
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}

/// Renders `query` as an update that clears the holder of every matched row.
fn free_sql(mut query: UpdateStatement) -> String {
    query
        .value(FleetAssignments::ModuleId, Option::<String>::None)
        .to_string(SqliteQueryBuilder)
}

fn decode(row: &SqliteRow) -> Result<Assignment> {
    let worker_type: String = row.get("worker_type");
    let setup_json: String = row.get("setup_json");
    Ok(Assignment {
        worker_type: worker_type
            .parse::<WorkerType>()
            .map_err(|e| StorageError::InvalidState(e.to_string()))?,
        config_id: row.get("config_id"),
        module_id: row.get("module_id"),
        setup: serde_json::from_str(&setup_json)?,
    })
}

#[async_trait]
impl AssignmentStore for SqliteAssignmentStore {
    async fn put_config(
        &self,
        worker_type: WorkerType,
        config_id: &str,
        setup: &Value,
    ) -> Result<()> {
        let setup_json = serde_json::to_string(setup)?;

        let query = Query::insert()
            .into_table(FleetAssignments::Table)
            .columns([
                FleetAssignments::WorkerType,
                FleetAssignments::ConfigId,
                FleetAssignments::SetupJson,
            ])
            .values_panic([
                worker_type.as_str().into(),
                config_id.into(),
                setup_json.into(),
            ])
            .on_conflict(
                OnConflict::columns([FleetAssignments::WorkerType, FleetAssignments::ConfigId])
                    .update_column(FleetAssignments::SetupJson)
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_assignments(&self, worker_type: WorkerType) -> Result<Vec<Assignment>> {
        let sql = Self::select(worker_type).to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }

    async fn claim(&self, worker_type: WorkerType, module_id: &str) -> Result<Option<Assignment>> {
        let held = Self::select(worker_type)
            .and_where(Expr::col(FleetAssignments::ModuleId).eq(module_id))
            .limit(1)
            .to_string(SqliteQueryBuilder);
        if let Some(assignment) = self.fetch_one(held).await? {
            return Ok(Some(assignment));
        }

        // A concurrent claim may win the row between select and update; try the next one.
        loop {
            let first_free = Self::select(worker_type)
                .and_where(Expr::col(FleetAssignments::ModuleId).is_null())
                .limit(1)
                .to_string(SqliteQueryBuilder);
            let Some(mut assignment) = self.fetch_one(first_free).await? else {
                return Ok(None);
            };

            let update = Query::update()
                .table(FleetAssignments::Table)
                .value(FleetAssignments::ModuleId, module_id)
                .and_where(Expr::col(FleetAssignments::WorkerType).eq(worker_type.as_str()))
                .and_where(Expr::col(FleetAssignments::ConfigId).eq(assignment.config_id.as_str()))
                .and_where(Expr::col(FleetAssignments::ModuleId).is_null())
                .to_string(SqliteQueryBuilder);
            let result = sqlx::query(&update).execute(&self.pool).await?;
            if result.rows_affected() == 1 {
                assignment.module_id = Some(module_id.to_string());
                return Ok(Some(assignment));
            }
        }
    }

    async fn release_module(&self, module_id: &str) -> Result<usize> {
        let sql = free_sql(
            Query::update()
                .table(FleetAssignments::Table)
                .and_where(Expr::col(FleetAssignments::ModuleId).eq(module_id))
                .to_owned(),
        );
        self.free(sql).await
    }

    async fn release_orphans(&self, worker_type: WorkerType, live: &[String]) -> Result<usize> {
        let sql = {
            let mut query = Query::update()
                .table(FleetAssignments::Table)
                .and_where(Expr::col(FleetAssignments::WorkerType).eq(worker_type.as_str()))
                .and_where(Expr::col(FleetAssignments::ModuleId).is_not_null())
                .to_owned();
            if !live.is_empty() {
                query.and_where(
                    Expr::col(FleetAssignments::ModuleId).is_not_in(live.iter().cloned()),
                );
            }
            free_sql(query)
        };
        self.free(sql).await
    }

    async fn release_all(&self) -> Result<()> {
        let sql = free_sql(Query::update().table(FleetAssignments::Table).to_owned());
        self.free(sql).await?;
        Ok(())
    }
}
