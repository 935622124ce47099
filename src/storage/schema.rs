//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Registered workers.
#[derive(Iden)]
pub enum FleetModules {
    #[iden = "fleet_modules"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "worker_type"]
    WorkerType,
    #[iden = "state"]
    State,
    #[iden = "registered_at"]
    RegisteredAt,
    #[iden = "last_heartbeat"]
    LastHeartbeat,
}

/// Workers inside global transactions.
#[derive(Iden)]
pub enum FleetTransactions {
    #[iden = "fleet_transactions"]
    Table,
    #[iden = "tx_id"]
    TxId,
    #[iden = "module_id"]
    ModuleId,
    #[iden = "state"]
    State,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Per-type instance configurations and their holders.
#[derive(Iden)]
pub enum FleetAssignments {
    #[iden = "fleet_assignments"]
    Table,
    #[iden = "worker_type"]
    WorkerType,
    #[iden = "config_id"]
    ConfigId,
    #[iden = "module_id"]
    ModuleId,
    #[iden = "setup_json"]
    SetupJson,
}

/// SQL for creating the worker table.
pub const CREATE_MODULES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fleet_modules (
    id TEXT PRIMARY KEY,
    worker_type TEXT NOT NULL,
    state TEXT NOT NULL,
    registered_at TEXT NOT NULL,
    last_heartbeat TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fleet_modules_type ON fleet_modules(worker_type);
"#;

/// SQL for creating the transaction table.
pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fleet_transactions (
    tx_id TEXT NOT NULL,
    module_id TEXT NOT NULL,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tx_id, module_id)
);

CREATE INDEX IF NOT EXISTS idx_fleet_transactions_module ON fleet_transactions(module_id);
"#;

/// SQL for creating the assignment table.
pub const CREATE_ASSIGNMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fleet_assignments (
    worker_type TEXT NOT NULL,
    config_id TEXT NOT NULL,
    module_id TEXT NULL,
    setup_json TEXT NOT NULL,
    PRIMARY KEY (worker_type, config_id)
);

CREATE INDEX IF NOT EXISTS idx_fleet_assignments_module ON fleet_assignments(module_id);
"#;
