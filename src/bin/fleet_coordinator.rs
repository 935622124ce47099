//! Fleet coordinator binary.
//!
//! Hosts the fleet registry on an in-process transport, prunes dead workers
//! and optionally runs rule-engine workers alongside it.
//!
//! The process has no administrative surface, so it never submits
//! configuration batches itself. Batches are driven through the library:
//! build a `fleet_saga::coordinator::ModuleUpdateManager` over the same
//! transport and stores (see `tests/fleet_integration.rs`).

use std::sync::Arc;

use tracing::{error, info};

use fleet_saga::config::{config_base_dir, Config};
use fleet_saga::engine::EngineConfigStore;
use fleet_saga::registry::{SetupCoordinator, WorkerType};
use fleet_saga::storage::init_storage;
use fleet_saga::transfer::{ChannelTransport, TransportLayer};
use fleet_saga::utils::bootstrap::init_tracing;
use fleet_saga::worker::{AgentConfig, WorkerAgent, WorkerConnection};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting fleet coordinator");
    let stores = init_storage(&config.storage).await?;
    info!("Storage initialized");

    let transport: Arc<dyn TransportLayer> = Arc::new(ChannelTransport::new());

    let mut coordinator =
        SetupCoordinator::new(transport.clone(), stores.clone(), config.liveness.timeout())
            .with_reset_timeout(config.coordinator.reset_timeout());
    for (worker_type, provider) in config
        .setups
        .providers(stores.assignments.clone(), &config_base_dir())
        .await?
    {
        coordinator = coordinator.with_provider(worker_type, provider);
    }
    let coordinator = Arc::new(coordinator);
    coordinator.bind().await;

    let liveness = coordinator.liveness();
    liveness.init().await?;
    tokio::spawn(liveness.run());

    for _ in 0..config.local.rule_engines {
        let (connection, signals) = WorkerConnection::new(EngineConfigStore::default());
        WorkerAgent::new(
            transport.clone(),
            WorkerType::RuleEngine,
            connection,
            AgentConfig::default(),
        )
        .spawn(signals);
    }
    if config.local.rule_engines > 0 {
        info!(count = config.local.rule_engines, "Local rule engines started");
    }

    info!("Fleet coordinator ready");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
