//! End-to-end fleet tests.
//!
//! A registry, rule-engine workers and the update manager share one
//! in-process transport. Workers register through their agents exactly as
//! the coordinator binary runs them.

use std::sync::Arc;
use std::time::Duration;

use fleet_saga::config::CoordinatorConfig;
use fleet_saga::coordinator::ModuleUpdateManager;
use fleet_saga::engine::EngineConfigStore;
use fleet_saga::registry::{SetupCoordinator, StaticSetup, Stores, WorkerType};
use fleet_saga::transfer::{ChannelTransport, Command, ErrorCode, TransportLayer};
use fleet_saga::worker::{AgentConfig, AgentHandle, WorkerAgent, WorkerConnection};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

struct Fleet {
    transport: Arc<dyn TransportLayer>,
    coordinator: Arc<SetupCoordinator>,
    manager: ModuleUpdateManager,
}

struct Worker {
    id: String,
    connection: Arc<WorkerConnection<EngineConfigStore>>,
    handle: AgentHandle,
}

async fn start_fleet(liveness_timeout: Duration) -> Fleet {
    let transport: Arc<dyn TransportLayer> = Arc::new(ChannelTransport::new());
    let base = json!({ "eventTypes": [{ "name": "Reading" }] });
    let coordinator = Arc::new(
        SetupCoordinator::new(transport.clone(), Stores::in_memory(), liveness_timeout)
            .with_provider(WorkerType::RuleEngine, Arc::new(StaticSetup::new(base))),
    );
    coordinator.bind().await;
    let manager = ModuleUpdateManager::new(
        transport.clone(),
        coordinator.stores(),
        &CoordinatorConfig::default(),
    );
    Fleet {
        transport,
        coordinator,
        manager,
    }
}

async fn start_worker(fleet: &Fleet) -> Worker {
    let (connection, signals) = WorkerConnection::new(EngineConfigStore::default());
    let config = AgentConfig {
        request_timeout: Duration::from_secs(2),
        ..AgentConfig::default()
    };
    let agent = WorkerAgent::new(
        fleet.transport.clone(),
        WorkerType::RuleEngine,
        connection.clone(),
        config,
    );
    let mut handle = agent.spawn(signals);
    let id = tokio::time::timeout(WAIT, handle.registered())
        .await
        .expect("worker should register in time")
        .expect("agent stopped before registering");
    Worker {
        id,
        connection,
        handle,
    }
}

fn register_event_type(name: &str) -> Command {
    Command::bare("registerEventType").with_arg("name", name)
}

fn register_statement(name: &str, query: &str) -> Command {
    Command::bare("registerStatement")
        .with_arg("name", name)
        .with_arg("query", query)
}

#[tokio::test]
async fn test_workers_receive_their_setup() {
    let fleet = start_fleet(Duration::from_secs(60)).await;
    let worker = start_worker(&fleet).await;

    assert!(
        worker
            .connection
            .with_handler(|s| s.has_event_type("Reading"))
            .await
    );
    let registered = fleet
        .coordinator
        .modules_of_type(WorkerType::RuleEngine)
        .await
        .unwrap();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].id, worker.id);
}

#[tokio::test]
async fn test_type_batch_commits_on_every_worker() {
    let fleet = start_fleet(Duration::from_secs(60)).await;
    let a = start_worker(&fleet).await;
    let b = start_worker(&fleet).await;

    let errors = fleet
        .manager
        .run_module_type_commands(vec![
            (WorkerType::RuleEngine, register_event_type("Alarm")),
            (
                WorkerType::RuleEngine,
                register_statement("hot", "select * from Reading where value > 30"),
            ),
        ])
        .await
        .unwrap();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    for worker in [&a, &b] {
        let (alarm, hot) = worker
            .connection
            .with_handler(|s| (s.has_event_type("Alarm"), s.has_statement("hot")))
            .await;
        assert!(alarm && hot, "worker {} missed the batch", worker.id);
        assert!(!worker.connection.in_transaction().await);
    }
}

#[tokio::test]
async fn test_rejection_rolls_back_the_whole_fleet() {
    let fleet = start_fleet(Duration::from_secs(60)).await;
    let a = start_worker(&fleet).await;
    let b = start_worker(&fleet).await;

    // Only worker a already knows Alarm, so only a rejects it below.
    let errors = fleet
        .manager
        .run_module_instance_commands(vec![(a.id.clone(), register_event_type("Alarm"))])
        .await
        .unwrap();
    assert!(errors.is_empty());

    let errors = fleet
        .manager
        .run_module_type_commands(vec![
            (
                WorkerType::RuleEngine,
                register_statement("hot", "select * from Reading where value > 30"),
            ),
            (WorkerType::RuleEngine, register_event_type("Alarm")),
        ])
        .await
        .unwrap();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::CommandNotExecuted);
    assert_eq!(errors[0].module_id.as_deref(), Some(a.id.as_str()));

    let (a_hot, a_alarm) = a
        .connection
        .with_handler(|s| (s.has_statement("hot"), s.has_event_type("Alarm")))
        .await;
    assert!(!a_hot, "statement on a should be compensated");
    assert!(a_alarm, "earlier committed batch survives");

    let (b_hot, b_alarm) = b
        .connection
        .with_handler(|s| (s.has_statement("hot"), s.has_event_type("Alarm")))
        .await;
    assert!(!b_hot && !b_alarm, "b should be back where it started");
}

#[tokio::test]
async fn test_vanished_worker_is_excluded_and_batch_retried() {
    let fleet = start_fleet(Duration::from_secs(60)).await;
    let live = start_worker(&fleet).await;
    let gone = start_worker(&fleet).await;

    // The worker dies without unregistering.
    gone.handle.join.abort();
    fleet.transport.unregister_handler(&gone.id).await;

    let errors = fleet
        .manager
        .run_module_type_commands(vec![(WorkerType::RuleEngine, register_event_type("Alarm"))])
        .await
        .unwrap();
    assert!(errors.is_empty(), "retry without the vanished worker should succeed: {errors:?}");

    assert!(live.connection.with_handler(|s| s.has_event_type("Alarm")).await);
    let remaining: Vec<_> = fleet
        .coordinator
        .modules()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(remaining, vec![live.id.clone()]);
}

#[tokio::test]
async fn test_forgotten_worker_registers_again_on_heartbeat() {
    // 400 ms liveness gives a 199 ms heartbeat period.
    let fleet = start_fleet(Duration::from_millis(400)).await;
    let mut worker = start_worker(&fleet).await;

    assert!(fleet.coordinator.unregister(&worker.id).await.unwrap());

    let new_id = tokio::time::timeout(WAIT, worker.handle.registered_after(Some(worker.id.as_str())))
        .await
        .expect("worker should re-register in time")
        .expect("agent stopped");
    assert_ne!(new_id, worker.id);
    assert!(
        !fleet.transport.unregister_handler(&worker.id).await,
        "old address is no longer bound"
    );
    assert!(
        worker
            .connection
            .with_handler(|s| s.has_event_type("Reading"))
            .await,
        "setup is applied again after re-registration"
    );
}

#[tokio::test]
async fn test_fleet_reset_makes_every_worker_reregister() {
    let fleet = start_fleet(Duration::from_secs(60)).await;
    let mut a = start_worker(&fleet).await;
    let mut b = start_worker(&fleet).await;

    let reached = fleet.coordinator.reset_all().await.unwrap();
    assert_eq!(reached, 2);

    for worker in [&mut a, &mut b] {
        let new_id = tokio::time::timeout(WAIT, worker.handle.registered_after(Some(worker.id.as_str())))
            .await
            .expect("worker should re-register in time")
            .expect("agent stopped");
        assert_ne!(new_id, worker.id);
    }
    assert_eq!(fleet.coordinator.modules().await.unwrap().len(), 2);
}
