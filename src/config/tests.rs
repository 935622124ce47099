use std::io::Write;
use std::time::Duration;

use serde_json::json;
use serial_test::serial;

use super::*;
use crate::registry::{AssignmentStore, Stores};

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.storage.storage_type, "sqlite");
    assert_eq!(config.storage.path, "./data/fleet.db");
    assert_eq!(config.liveness.timeout(), Duration::from_secs(60));
    assert_eq!(config.coordinator.max_retry_depth, 3);
    assert_eq!(config.coordinator.task_timeout(), Duration::from_secs(3));
    assert!(config.setups.is_empty());
}

#[test]
fn test_config_for_test_uses_memory() {
    let config = Config::for_test();
    assert_eq!(config.storage.storage_type, "memory");
}

#[test]
fn test_yaml_sections_deserialize() {
    let yaml = r#"
storage:
  type: memory
liveness:
  timeout_ms: 4000
coordinator:
  max_retry_depth: 5
setups:
  RULE_ENGINE:
    static: '{"eventTypes": []}'
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.storage.storage_type, "memory");
    assert_eq!(config.storage.path, "./data/fleet.db");
    assert_eq!(config.liveness.timeout_ms, 4000);
    assert_eq!(config.coordinator.max_retry_depth, 5);
    assert_eq!(config.coordinator.control_timeout_ms, 5000);
    assert!(!config.setups.is_empty());
}

#[test]
#[serial]
fn test_load_layers_file_then_environment() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "liveness:\n  timeout_ms: 4000\nstorage:\n  type: memory").unwrap();

    std::env::set_var("FLEET__LIVENESS__TIMEOUT_MS", "9000");
    let loaded = Config::load(file.path().to_str());
    std::env::remove_var("FLEET__LIVENESS__TIMEOUT_MS");

    let config = loaded.unwrap();
    assert_eq!(config.storage.storage_type, "memory");
    assert_eq!(config.liveness.timeout_ms, 9000);
}

#[test]
#[serial]
fn test_load_missing_explicit_file_fails() {
    assert!(matches!(
        Config::load(Some("/nonexistent/fleet.yaml")),
        Err(ConfigError::Load(_))
    ));
}

#[test]
#[serial]
fn test_config_base_dir_follows_env() {
    std::env::set_var(CONFIG_ENV_VAR, "/etc/fleet/fleet.yaml");
    let dir = config_base_dir();
    std::env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(dir, PathBuf::from("/etc/fleet"));
    assert_eq!(config_base_dir(), PathBuf::from("."));
}

#[tokio::test]
async fn test_providers_seed_assignment_pools() {
    let stores = Stores::in_memory();
    let mut setups = SetupsConfig::default();
    setups.insert(
        WorkerType::Ingest,
        SetupConfig {
            assigned: vec![r#"{"port": 7001}"#.to_string(), r#"{"port": 7002}"#.to_string()],
            ..SetupConfig::default()
        },
    );
    setups.insert(
        WorkerType::RuleEngine,
        SetupConfig {
            static_json: Some(r#"{"eventTypes": []}"#.to_string()),
            ..SetupConfig::default()
        },
    );

    let providers = setups
        .providers(stores.assignments.clone(), std::path::Path::new("."))
        .await
        .unwrap();
    assert_eq!(providers.len(), 2);

    let pool = stores
        .assignments
        .list_assignments(WorkerType::Ingest)
        .await
        .unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!(pool[0].config_id, "ingest-0");
    assert_eq!(pool[1].setup, json!({"port": 7002}));

    let (_, engine) = providers
        .iter()
        .find(|(t, _)| *t == WorkerType::RuleEngine)
        .unwrap();
    assert_eq!(engine.setup_for("any").await.unwrap(), json!({"eventTypes": []}));
}

#[tokio::test]
async fn test_providers_read_setup_file_relative_to_base() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("outbound.json"), r#"{"url": "http://sink"}"#).unwrap();

    let mut setups = SetupsConfig::default();
    setups.insert(
        WorkerType::Outbound,
        SetupConfig {
            file: Some("outbound.json".to_string()),
            ..SetupConfig::default()
        },
    );

    let providers = setups
        .providers(Stores::in_memory().assignments, dir.path())
        .await
        .unwrap();
    assert_eq!(
        providers[0].1.setup_for("w").await.unwrap(),
        json!({"url": "http://sink"})
    );
}

#[tokio::test]
async fn test_providers_reject_bad_setups() {
    let assignments = Stores::in_memory().assignments;
    let base = std::path::Path::new(".");

    let mut both = SetupsConfig::default();
    both.insert(
        WorkerType::Ingest,
        SetupConfig {
            static_json: Some("{}".to_string()),
            assigned: vec!["{}".to_string()],
            ..SetupConfig::default()
        },
    );
    assert!(matches!(
        both.providers(assignments.clone(), base).await,
        Err(ConfigError::InvalidSetup { worker_type: WorkerType::Ingest, .. })
    ));

    let mut malformed = SetupsConfig::default();
    malformed.insert(
        WorkerType::Outbound,
        SetupConfig {
            static_json: Some("{not json".to_string()),
            ..SetupConfig::default()
        },
    );
    assert!(matches!(
        malformed.providers(assignments.clone(), base).await,
        Err(ConfigError::InvalidSetup { .. })
    ));

    let unknown: SetupsConfig = serde_yaml::from_str("toaster:\n  static: '{}'\n").unwrap();
    assert!(matches!(
        unknown.providers(assignments, base).await,
        Err(ConfigError::UnknownWorkerType(_))
    ));
}
