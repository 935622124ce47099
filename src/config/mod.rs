//! Application configuration.
//!
//! Loaded from YAML files and `FLEET__*` environment variables into a single
//! [`Config`].

mod setups;

pub use setups::{SetupConfig, SetupsConfig};

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::registry::{ParseNameError, RegistryError, WorkerType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "fleet.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FLEET_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FLEET";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FLEET_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Heartbeat liveness configuration.
    pub liveness: LivenessConfig,
    /// Batch execution deadlines and retry bound.
    pub coordinator: CoordinatorConfig,
    /// Setup documents per worker type.
    pub setups: SetupsConfig,
    /// Workers hosted inside the coordinator process.
    pub local: LocalConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type (memory, sqlite).
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Path to database file.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "sqlite".to_string(),
            path: "./data/fleet.db".to_string(),
        }
    }
}

/// Liveness configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// A worker silent for longer than this is reset. Also the sweep period.
    pub timeout_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self { timeout_ms: 60_000 }
    }
}

impl LivenessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Default deadline for a task's command.
    pub task_timeout_ms: u64,
    /// Deadline for transaction begin/commit/rollback messages.
    pub control_timeout_ms: u64,
    /// Deadline for the reconnect instruction sent to unknown workers.
    pub reset_timeout_ms: u64,
    /// Rounds of retry-with-exclusion before giving up.
    pub max_retry_depth: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            task_timeout_ms: 3_000,
            control_timeout_ms: 5_000,
            reset_timeout_ms: 5_000,
            max_retry_depth: 3,
        }
    }
}

impl CoordinatorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// In-process workers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Rule-engine workers to run on the in-process transport.
    pub rule_engines: usize,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Failed to read setup file '{0}': {1}")]
    FileRead(String, String),

    #[error("Invalid setup for {worker_type}: {reason}")]
    InvalidSetup {
        worker_type: WorkerType,
        reason: String,
    },

    #[error(transparent)]
    UnknownWorkerType(#[from] ParseNameError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `fleet.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `FLEET_CONFIG` environment variable (if set)
    /// 4. Environment variables with `FLEET` prefix, `__` separated
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Create config for testing: in-memory storage, defaults elsewhere.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                storage_type: "memory".to_string(),
                path: String::new(),
            },
            ..Self::default()
        }
    }
}

/// Get the base directory for resolving file references in configs.
///
/// Returns the parent directory of `FLEET_CONFIG` if set, otherwise current directory.
pub fn config_base_dir() -> PathBuf {
    if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = std::path::Path::new(&config_path);
        path.parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        PathBuf::from(".")
    }
}

#[cfg(test)]
mod tests;
