//! Per-worker-type setup documents.
//!
//! Documents are written as JSON text so their keys survive the config
//! layer's key normalisation untouched:
//!
//! ```yaml
//! setups:
//!   rule_engine:
//!     static: '{"eventTypes": []}'
//!   outbound:
//!     file: outbound.json
//!   ingest:
//!     assigned:
//!       - '{"port": 7001}'
//!       - '{"port": 7002}'
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::ConfigError;
use crate::registry::{AssignedSetup, AssignmentStore, SetupProvider, StaticSetup, WorkerType};

/// Setup source for one worker type. Exactly one of the fields is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// One document, as JSON text, for every worker of the type.
    #[serde(rename = "static")]
    pub static_json: Option<String>,
    /// Path to a JSON file holding the one document. Relative paths resolve
    /// against the config file's directory.
    pub file: Option<String>,
    /// Pool of per-instance documents, as JSON text, each held by one worker.
    pub assigned: Vec<String>,
}

/// Setup sources keyed by worker type name (case-insensitive).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SetupsConfig(BTreeMap<String, SetupConfig>);

impl SetupsConfig {
    pub fn insert(&mut self, worker_type: WorkerType, setup: SetupConfig) {
        self.0.insert(worker_type.as_str().to_lowercase(), setup);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a provider per configured type, seeding assignment pools into
    /// `assignments`.
    pub async fn providers(
        &self,
        assignments: Arc<dyn AssignmentStore>,
        base_dir: &Path,
    ) -> Result<Vec<(WorkerType, Arc<dyn SetupProvider>)>, ConfigError> {
        let mut providers: Vec<(WorkerType, Arc<dyn SetupProvider>)> = Vec::new();
        for (name, setup) in &self.0 {
            let worker_type: WorkerType = name.parse()?;
            let provider: Arc<dyn SetupProvider> = match setup.source(worker_type, base_dir)? {
                Source::Static(document) => Arc::new(StaticSetup::new(document)),
                Source::Assigned(documents) => {
                    let pool = AssignedSetup::new(worker_type, assignments.clone());
                    pool.seed(&documents).await?;
                    Arc::new(pool)
                }
            };
            info!(worker_type = %worker_type, "Setup provider configured");
            providers.push((worker_type, provider));
        }
        Ok(providers)
    }
}

enum Source {
    Static(Value),
    Assigned(Vec<Value>),
}

impl SetupConfig {
    fn source(&self, worker_type: WorkerType, base_dir: &Path) -> Result<Source, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSetup {
            worker_type,
            reason,
        };

        match (&self.static_json, &self.file, self.assigned.is_empty()) {
            (Some(text), None, true) => Ok(Source::Static(
                serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?,
            )),
            (None, Some(file), true) => {
                let path = base_dir.join(file);
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    ConfigError::FileRead(path.display().to_string(), e.to_string())
                })?;
                Ok(Source::Static(
                    serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?,
                ))
            }
            (None, None, false) => self
                .assigned
                .iter()
                .map(|text| serde_json::from_str(text).map_err(|e| invalid(e.to_string())))
                .collect::<Result<Vec<_>, _>>()
                .map(Source::Assigned),
            (None, None, true) => Err(invalid("no setup source given".to_string())),
            _ => Err(invalid("only one setup source may be given".to_string())),
        }
    }
}
