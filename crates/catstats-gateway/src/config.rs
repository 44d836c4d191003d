//! Gateway configuration
//!
//! Loaded from TOML; every section and field is optional.
//!
//! ```toml
//! [execution]
//! backend_timeout_ms = 60000
//!
//! [planner]
//! default_stat_type = "AVG"
//! default_sampling_interval_secs = 60
//! fallback_window_hours = 168
//! metrics_window_minutes = 60
//!
//! [schema]
//! file = "schema.yaml"
//!
//! [backends]
//! fixture = "fixtures/demo.json"
//! metrics_enabled = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use catstats_core::{SchemaError, SchemaRegistry};
use catstats_query::PlannerConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
}

/// Backend call settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound for every backend call
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,
}

fn default_backend_timeout_ms() -> u64 {
    60_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: default_backend_timeout_ms(),
        }
    }
}

/// Schema source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// YAML schema replacing the built-in catalog
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// In-memory backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// JSON fixture seeding the in-memory backends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture: Option<PathBuf>,
    /// Whether a metrics gateway is configured at all
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            fixture: None,
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.execution.backend_timeout_ms)
    }

    /// Schema registry from the configured file, or the built-in catalog
    pub fn load_registry(&self) -> Result<SchemaRegistry, SchemaError> {
        match &self.schema.file {
            Some(path) => SchemaRegistry::from_file(path),
            None => Ok(SchemaRegistry::builtin()),
        }
    }
}
