//! Configuration for the coordinator.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use proctor_common::{ProctorError, Result};
use proctor_gateway::DependencyConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Main coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Router id agents address their responses to
    #[serde(default = "default_coordinator_id")]
    pub coordinator_id: String,

    /// Ceiling on how long the broker waits for any task response
    #[serde(default = "default_task_timeout")]
    pub task_timeout_ms: u64,

    /// How often idle agents re-check their running flag
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Retry and concurrency settings per external dependency
    #[serde(default)]
    pub dependencies: HashMap<String, DependencyConfig>,
}

fn default_coordinator_id() -> String {
    "coordinator".into()
}

fn default_task_timeout() -> u64 {
    300_000
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordinator_id: default_coordinator_id(),
            task_timeout_ms: default_task_timeout(),
            poll_interval_ms: default_poll_interval(),
            dependencies: HashMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;

        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Loaded coordinator config");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.coordinator_id.trim().is_empty() {
            return Err(ProctorError::Config("coordinator_id must not be empty".into()));
        }
        if self.task_timeout_ms == 0 {
            return Err(ProctorError::Config("task_timeout_ms must be non-zero".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ProctorError::Config("poll_interval_ms must be non-zero".into()));
        }

        for (name, dependency) in &self.dependencies {
            dependency
                .validate()
                .map_err(|e| ProctorError::Config(format!("dependency '{name}': {e}")))?;
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
