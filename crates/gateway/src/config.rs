use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Settings for one external dependency (an AI provider, an LMS API, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    /// Calls allowed in flight at once, across every caller
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl DependencyConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_concurrent_requests == 0 {
            return Err("max_concurrent_requests must be at least 1".to_string());
        }
        self.retry.validate()
    }
}
