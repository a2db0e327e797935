//! Per-dependency guards and the wrappers that apply them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use proctor_common::{Payload, Tool, ToolError};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::info;

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::config::DependencyConfig;
use crate::retry::{RetryPolicy, RetryingClient};

/// Retry policy plus concurrency cap for one dependency.
///
/// Every caller of the dependency must go through the same guard, otherwise
/// the spacing floor is no longer global.
#[derive(Debug)]
pub struct DependencyGuard {
    policy: Arc<RetryPolicy>,
    semaphore: Arc<Semaphore>,
}

impl DependencyGuard {
    pub fn new(dependency: impl Into<String>, config: &DependencyConfig) -> Self {
        Self {
            policy: Arc::new(RetryPolicy::new(dependency, config.retry.clone())),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
        }
    }

    pub fn dependency(&self) -> &str {
        self.policy.dependency()
    }

    pub fn policy(&self) -> Arc<RetryPolicy> {
        self.policy.clone()
    }

    /// Run `operation` under the concurrency cap and the retry policy.
    pub async fn call<T, F, Fut>(&self, operation: F) -> std::result::Result<T, ToolError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ToolError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ToolError::Execution(format!("Semaphore acquire failed: {e}")))?;
        self.policy.call(operation).await
    }
}

/// A [`Tool`] whose every execution goes through a [`DependencyGuard`].
pub struct GuardedTool {
    inner: Arc<dyn Tool>,
    guard: Arc<DependencyGuard>,
}

impl GuardedTool {
    pub fn new(inner: Arc<dyn Tool>, guard: Arc<DependencyGuard>) -> Self {
        Self { inner, guard }
    }
}

#[async_trait]
impl Tool for GuardedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    async fn execute(&self, args: Payload) -> std::result::Result<Value, ToolError> {
        self.guard
            .call(|| self.inner.execute(args.clone()))
            .await
    }
}

pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, semaphore: Arc<Semaphore>) -> Self {
        Self { inner, semaphore }
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> std::result::Result<LlmResponse, ToolError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ToolError::Execution(format!("Semaphore acquire failed: {e}")))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Registry of dependency guards, one per dependency name.
///
/// Guards are created lazily from the configured settings, falling back to
/// [`DependencyConfig::default`] for dependencies with no entry.
#[derive(Debug, Default)]
pub struct Gateway {
    configs: HashMap<String, DependencyConfig>,
    guards: RwLock<HashMap<String, Arc<DependencyGuard>>>,
}

impl Gateway {
    pub fn new(configs: HashMap<String, DependencyConfig>) -> Self {
        Self {
            configs,
            guards: RwLock::new(HashMap::new()),
        }
    }

    pub fn guard(&self, dependency: &str) -> Arc<DependencyGuard> {
        if let Some(guard) = self.guards.read().get(dependency) {
            return guard.clone();
        }

        let mut guards = self.guards.write();
        guards
            .entry(dependency.to_string())
            .or_insert_with(|| {
                let config = self.configs.get(dependency).cloned().unwrap_or_default();
                info!(
                    dependency = %dependency,
                    max_retries = config.retry.max_retries,
                    min_interval_ms = config.retry.min_interval_ms,
                    max_concurrent = config.max_concurrent_requests,
                    "Creating dependency guard"
                );
                Arc::new(DependencyGuard::new(dependency, &config))
            })
            .clone()
    }

    /// Wrap `tool` so its calls are governed by `dependency`'s guard.
    pub fn guard_tool(&self, dependency: &str, tool: Arc<dyn Tool>) -> Arc<dyn Tool> {
        Arc::new(GuardedTool::new(tool, self.guard(dependency)))
    }

    /// Wrap `client` in retries and the concurrency cap of `dependency`.
    pub fn guard_client(&self, dependency: &str, client: Arc<dyn LlmClient>) -> Arc<dyn LlmClient> {
        let guard = self.guard(dependency);
        let retrying: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(client, guard.policy()));
        Arc::new(SemaphoredClient::new(retrying, guard.semaphore.clone()))
    }
}
