use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proctor_common::ToolError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Minimum spacing between two calls to the same dependency
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter, as a fraction of the capped delay
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            max_retries: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Exponential delay before retry number `retry` (0-based), capped, without jitter.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let base = self.base_delay_ms as f64 * self.backoff_multiplier.powi(retry as i32);
        let capped = base.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// `backoff_delay` plus jitter, never above `max_delay_ms`; `unit` is a
    /// sample from `[0, 1)`.
    pub fn jittered_delay(&self, retry: u32, unit: f64) -> Duration {
        let delay = self.backoff_delay(retry);
        let jitter = delay.as_millis() as f64 * self.jitter_ratio * unit.clamp(0.0, 1.0);
        let max_delay = Duration::from_millis(self.max_delay_ms);
        (delay + Duration::from_millis(jitter as u64)).min(max_delay)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(format!(
                "jitter_ratio must be in [0, 1), got {}",
                self.jitter_ratio
            ));
        }
        // Jitter must stay below one extra multiplier step, so a flat
        // backoff allows none.
        if self.jitter_ratio > 0.0 && self.jitter_ratio >= self.backoff_multiplier - 1.0 {
            return Err(format!(
                "jitter_ratio {} must be below backoff_multiplier - 1 ({})",
                self.jitter_ratio,
                self.backoff_multiplier - 1.0
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be >= base_delay_ms".to_string());
        }
        Ok(())
    }
}

/// Spacing floor shared by every caller of one dependency.
#[derive(Debug)]
struct Throttle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until `min_interval` has passed since the previous call, then
    /// claim the slot. The lock is held while sleeping so concurrent callers
    /// queue behind each other.
    async fn wait_turn(&self) -> Duration {
        let mut last_call = self.last_call.lock().await;
        let mut waited = Duration::ZERO;

        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                tokio::time::sleep(waited).await;
            }
        }

        *last_call = Some(Instant::now());
        waited
    }
}

/// Spacing, backoff, jitter and retry budget for one external dependency.
#[derive(Debug)]
pub struct RetryPolicy {
    dependency: String,
    config: RetryConfig,
    throttle: Throttle,
}

impl RetryPolicy {
    pub fn new(dependency: impl Into<String>, config: RetryConfig) -> Self {
        let throttle = Throttle::new(config.min_interval());
        Self {
            dependency: dependency.into(),
            config,
            throttle,
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn next_delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let unit: f64 = rand::thread_rng().gen();
        let delay = self.config.jittered_delay(retry, unit);
        match retry_after {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }

    /// Run `operation` under this policy.
    ///
    /// Rate-limit faults consume the retry budget; any other fault is
    /// returned on first occurrence. Exhausting the budget yields
    /// [`ToolError::RateLimitExceeded`].
    pub async fn call<T, F, Fut>(&self, mut operation: F) -> std::result::Result<T, ToolError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ToolError>>,
    {
        let mut retries = 0u32;

        loop {
            let waited = self.throttle.wait_turn().await;
            if !waited.is_zero() {
                debug!(
                    dependency = %self.dependency,
                    waited_ms = waited.as_millis() as u64,
                    "Spaced out call to dependency"
                );
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(ToolError::RateLimited {
                    message,
                    retry_after,
                }) => {
                    if retries >= self.config.max_retries {
                        warn!(
                            dependency = %self.dependency,
                            attempts = retries + 1,
                            error = %message,
                            "Retry budget exhausted"
                        );
                        return Err(ToolError::RateLimitExceeded {
                            attempts: retries + 1,
                            message,
                        });
                    }

                    let delay = self.next_delay(retries, retry_after);
                    retries += 1;

                    warn!(
                        dependency = %self.dependency,
                        attempt = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Rate limited, retrying"
                    );

                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub struct RetryingClient<T: LlmClient> {
    inner: T,
    policy: Arc<RetryPolicy>,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, policy: Arc<RetryPolicy>) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> std::result::Result<LlmResponse, ToolError> {
        self.policy
            .call(|| self.inner.complete(request.clone()))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
