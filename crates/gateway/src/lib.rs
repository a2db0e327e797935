//! Guarded access to unreliable external dependencies.
//!
//! Every call into an AI provider, LMS API or similar dependency goes through
//! a [`DependencyGuard`]: a shared spacing floor, exponential backoff with
//! jitter for rate-limit faults, a retry budget and a concurrency cap.

pub mod client;
pub mod config;
pub mod guard;
pub mod retry;

pub use client::{
    ChatMessage, CompletionTool, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage,
    COMPLETION_TOOL,
};
pub use config::DependencyConfig;
pub use guard::{DependencyGuard, Gateway, GuardedTool, SemaphoredClient};
pub use retry::{RetryConfig, RetryPolicy, RetryingClient};
