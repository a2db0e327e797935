//! Error types for Proctor.

use std::time::Duration;
use thiserror::Error;

/// Failure raised by a capability ("tool") invocation.
///
/// The variant is the retry classification: only [`ToolError::RateLimited`]
/// is retryable, everything else propagates on the first occurrence.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Delay hint supplied by the callee (e.g. a `Retry-After` header).
        retry_after: Option<Duration>,
    },

    #[error("rate limit exceeded after {attempts} attempts: {message}")]
    RateLimitExceeded { attempts: u32, message: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool execution failed: {0}")]
    Execution(String),
}

impl ToolError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Whether a retry policy may re-invoke the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[derive(Error, Debug)]
pub enum ProctorError {
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Task {task_id} timed out after {timeout_ms}ms")]
    TaskTimeout { task_id: String, timeout_ms: u64 },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Task already active: {0}")]
    DuplicateTask(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Workflow step '{step}' failed: {reason}")]
    WorkflowStepFailure { step: String, reason: String },

    #[error("Unknown workflow type: {0}")]
    UnknownWorkflow(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProctorError>;
