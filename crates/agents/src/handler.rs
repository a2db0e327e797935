//! Type-specific task handlers.

use async_trait::async_trait;
use proctor_common::{Payload, ProctorError, Result, Task, TaskRequest, ToolRegistry};
use serde_json::Value;

/// Handles one task type on behalf of an agent.
///
/// Handlers receive the agent's tool registry for the duration of the call
/// and return the task result. Errors are folded into the task's error field
/// by the agent; they never stop the agent loop.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task, tools: &ToolRegistry) -> Result<Value>;
}

/// Parse the typed request of `task`, rejecting unknown types.
pub fn typed_request(task: &Task) -> Result<TaskRequest> {
    TaskRequest::parse(task)?.ok_or_else(|| {
        ProctorError::InvalidTask(format!("no typed request for '{}'", task.task_type))
    })
}

pub(crate) fn mismatch(expected: &str, task: &Task) -> ProctorError {
    ProctorError::InvalidTask(format!(
        "handler for '{}' received '{}'",
        expected, task.task_type
    ))
}

/// Build a tool argument map from string pairs.
pub(crate) fn args<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Payload {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
