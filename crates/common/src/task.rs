//! Task types exchanged between the coordinator and agents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque keyed payload carried by tasks and coordination messages.
pub type Payload = Map<String, Value>;

/// Current status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed and cancelled tasks never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A unit of work routed to exactly one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: String,

    /// Type tag used by agents to pick a handler
    #[serde(rename = "type")]
    pub task_type: String,

    #[serde(default)]
    pub payload: Payload,

    pub status: TaskStatus,

    /// Agent currently (or last) processing the task
    #[serde(default)]
    pub assigned_agent: Option<String>,

    /// Present only once the task completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Present only once the task failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Creation timestamp (Unix millis)
    pub created_at: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,

    /// Declared prerequisite task IDs. Recorded only; nothing schedules on them.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            task_type: task_type.into(),
            payload,
            status: TaskStatus::Pending,
            assigned_agent: None,
            result: None,
            error: None,
            created_at: now_millis(),
            started_at: None,
            completed_at: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Mark the task as picked up by `agent_id`.
    pub fn start(&mut self, agent_id: &str) {
        self.status = TaskStatus::InProgress;
        self.assigned_agent = Some(agent_id.to_string());
        self.started_at = Some(now_millis());
    }

    pub fn complete(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now_millis());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.result = None;
        self.error = Some(error.into());
        self.completed_at = Some(now_millis());
    }
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
