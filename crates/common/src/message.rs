//! Message types for inter-agent communication.

use serde::{Deserialize, Serialize};

use crate::task::{now_millis, Payload, Task};

/// Plain message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskRequest,
    TaskResponse,
    StatusUpdate,
    Error,
    Coordination,
}

/// Message type together with the payload that type carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessageBody {
    TaskRequest(Task),
    TaskResponse(Task),
    StatusUpdate(Payload),
    Error { message: String },
    Coordination(Payload),
}

/// A message routed between agents by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    pub sender: String,

    pub receiver: String,

    pub body: MessageBody,

    /// Timestamp (Unix millis)
    pub timestamp: u64,

    /// Task this message answers, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Message {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, body: MessageBody) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4()),
            sender: sender.into(),
            receiver: receiver.into(),
            body,
            timestamp: now_millis(),
            correlation_id: None,
        }
    }

    pub fn task_request(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        task: Task,
    ) -> Self {
        Self::new(sender, receiver, MessageBody::TaskRequest(task))
    }

    /// Response to `task`, correlated by its ID.
    pub fn task_response(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        task: Task,
    ) -> Self {
        let task_id = task.id.clone();
        Self::new(sender, receiver, MessageBody::TaskResponse(task)).with_correlation_id(task_id)
    }

    pub fn error(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            sender,
            receiver,
            MessageBody::Error {
                message: message.into(),
            },
        )
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn message_type(&self) -> MessageType {
        match &self.body {
            MessageBody::TaskRequest(_) => MessageType::TaskRequest,
            MessageBody::TaskResponse(_) => MessageType::TaskResponse,
            MessageBody::StatusUpdate(_) => MessageType::StatusUpdate,
            MessageBody::Error { .. } => MessageType::Error,
            MessageBody::Coordination(_) => MessageType::Coordination,
        }
    }
}
