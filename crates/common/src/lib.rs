//! Common types and traits shared across Proctor crates.
//!
//! This crate provides the foundational abstractions that agents, the
//! coordinator and the external-dependency gateway use to communicate:
//! messages, tasks, typed task requests, capabilities ("tools") and the
//! router interface agents answer through.

pub mod error;
pub mod message;
pub mod request;
pub mod task;
pub mod traits;

pub use error::{ProctorError, Result, ToolError};
pub use message::{Message, MessageBody, MessageType};
pub use request::{
    BatchOutcome, ExtractContent, FetchSubmissions, GradeSubmissions, ItemOutcome,
    ReferenceAnswer, Submission, TaskRequest,
};
pub use task::{now_millis, Payload, Task, TaskStatus};
pub use traits::{MessageRouter, Tool, ToolRegistry};
