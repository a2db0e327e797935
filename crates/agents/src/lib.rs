//! Agent actors and the built-in grading specialists.
//!
//! An [`Agent`] owns a private mailbox, a set of capabilities ("tools") and a
//! table of [`TaskHandler`]s keyed by task type. It runs as its own tokio task
//! and answers every task request with exactly one task response.
//!
//! - **LMS Agent**: fetches submissions through `lms_fetch_submissions`
//! - **Extraction Agent**: normalizes attachments to text through `extract_text`
//! - **Grading Agent**: reference answers and scoring through `complete`
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         AGENT                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  mailbox ──► dispatch loop ──► TaskHandler ──► tools     │
//! │                    │                                     │
//! │                    └──► task_response via router         │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod extraction;
pub mod grading;
pub mod handler;
pub mod lms;

pub use agent::{Agent, AgentBuilder, AgentState, DEFAULT_POLL_INTERVAL};
pub use extraction::{extraction_agent, ExtractionHandler, EXTRACT_TOOL};
pub use grading::{grading_agent, GradeReport, GradingHandler, COMPLETE_TOOL};
pub use handler::{typed_request, TaskHandler};
pub use lms::{lms_agent, LmsHandler, FETCH_TOOL};
