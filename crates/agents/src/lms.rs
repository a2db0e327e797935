//! LMS agent - pulls submissions for an assignment.

use std::sync::Arc;

use async_trait::async_trait;
use proctor_common::{ProctorError, Result, Submission, Task, TaskRequest, ToolRegistry};
use serde_json::{json, Value};
use tracing::info;

use crate::agent::AgentBuilder;
use crate::handler::{args, mismatch, typed_request, TaskHandler};

pub const FETCH_TOOL: &str = "lms_fetch_submissions";

/// Handles `fetch_submissions` through the `lms_fetch_submissions` tool.
///
/// The tool returns either an array of submissions or an object with a
/// `submissions` array; the handler normalizes both to an array.
pub struct LmsHandler;

impl LmsHandler {
    fn parse_submissions(value: Value) -> Result<Vec<Submission>> {
        let list = match value {
            Value::Object(mut map) => map.remove("submissions").unwrap_or(Value::Null),
            other => other,
        };
        serde_json::from_value(list).map_err(|e| {
            ProctorError::Agent(format!("{FETCH_TOOL} returned malformed submissions: {e}"))
        })
    }
}

#[async_trait]
impl TaskHandler for LmsHandler {
    async fn handle(&self, task: &Task, tools: &ToolRegistry) -> Result<Value> {
        let TaskRequest::FetchSubmissions(request) = typed_request(task)? else {
            return Err(mismatch("fetch_submissions", task));
        };

        let raw = tools
            .execute(
                FETCH_TOOL,
                args([
                    ("course_id", json!(request.course_id)),
                    ("assignment_id", json!(request.assignment_id)),
                ]),
            )
            .await?;
        let submissions = Self::parse_submissions(raw)?;

        info!(
            course_id = %request.course_id,
            assignment_id = %request.assignment_id,
            count = submissions.len(),
            "Fetched submissions"
        );
        Ok(serde_json::to_value(submissions)?)
    }
}

/// Agent builder preconfigured for `fetch_submissions`. The caller supplies
/// the `lms_fetch_submissions` tool.
pub fn lms_agent(id: impl Into<String>) -> AgentBuilder {
    AgentBuilder::new(id).handler("fetch_submissions", Arc::new(LmsHandler))
}
