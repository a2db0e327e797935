//! Extraction agent - turns submission attachments into plain text.

use std::sync::Arc;

use async_trait::async_trait;
use proctor_common::{
    BatchOutcome, ItemOutcome, ProctorError, Result, Submission, Task, TaskRequest, ToolRegistry,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::agent::AgentBuilder;
use crate::handler::{args, mismatch, typed_request, TaskHandler};

pub const EXTRACT_TOOL: &str = "extract_text";

/// Handles `extract_content` as a batch: one `extract_text` call per
/// submission, each item succeeding or failing on its own.
///
/// Submissions that already carry content pass through without a tool call.
/// Each successful item's result is the submission with `content` filled in.
pub struct ExtractionHandler;

impl ExtractionHandler {
    async fn extract(submission: &Submission, tools: &ToolRegistry) -> Result<Submission> {
        if submission.content.is_some() {
            return Ok(submission.clone());
        }

        let Some(url) = submission.attachment_url.as_deref() else {
            return Err(ProctorError::InvalidTask(format!(
                "submission {} has neither content nor attachment",
                submission.id
            )));
        };

        let text = tools
            .execute(
                EXTRACT_TOOL,
                args([
                    ("submission_id", json!(submission.id)),
                    ("url", json!(url)),
                ]),
            )
            .await?;

        let content = match text {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(Submission {
            content: Some(content),
            ..submission.clone()
        })
    }
}

#[async_trait]
impl TaskHandler for ExtractionHandler {
    async fn handle(&self, task: &Task, tools: &ToolRegistry) -> Result<Value> {
        let TaskRequest::ExtractContent(request) = typed_request(task)? else {
            return Err(mismatch("extract_content", task));
        };

        let mut outcome = BatchOutcome::default();
        for submission in &request.submissions {
            match Self::extract(submission, tools).await {
                Ok(extracted) => {
                    debug!(submission = %submission.id, "Content extracted");
                    outcome.push(ItemOutcome::succeeded(
                        &submission.id,
                        serde_json::to_value(extracted)?,
                    ));
                }
                Err(e) => {
                    warn!(submission = %submission.id, error = %e, "Extraction failed");
                    outcome.push(ItemOutcome::failed(&submission.id, e.to_string()));
                }
            }
        }

        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "Extraction batch finished"
        );
        Ok(serde_json::to_value(outcome)?)
    }
}

/// Agent builder preconfigured for `extract_content`. The caller supplies
/// the `extract_text` tool.
pub fn extraction_agent(id: impl Into<String>) -> AgentBuilder {
    AgentBuilder::new(id).handler("extract_content", Arc::new(ExtractionHandler))
}
