//! Grading agent - reference answers and per-submission scoring.

use std::sync::Arc;

use async_trait::async_trait;
use proctor_common::{
    BatchOutcome, GradeSubmissions, ItemOutcome, ProctorError, ReferenceAnswer, Result,
    Submission, Task, TaskRequest, ToolRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::agent::AgentBuilder;
use crate::handler::{args, typed_request, TaskHandler};

/// Name of the text-completion capability the grader depends on.
pub const COMPLETE_TOOL: &str = "complete";

const REFERENCE_SYSTEM_PROMPT: &str = r#"You are an experienced instructor writing a model answer.

Answer the question completely and concisely, the way a top-scoring
student would. Do not add commentary about the answer itself.
"#;

const GRADING_SYSTEM_PROMPT: &str = r#"You are a fair and consistent grader. Your role is to:

1. Compare the student's answer with the reference answer
2. Award partial credit for partially correct reasoning
3. Ignore spelling and formatting unless they change the meaning

Respond in exactly this format:
SCORE: <number>
FEEDBACK: <one short paragraph addressed to the student>
"#;

/// Grade for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub submission_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub score: f64,
    pub max_score: f64,
    pub feedback: String,
}

/// Handles `reference_answer` and `grade_submissions` through the
/// `complete` tool.
pub struct GradingHandler {
    temperature: f64,
}

impl Default for GradingHandler {
    fn default() -> Self {
        Self { temperature: 0.0 }
    }
}

impl GradingHandler {
    pub fn with_temperature(temperature: f64) -> Self {
        Self { temperature }
    }

    async fn reference_answer(
        &self,
        request: ReferenceAnswer,
        tools: &ToolRegistry,
    ) -> Result<Value> {
        if let Some(answer) = request.reference_answer.filter(|a| !a.trim().is_empty()) {
            debug!("Using provided reference answer");
            return Ok(Value::String(answer));
        }

        info!("Synthesizing reference answer");
        let answer = tools
            .execute(
                COMPLETE_TOOL,
                args([
                    ("prompt", json!(request.question)),
                    ("system", json!(REFERENCE_SYSTEM_PROMPT)),
                    ("temperature", json!(self.temperature)),
                ]),
            )
            .await?;
        Ok(answer)
    }

    async fn grade_one(
        &self,
        request: &GradeSubmissions,
        submission: &Submission,
        tools: &ToolRegistry,
    ) -> Result<GradeReport> {
        let content = submission.content.as_deref().ok_or_else(|| {
            ProctorError::InvalidTask(format!("submission {} has no content", submission.id))
        })?;

        let prompt = format!(
            "Question:\n{}\n\nReference answer:\n{}\n\nStudent answer:\n{}\n\nMaximum score: {}",
            request.question, request.reference_answer, content, request.max_score
        );
        let reply = tools
            .execute(
                COMPLETE_TOOL,
                args([
                    ("prompt", json!(prompt)),
                    ("system", json!(GRADING_SYSTEM_PROMPT)),
                    ("temperature", json!(self.temperature)),
                ]),
            )
            .await?;

        let text = reply.as_str().unwrap_or_default();
        let (score, feedback) = parse_grade(text).ok_or_else(|| {
            ProctorError::Agent(format!(
                "no score in grader reply for submission {}",
                submission.id
            ))
        })?;

        Ok(GradeReport {
            submission_id: submission.id.clone(),
            student_id: submission.student_id.clone(),
            score: score.min(request.max_score).max(0.0),
            max_score: request.max_score,
            feedback,
        })
    }

    async fn grade_submissions(
        &self,
        request: GradeSubmissions,
        tools: &ToolRegistry,
    ) -> Result<Value> {
        let mut outcome = BatchOutcome::default();

        for submission in &request.submissions {
            match self.grade_one(&request, submission, tools).await {
                Ok(report) => {
                    debug!(submission = %submission.id, score = report.score, "Graded");
                    outcome.push(ItemOutcome::succeeded(
                        &submission.id,
                        serde_json::to_value(report)?,
                    ));
                }
                Err(e) => {
                    warn!(submission = %submission.id, error = %e, "Grading failed");
                    outcome.push(ItemOutcome::failed(&submission.id, e.to_string()));
                }
            }
        }

        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "Grading batch finished"
        );
        Ok(serde_json::to_value(outcome)?)
    }
}

#[async_trait]
impl TaskHandler for GradingHandler {
    async fn handle(&self, task: &Task, tools: &ToolRegistry) -> Result<Value> {
        match typed_request(task)? {
            TaskRequest::ReferenceAnswer(request) => self.reference_answer(request, tools).await,
            TaskRequest::GradeSubmissions(request) => self.grade_submissions(request, tools).await,
            other => Err(ProctorError::InvalidTask(format!(
                "grading handler cannot process '{}'",
                other.task_type()
            ))),
        }
    }
}

/// Pull `SCORE:` and `FEEDBACK:` out of a grader reply.
///
/// Labels are case-insensitive. Feedback runs from its label to the end of
/// the reply; a missing feedback line yields an empty string.
fn parse_grade(reply: &str) -> Option<(f64, String)> {
    let mut score = None;
    let mut feedback: Vec<&str> = Vec::new();
    let mut in_feedback = false;

    for line in reply.lines() {
        let trimmed = line.trim();
        let upper = trimmed.to_ascii_uppercase();

        if let Some(rest) = upper.strip_prefix("SCORE:") {
            // "7/10" and "7 out of 10" both mean 7
            score = rest
                .split(|c: char| c == '/' || c.is_whitespace())
                .find(|s| !s.is_empty())
                .and_then(|s| s.parse::<f64>().ok());
            in_feedback = false;
        } else if upper.starts_with("FEEDBACK:") {
            feedback.push(trimmed["FEEDBACK:".len()..].trim());
            in_feedback = true;
        } else if in_feedback {
            feedback.push(trimmed);
        }
    }

    score
        .filter(|s| s.is_finite())
        .map(|s| (s, feedback.join("\n").trim().to_string()))
}

/// Agent builder preconfigured for `reference_answer` and
/// `grade_submissions`. The caller supplies the `complete` tool.
pub fn grading_agent(id: impl Into<String>) -> AgentBuilder {
    let handler = Arc::new(GradingHandler::default());
    AgentBuilder::new(id)
        .handler("reference_answer", handler.clone())
        .handler("grade_submissions", handler)
}
