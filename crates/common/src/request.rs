//! Typed task requests and batch outcomes.
//!
//! A [`Task`] travels with a string type tag and an opaque payload. Agents
//! parse it into a [`TaskRequest`] before dispatching so handlers only ever
//! see well-formed, typed input. Unknown type tags are not an error: they
//! parse to `None`, and the agent answers them with a null result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProctorError, Result};
use crate::task::{Payload, Task};

/// A student submission as it moves through a grading pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,

    /// Location of the raw attachment, resolved by the text extraction tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,

    /// Normalized text; filled in by the extraction step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSubmissions {
    pub course_id: String,
    pub assignment_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractContent {
    pub submissions: Vec<Submission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAnswer {
    pub question: String,

    /// Instructor-provided answer; synthesized when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSubmissions {
    pub question: String,
    pub reference_answer: String,
    pub submissions: Vec<Submission>,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
}

fn default_max_score() -> f64 {
    10.0
}

/// Every task type the built-in agents understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TaskRequest {
    FetchSubmissions(FetchSubmissions),
    ExtractContent(ExtractContent),
    ReferenceAnswer(ReferenceAnswer),
    GradeSubmissions(GradeSubmissions),
}

impl TaskRequest {
    pub const KNOWN_TYPES: [&'static str; 4] = [
        "fetch_submissions",
        "extract_content",
        "reference_answer",
        "grade_submissions",
    ];

    /// Parse the typed request carried by `task`.
    ///
    /// Returns `Ok(None)` for a type tag outside [`Self::KNOWN_TYPES`] and an
    /// error when a known tag carries a malformed payload.
    pub fn parse(task: &Task) -> Result<Option<Self>> {
        if !Self::KNOWN_TYPES.contains(&task.task_type.as_str()) {
            return Ok(None);
        }

        let tagged = serde_json::json!({
            "type": task.task_type,
            "payload": Value::Object(task.payload.clone()),
        });
        serde_json::from_value(tagged)
            .map(Some)
            .map_err(|e| ProctorError::InvalidTask(format!("{}: {}", task.task_type, e)))
    }

    pub fn task_type(&self) -> &'static str {
        match self {
            Self::FetchSubmissions(_) => "fetch_submissions",
            Self::ExtractContent(_) => "extract_content",
            Self::ReferenceAnswer(_) => "reference_answer",
            Self::GradeSubmissions(_) => "grade_submissions",
        }
    }

    /// Build a pending task carrying this request.
    pub fn into_task(self) -> Result<Task> {
        let task_type = self.task_type();
        let payload = match serde_json::to_value(&self)? {
            Value::Object(mut tagged) => match tagged.remove("payload") {
                Some(Value::Object(payload)) => payload,
                _ => Payload::new(),
            },
            _ => Payload::new(),
        };
        Ok(Task::new(task_type, payload))
    }
}

/// Outcome of one item inside a batch task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn succeeded(item_id: impl Into<String>, result: Value) -> Self {
        Self {
            item_id: item_id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(item_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Per-item results of a batch task. A batch that ran is a completed task
/// even when some of its items failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub items: Vec<ItemOutcome>,
}

impl BatchOutcome {
    pub fn push(&mut self, outcome: ItemOutcome) {
        self.items.push(outcome);
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.success).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    /// Results of the items that succeeded, in order.
    pub fn successful_results(&self) -> impl Iterator<Item = &Value> {
        self.items
            .iter()
            .filter(|i| i.success)
            .filter_map(|i| i.result.as_ref())
    }

    /// Read a batch outcome back out of a task result.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(task_type: &str, payload: Value) -> Task {
        match payload {
            Value::Object(map) => Task::new(task_type, map),
            _ => Task::new(task_type, Payload::new()),
        }
    }

    #[test]
    fn unknown_type_parses_to_none() {
        let parsed = TaskRequest::parse(&task("echo", json!({"x": 1}))).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn known_type_parses_typed_payload() {
        let parsed = TaskRequest::parse(&task(
            "fetch_submissions",
            json!({"course_id": "c1", "assignment_id": "a1"}),
        ))
        .unwrap();

        assert_eq!(
            parsed,
            Some(TaskRequest::FetchSubmissions(FetchSubmissions {
                course_id: "c1".into(),
                assignment_id: "a1".into(),
            }))
        );
    }

    #[test]
    fn malformed_known_payload_is_invalid() {
        let err = TaskRequest::parse(&task("fetch_submissions", json!({"course_id": 5})))
            .unwrap_err();
        assert!(matches!(err, ProctorError::InvalidTask(_)));
        assert!(err.to_string().contains("fetch_submissions"));
    }

    #[test]
    fn into_task_keeps_type_and_payload() {
        let request = TaskRequest::ReferenceAnswer(ReferenceAnswer {
            question: "What is ownership?".into(),
            reference_answer: None,
        });
        let task = request.clone().into_task().unwrap();

        assert_eq!(task.task_type, "reference_answer");
        assert_eq!(task.payload["question"], "What is ownership?");
        assert_eq!(TaskRequest::parse(&task).unwrap(), Some(request));
    }

    #[test]
    fn grade_request_defaults_max_score() {
        let parsed = TaskRequest::parse(&task(
            "grade_submissions",
            json!({"question": "q", "reference_answer": "r", "submissions": []}),
        ))
        .unwrap();

        match parsed {
            Some(TaskRequest::GradeSubmissions(grade)) => assert_eq!(grade.max_score, 10.0),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn batch_outcome_counts() {
        let mut batch = BatchOutcome::default();
        batch.push(ItemOutcome::succeeded("s1", json!(7.0)));
        batch.push(ItemOutcome::failed("s2", "unreadable"));
        batch.push(ItemOutcome::succeeded("s3", json!(9.0)));

        assert_eq!(batch.succeeded(), 2);
        assert_eq!(batch.failed(), 1);
        assert_eq!(batch.successful_results().count(), 2);

        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(BatchOutcome::from_value(&value), Some(batch));
        assert!(BatchOutcome::from_value(&json!("not a batch")).is_none());
    }
}
