//! The built-in `grade_assignment` workflow.
//!
//! Workflow data: `course_id`, `assignment_id`, `question`, and optionally
//! `reference_answer` and `max_score`.
//!
//! 1. `fetch_submissions` on the LMS agent
//! 2. `extract_content` on the extraction agent (batch)
//! 3. `reference_answer` on the grading agent
//! 4. `grade_submissions` on the grading agent (batch)

use proctor_common::{
    BatchOutcome, ExtractContent, FetchSubmissions, GradeSubmissions, ProctorError,
    ReferenceAnswer, Result, Submission, Task, TaskRequest,
};
use serde_json::{json, Value};

use crate::workflow::{WorkflowContext, WorkflowDefinition, WorkflowStep};

pub const GRADE_ASSIGNMENT: &str = "grade_assignment";

pub const LMS_AGENT: &str = "lms";
pub const EXTRACTION_AGENT: &str = "extraction";
pub const GRADING_AGENT: &str = "grading";

const FETCH_STEP: &str = "fetch_submissions";
const EXTRACT_STEP: &str = "extract_content";
const REFERENCE_STEP: &str = "reference_answer";
const GRADE_STEP: &str = "grade_submissions";

pub fn definition() -> WorkflowDefinition {
    WorkflowDefinition::new(GRADE_ASSIGNMENT)
        .step(WorkflowStep::single(FETCH_STEP, LMS_AGENT, fetch_task))
        .step(WorkflowStep::batch(EXTRACT_STEP, EXTRACTION_AGENT, extract_task))
        .step(WorkflowStep::single(REFERENCE_STEP, GRADING_AGENT, reference_task))
        .step(WorkflowStep::batch(GRADE_STEP, GRADING_AGENT, grade_task))
        .finalize(summarize_grades)
}

fn fetch_task(ctx: &WorkflowContext) -> Result<Task> {
    TaskRequest::FetchSubmissions(FetchSubmissions {
        course_id: ctx.require_str("course_id")?.to_string(),
        assignment_id: ctx.require_str("assignment_id")?.to_string(),
    })
    .into_task()
}

fn extract_task(ctx: &WorkflowContext) -> Result<Task> {
    let submissions: Vec<Submission> =
        serde_json::from_value(ctx.require_step_result(FETCH_STEP)?.clone())?;
    TaskRequest::ExtractContent(ExtractContent { submissions }).into_task()
}

fn reference_task(ctx: &WorkflowContext) -> Result<Task> {
    TaskRequest::ReferenceAnswer(ReferenceAnswer {
        question: ctx.require_str("question")?.to_string(),
        reference_answer: ctx
            .data()
            .get("reference_answer")
            .and_then(Value::as_str)
            .map(String::from),
    })
    .into_task()
}

fn grade_task(ctx: &WorkflowContext) -> Result<Task> {
    let reference_answer = ctx
        .require_step_result(REFERENCE_STEP)?
        .as_str()
        .ok_or_else(|| ProctorError::InvalidTask("reference answer is not text".into()))?
        .to_string();

    // Only submissions whose content was extracted move on to grading.
    let submissions = batch(ctx, EXTRACT_STEP)?
        .successful_results()
        .map(|v| serde_json::from_value::<Submission>(v.clone()))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut request = GradeSubmissions {
        question: ctx.require_str("question")?.to_string(),
        reference_answer,
        submissions,
        max_score: 10.0,
    };
    if let Some(max_score) = ctx.data().get("max_score").and_then(Value::as_f64) {
        request.max_score = max_score;
    }
    TaskRequest::GradeSubmissions(request).into_task()
}

fn summarize_grades(ctx: &WorkflowContext) -> Result<Value> {
    let fetched = ctx
        .require_step_result(FETCH_STEP)?
        .as_array()
        .map_or(0, Vec::len);
    let extracted = batch(ctx, EXTRACT_STEP)?;
    let graded = batch(ctx, GRADE_STEP)?;

    let failures: Vec<Value> = extracted
        .items
        .iter()
        .chain(graded.items.iter())
        .filter(|i| !i.success)
        .map(|i| json!({"submission_id": i.item_id, "error": i.error}))
        .collect();

    Ok(json!({
        "submissions": fetched,
        "extracted": extracted.succeeded(),
        "graded": graded.succeeded(),
        "grades": graded.successful_results().cloned().collect::<Vec<_>>(),
        "failures": failures,
    }))
}

fn batch(ctx: &WorkflowContext, step: &str) -> Result<BatchOutcome> {
    BatchOutcome::from_value(ctx.require_step_result(step)?)
        .ok_or_else(|| ProctorError::InvalidTask(format!("step '{step}' has no batch outcome")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_common::Payload;

    #[test]
    fn definition_has_four_ordered_steps() {
        let definition = definition();
        let steps: Vec<(&str, &str)> = definition
            .steps()
            .iter()
            .map(|s| (s.name.as_str(), s.agent_id.as_str()))
            .collect();

        assert_eq!(definition.name(), GRADE_ASSIGNMENT);
        assert_eq!(
            steps,
            vec![
                ("fetch_submissions", "lms"),
                ("extract_content", "extraction"),
                ("reference_answer", "grading"),
                ("grade_submissions", "grading"),
            ]
        );
    }

    #[test]
    fn fetch_task_requires_course() {
        let ctx = WorkflowContext::new("wf", Payload::new());
        assert!(matches!(fetch_task(&ctx), Err(ProctorError::InvalidTask(_))));

        let mut data = Payload::new();
        data.insert("course_id".into(), json!("c1"));
        data.insert("assignment_id".into(), json!("a1"));
        let task = fetch_task(&WorkflowContext::new("wf", data)).unwrap();
        assert_eq!(task.task_type, "fetch_submissions");
        assert_eq!(task.payload["course_id"], json!("c1"));
    }

    #[test]
    fn reference_task_carries_optional_answer() {
        let mut data = Payload::new();
        data.insert("question".into(), json!("Why?"));
        data.insert("reference_answer".into(), json!("Because."));
        let task = reference_task(&WorkflowContext::new("wf", data)).unwrap();
        assert_eq!(task.payload["reference_answer"], json!("Because."));
    }
}
