//! Integration tests for routing, brokering and the grade_assignment pipeline.
//!
//! Agents run their real dispatch loops; external dependencies are simulated
//! tools and a scripted text provider.

use async_trait::async_trait;
use parking_lot::Mutex;
use proctor_agents::{
    extraction_agent, grading_agent, lms_agent, AgentBuilder, TaskHandler, EXTRACT_TOOL,
    FETCH_TOOL,
};
use proctor_common::{
    Message, MessageRouter, Payload, ProctorError, Result, Task, TaskStatus, Tool, ToolError,
    ToolRegistry,
};
use proctor_coordinator::{
    CoordinatorConfig, OrchestrationSystem, WorkflowContext, WorkflowDefinition,
    WorkflowStatusReport, WorkflowStep, GRADE_ASSIGNMENT,
};
use proctor_gateway::{
    CompletionTool, DependencyConfig, LlmClient, LlmRequest, LlmResponse, RetryConfig,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_dependency() -> DependencyConfig {
    DependencyConfig {
        retry: RetryConfig {
            min_interval_ms: 10,
            base_delay_ms: 20,
            max_delay_ms: 200,
            ..RetryConfig::default()
        },
        max_concurrent_requests: 2,
    }
}

fn test_config(task_timeout_ms: u64) -> CoordinatorConfig {
    CoordinatorConfig {
        task_timeout_ms,
        poll_interval_ms: 10,
        dependencies: HashMap::from([
            ("lms".to_string(), fast_dependency()),
            ("ai".to_string(), fast_dependency()),
        ]),
        ..Default::default()
    }
}

fn data(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

fn grading_data() -> Payload {
    data(json!({
        "course_id": "cs101",
        "assignment_id": "hw1",
        "question": "What does the borrow checker enforce?",
        "max_score": 10.0
    }))
}

/// Simulated LMS returning three submissions; rate limits its first
/// `rate_limited` calls.
struct SimulatedLms {
    calls: AtomicU32,
    rate_limited: u32,
}

#[async_trait]
impl Tool for SimulatedLms {
    fn name(&self) -> &str {
        FETCH_TOOL
    }

    async fn execute(&self, _args: Payload) -> std::result::Result<Value, ToolError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.rate_limited {
            return Err(ToolError::rate_limited("429 Too Many Requests"));
        }
        Ok(json!([
            {"id": "s1", "student_id": "u1", "attachment_url": "https://lms.example/s1.pdf"},
            {"id": "s2", "student_id": "u2", "attachment_url": "https://lms.example/s2.zip"},
            {"id": "s3", "student_id": "u3", "content": "Aliasing XOR mutability."}
        ]))
    }
}

/// Extracts PDFs only.
struct SimulatedExtractor;

#[async_trait]
impl Tool for SimulatedExtractor {
    fn name(&self) -> &str {
        EXTRACT_TOOL
    }

    async fn execute(&self, args: Payload) -> std::result::Result<Value, ToolError> {
        let url = args.get("url").and_then(Value::as_str).unwrap_or_default();
        if url.ends_with(".pdf") {
            Ok(json!("References must not outlive their owners."))
        } else {
            Err(ToolError::execution(format!("unsupported attachment: {url}")))
        }
    }
}

/// Text provider that answers every request the same way.
struct ScriptedProvider;

#[async_trait]
impl LlmClient for ScriptedProvider {
    async fn complete(&self, request: LlmRequest) -> std::result::Result<LlmResponse, ToolError> {
        let content = if request
            .system_prompt
            .as_deref()
            .is_some_and(|p| p.contains("model answer"))
        {
            "Memory safety without a garbage collector.".to_string()
        } else {
            "SCORE: 8\nFEEDBACK: Correct, but mention lifetimes.".to_string()
        };
        Ok(LlmResponse {
            content,
            model: "scripted".into(),
            usage: None,
            finish_reason: Some("stop".into()),
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// A system with all three grading agents wired to guarded simulated tools.
fn grading_system(lms_rate_limited: u32) -> (OrchestrationSystem, Arc<SimulatedLms>) {
    let system = OrchestrationSystem::new(test_config(5_000)).unwrap();

    let lms = Arc::new(SimulatedLms {
        calls: AtomicU32::new(0),
        rate_limited: lms_rate_limited,
    });
    let provider = system.guard_client("ai", Arc::new(ScriptedProvider));

    system
        .register_agent(lms_agent("lms").tool(system.guard_tool("lms", lms.clone())))
        .unwrap();
    system
        .register_agent(extraction_agent("extraction").tool(Arc::new(SimulatedExtractor)))
        .unwrap();
    system
        .register_agent(grading_agent("grading").tool(Arc::new(CompletionTool::new(provider))))
        .unwrap();

    (system, lms)
}

async fn wait_until_finished(
    system: &OrchestrationSystem,
    workflow_id: &str,
) -> WorkflowStatusReport {
    loop {
        let report = system.workflow_status(workflow_id).unwrap();
        if report.status.is_terminal() {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Records the order in which tasks reach the handler.
struct OrderRecorder(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl TaskHandler for OrderRecorder {
    async fn handle(&self, task: &Task, _tools: &ToolRegistry) -> Result<Value> {
        self.0.lock().push(task.id.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(json!(task.id))
    }
}

/// Answers every task after a fixed delay.
struct SlowHandler(Duration);

#[async_trait]
impl TaskHandler for SlowHandler {
    async fn handle(&self, _task: &Task, _tools: &ToolRegistry) -> Result<Value> {
        tokio::time::sleep(self.0).await;
        Ok(json!("late"))
    }
}

// ============================================================================
// Broker tests
// ============================================================================

#[tokio::test]
async fn test_unknown_task_type_resolves_with_null() {
    let system = OrchestrationSystem::new(test_config(1_000)).unwrap();
    system.register_agent(AgentBuilder::new("worker")).unwrap();
    system.start().unwrap();

    let task = Task::new("echo", data(json!({"x": 1})));
    let done = system.coordinator().dispatch("worker", task).await.unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(Value::Null));
    assert!(done.error.is_none());

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_agent_times_out_and_registry_is_cleared() {
    let system = OrchestrationSystem::new(test_config(30_000)).unwrap();
    // Registered but never started: nothing drains its mailbox.
    system.register_agent(AgentBuilder::new("silent")).unwrap();

    let coordinator = system.coordinator().clone();
    let task = Task::new("echo", Payload::new());
    let task_id = task.id.clone();

    let waiter = tokio::spawn(async move { coordinator.dispatch("silent", task).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(system.coordinator().active_task_ids(), vec![task_id.clone()]);

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        ProctorError::TaskTimeout { timeout_ms: 30_000, .. }
    ));
    assert!(system.coordinator().active_task_ids().is_empty());
}

#[tokio::test]
async fn test_back_to_back_tasks_run_in_order() {
    let system = OrchestrationSystem::new(test_config(5_000)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    system
        .register_agent(
            AgentBuilder::new("worker").handler("record", Arc::new(OrderRecorder(seen.clone()))),
        )
        .unwrap();
    system.start().unwrap();

    let t1 = Task::new("record", Payload::new());
    let t2 = Task::new("record", Payload::new());
    let expected = vec![t1.id.clone(), t2.id.clone()];

    let coordinator = system.coordinator();
    let (r1, r2) = tokio::join!(
        coordinator.dispatch("worker", t1),
        coordinator.dispatch("worker", t2)
    );

    assert_eq!(r1.unwrap().result, Some(json!(expected[0])));
    assert_eq!(r2.unwrap().result, Some(json!(expected[1])));
    assert_eq!(*seen.lock(), expected);

    system.shutdown().await;
}

#[tokio::test]
async fn test_routing_to_unknown_receiver_has_no_effect() {
    let system = OrchestrationSystem::new(test_config(1_000)).unwrap();
    let worker = system.register_agent(AgentBuilder::new("worker")).unwrap();
    system.start().unwrap();

    system.coordinator().route(Message::task_request(
        "worker",
        "nobody",
        Task::new("echo", Payload::new()),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(worker.processed_count(), 0);
    assert!(worker.is_running());
    assert!(system.coordinator().active_task_ids().is_empty());

    // The sender still works normally afterwards.
    let done = system
        .coordinator()
        .dispatch("worker", Task::new("echo", Payload::new()))
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    system.shutdown().await;
}

// ============================================================================
// Workflow tests
// ============================================================================

#[tokio::test]
async fn test_grade_assignment_end_to_end() {
    let (system, lms) = grading_system(0);
    system.start().unwrap();

    let workflow = system
        .run_workflow(GRADE_ASSIGNMENT, grading_data())
        .await
        .unwrap();

    assert_eq!(workflow.status, TaskStatus::Completed, "{:?}", workflow.error);
    let names: Vec<&str> = workflow.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["fetch_submissions", "extract_content", "reference_answer", "grade_submissions"]
    );
    assert!(workflow.steps.iter().all(|s| s.status == TaskStatus::Completed));

    // s2's attachment cannot be extracted; the batch step still completes.
    assert_eq!(workflow.steps[1].summary, "2 succeeded, 1 failed");
    assert_eq!(workflow.steps[3].summary, "2 succeeded, 0 failed");

    let result = workflow.final_result.unwrap();
    assert_eq!(result["submissions"], json!(3));
    assert_eq!(result["extracted"], json!(2));
    assert_eq!(result["graded"], json!(2));
    assert_eq!(result["grades"][0]["score"], json!(8.0));
    assert_eq!(result["failures"][0]["submission_id"], json!("s2"));
    assert_eq!(lms.calls.load(Ordering::SeqCst), 1);

    system.shutdown().await;
}

#[tokio::test]
async fn test_workflow_halts_when_step_two_cannot_dispatch() {
    let system = OrchestrationSystem::new(test_config(5_000)).unwrap();
    let lms = Arc::new(SimulatedLms {
        calls: AtomicU32::new(0),
        rate_limited: 0,
    });
    system.register_agent(lms_agent("lms").tool(lms)).unwrap();
    system.start().unwrap();

    let workflow = system
        .run_workflow(GRADE_ASSIGNMENT, grading_data())
        .await
        .unwrap();

    assert_eq!(workflow.status, TaskStatus::Failed);
    assert_eq!(workflow.steps.len(), 2);
    assert_eq!(workflow.steps[0].status, TaskStatus::Completed);
    assert_eq!(workflow.failed_step(), Some("extract_content"));
    assert!(workflow
        .steps
        .iter()
        .all(|s| s.name != "reference_answer" && s.name != "grade_submissions"));

    let error = workflow.error.unwrap();
    assert!(error.contains("extract_content"));
    assert!(error.contains("extraction"));
    assert!(workflow.final_result.is_none());

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_fails_workflow_and_leaves_agent_running() {
    let system = OrchestrationSystem::new(test_config(1_000)).unwrap();
    let worker = system
        .register_agent(
            AgentBuilder::new("worker")
                .handler("slow", Arc::new(SlowHandler(Duration::from_secs(10)))),
        )
        .unwrap();
    system.register_workflow(
        WorkflowDefinition::new("two_steps")
            .step(WorkflowStep::single("a", "worker", |_: &WorkflowContext| {
                Ok(Task::new("slow", Payload::new()))
            }))
            .step(WorkflowStep::single("b", "worker", |_: &WorkflowContext| {
                Ok(Task::new("slow", Payload::new()))
            })),
    );
    system.start().unwrap();

    let workflow = system.run_workflow("two_steps", Payload::new()).await.unwrap();

    assert_eq!(workflow.status, TaskStatus::Failed);
    assert_eq!(workflow.steps.len(), 1);
    assert_eq!(workflow.steps[0].name, "a");
    assert_eq!(workflow.steps[0].status, TaskStatus::Failed);
    assert!(workflow.steps[0].summary.contains("timed out after 1000ms"));
    assert!(workflow.steps.iter().all(|s| s.name != "b"));
    assert_eq!(workflow.failed_step(), Some("a"));

    // The agent finishes the abandoned task later and keeps serving.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(worker.is_running());
    assert_eq!(worker.processed_count(), 1);
    assert!(system.coordinator().active_task_ids().is_empty());

    system.shutdown().await;
}

#[tokio::test]
async fn test_failed_task_halts_workflow() {
    let system = OrchestrationSystem::new(test_config(5_000)).unwrap();
    // No LMS tool: the fetch task fails inside the agent.
    system.register_agent(lms_agent("lms")).unwrap();
    system.start().unwrap();

    let workflow = system
        .run_workflow(GRADE_ASSIGNMENT, grading_data())
        .await
        .unwrap();

    assert_eq!(workflow.status, TaskStatus::Failed);
    assert_eq!(workflow.steps.len(), 1);
    assert!(workflow.steps[0].summary.contains(FETCH_TOOL));

    system.shutdown().await;
}

#[tokio::test]
async fn test_started_workflow_is_pollable() {
    let (system, lms) = grading_system(2);
    system.start().unwrap();

    let workflow_id = system
        .start_workflow(GRADE_ASSIGNMENT, grading_data())
        .unwrap();
    let report = wait_until_finished(&system, &workflow_id).await;

    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(report.workflow_id, workflow_id);
    assert_eq!(report.steps.len(), 4);
    assert!(report.final_result.is_some());
    // Two rate-limited attempts were retried by the guard.
    assert_eq!(lms.calls.load(Ordering::SeqCst), 3);

    let listed = system.workflows();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], report);

    let removed = system.remove_workflow(&workflow_id).unwrap();
    assert_eq!(removed.status, TaskStatus::Completed);
    assert!(system.workflow_status(&workflow_id).is_none());
    assert_eq!(system.prune_workflows(), 0);

    system.shutdown().await;
}

#[tokio::test]
async fn test_unknown_workflow_type() {
    let system = OrchestrationSystem::new(test_config(1_000)).unwrap();
    let err = system
        .start_workflow("grade_everything", Payload::new())
        .unwrap_err();
    assert!(matches!(err, ProctorError::UnknownWorkflow(_)));
}
