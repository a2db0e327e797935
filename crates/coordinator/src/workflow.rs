//! Workflow engine - named, ordered pipelines of task dispatches.
//!
//! ```text
//! start(type, data) ──► step 1 ──► step 2 ──► ... ──► finalize
//!                         │          │
//!                         ▼          ▼
//!                     step log (visible to pollers as each step ends)
//! ```
//!
//! Any step that cannot run to a completed task halts the workflow; later
//! steps are never attempted. Batch steps complete whenever their task
//! completes, whatever the per-item outcomes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use proctor_common::{now_millis, BatchOutcome, Payload, ProctorError, Result, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::coordinator::Coordinator;

const SUMMARY_LEN: usize = 120;

/// Inputs available to step builders: the workflow data and the results of
/// every step completed so far.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    workflow_id: String,
    data: Payload,
    results: HashMap<String, Value>,
}

impl WorkflowContext {
    pub fn new(workflow_id: impl Into<String>, data: Payload) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            data,
            results: HashMap::new(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    /// A required string field of the workflow data.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ProctorError::InvalidTask(format!("workflow data missing '{key}'")))
    }

    pub fn step_result(&self, step: &str) -> Option<&Value> {
        self.results.get(step)
    }

    pub fn require_step_result(&self, step: &str) -> Result<&Value> {
        self.step_result(step)
            .ok_or_else(|| ProctorError::InvalidTask(format!("no result from step '{step}'")))
    }

    fn record(&mut self, step: &str, result: Value) {
        self.results.insert(step.to_string(), result);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// The task result is the step result.
    Single,
    /// The task result is a [`BatchOutcome`]; item failures do not fail the
    /// step.
    Batch,
}

pub type TaskBuilder = Arc<dyn Fn(&WorkflowContext) -> Result<Task> + Send + Sync>;
pub type Finalizer = Arc<dyn Fn(&WorkflowContext) -> Result<Value> + Send + Sync>;

/// One dispatch in a workflow.
#[derive(Clone)]
pub struct WorkflowStep {
    pub name: String,
    pub agent_id: String,
    pub kind: StepKind,
    build: TaskBuilder,
}

impl WorkflowStep {
    pub fn single<F>(name: impl Into<String>, agent_id: impl Into<String>, build: F) -> Self
    where
        F: Fn(&WorkflowContext) -> Result<Task> + Send + Sync + 'static,
    {
        Self::new(name, agent_id, StepKind::Single, build)
    }

    pub fn batch<F>(name: impl Into<String>, agent_id: impl Into<String>, build: F) -> Self
    where
        F: Fn(&WorkflowContext) -> Result<Task> + Send + Sync + 'static,
    {
        Self::new(name, agent_id, StepKind::Batch, build)
    }

    fn new<F>(
        name: impl Into<String>,
        agent_id: impl Into<String>,
        kind: StepKind,
        build: F,
    ) -> Self
    where
        F: Fn(&WorkflowContext) -> Result<Task> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            agent_id: agent_id.into(),
            kind,
            build: Arc::new(build),
        }
    }
}

impl std::fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("name", &self.name)
            .field("agent_id", &self.agent_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A named pipeline. Without a finalizer the last step's result is the
/// workflow result.
#[derive(Clone)]
pub struct WorkflowDefinition {
    name: String,
    steps: Vec<WorkflowStep>,
    finalize: Option<Finalizer>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            finalize: None,
        }
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn finalize<F>(mut self, finalize: F) -> Self
    where
        F: Fn(&WorkflowContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.finalize = Some(Arc::new(finalize));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("finalize", &self.finalize.is_some())
            .finish()
    }
}

/// Log entry for one finished step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: TaskStatus,
    pub summary: String,
}

/// A running or finished workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub status: TaskStatus,
    pub steps: Vec<StepRecord>,
    pub data: Payload,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Workflow {
    fn new(workflow_type: &str, data: Payload) -> Self {
        Self {
            id: format!("wf_{}", uuid::Uuid::new_v4()),
            workflow_type: workflow_type.to_string(),
            status: TaskStatus::Pending,
            steps: Vec::new(),
            data,
            created_at: now_millis(),
            completed_at: None,
            final_result: None,
            error: None,
        }
    }

    /// Name of the step that failed the workflow, if any.
    pub fn failed_step(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.status == TaskStatus::Failed)
            .map(|s| s.name.as_str())
    }
}

/// What a poller sees for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub workflow_id: String,
    pub workflow_type: String,
    pub status: TaskStatus,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Workflow> for WorkflowStatusReport {
    fn from(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            workflow_type: workflow.workflow_type.clone(),
            status: workflow.status,
            steps: workflow.steps.clone(),
            final_result: workflow.final_result.clone(),
            error: workflow.error.clone(),
        }
    }
}

/// Runs registered workflow definitions against a coordinator.
pub struct WorkflowEngine {
    coordinator: Arc<Coordinator>,
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl WorkflowEngine {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            definitions: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Register `definition`, replacing any definition of the same name.
    pub fn register(&self, definition: WorkflowDefinition) {
        info!(
            workflow_type = %definition.name,
            steps = definition.steps.len(),
            "Registering workflow"
        );
        self.definitions
            .write()
            .insert(definition.name.clone(), Arc::new(definition));
    }

    /// Registered workflow types, sorted.
    pub fn workflow_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a workflow in the background and return its id.
    pub fn start(self: &Arc<Self>, workflow_type: &str, data: Payload) -> Result<String> {
        let (id, definition) = self.create(workflow_type, data)?;

        let engine = Arc::clone(self);
        let workflow_id = id.clone();
        tokio::spawn(async move { engine.execute(&workflow_id, &definition).await });

        Ok(id)
    }

    /// Run a workflow to completion and return its final state.
    pub async fn run(&self, workflow_type: &str, data: Payload) -> Result<Workflow> {
        let (id, definition) = self.create(workflow_type, data)?;
        self.execute(&id, &definition).await;
        self.workflow(&id)
            .ok_or_else(|| ProctorError::Agent(format!("workflow {id} vanished")))
    }

    pub fn status(&self, workflow_id: &str) -> Option<WorkflowStatusReport> {
        self.workflows
            .read()
            .get(workflow_id)
            .map(WorkflowStatusReport::from)
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().get(workflow_id).cloned()
    }

    /// Every known workflow, oldest first.
    pub fn list(&self) -> Vec<WorkflowStatusReport> {
        let workflows = self.workflows.read();
        let mut all: Vec<&Workflow> = workflows.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all.into_iter().map(WorkflowStatusReport::from).collect()
    }

    /// Forget a finished workflow. Workflows still running are kept and
    /// `None` is returned.
    pub fn remove(&self, workflow_id: &str) -> Option<Workflow> {
        let mut workflows = self.workflows.write();
        if !workflows.get(workflow_id)?.status.is_terminal() {
            return None;
        }
        debug!(workflow_id = %workflow_id, "Removing finished workflow");
        workflows.remove(workflow_id)
    }

    /// Forget every finished workflow and return how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let mut workflows = self.workflows.write();
        let before = workflows.len();
        workflows.retain(|_, w| !w.status.is_terminal());
        let pruned = before - workflows.len();
        if pruned > 0 {
            info!(pruned, remaining = workflows.len(), "Pruned finished workflows");
        }
        pruned
    }

    fn create(
        &self,
        workflow_type: &str,
        data: Payload,
    ) -> Result<(String, Arc<WorkflowDefinition>)> {
        let definition = self
            .definitions
            .read()
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| ProctorError::UnknownWorkflow(workflow_type.to_string()))?;

        let workflow = Workflow::new(workflow_type, data);
        let id = workflow.id.clone();
        self.workflows.write().insert(id.clone(), workflow);

        info!(workflow_id = %id, workflow_type = %workflow_type, "Workflow created");
        Ok((id, definition))
    }

    fn update(&self, workflow_id: &str, f: impl FnOnce(&mut Workflow)) {
        if let Some(workflow) = self.workflows.write().get_mut(workflow_id) {
            f(workflow);
        }
    }

    async fn execute(&self, workflow_id: &str, definition: &WorkflowDefinition) {
        let Some(data) = self.workflow(workflow_id).map(|w| w.data) else {
            return;
        };
        self.update(workflow_id, |w| w.status = TaskStatus::InProgress);

        let mut context = WorkflowContext::new(workflow_id, data);

        for step in &definition.steps {
            debug!(
                workflow_id = %workflow_id,
                step = %step.name,
                agent = %step.agent_id,
                "Running step"
            );

            match self.run_step(step, &context).await {
                Ok((result, summary)) => {
                    self.update(workflow_id, |w| {
                        w.steps.push(StepRecord {
                            name: step.name.clone(),
                            status: TaskStatus::Completed,
                            summary,
                        })
                    });
                    context.record(&step.name, result);
                }
                Err(e) => {
                    let failure = ProctorError::WorkflowStepFailure {
                        step: step.name.clone(),
                        reason: e.to_string(),
                    };
                    error!(workflow_id = %workflow_id, error = %failure, "Workflow halted");

                    self.update(workflow_id, |w| {
                        w.steps.push(StepRecord {
                            name: step.name.clone(),
                            status: TaskStatus::Failed,
                            summary: e.to_string(),
                        });
                        w.status = TaskStatus::Failed;
                        w.error = Some(failure.to_string());
                        w.completed_at = Some(now_millis());
                    });
                    return;
                }
            }
        }

        let final_result = match &definition.finalize {
            Some(finalize) => finalize(&context),
            None => Ok(definition
                .steps
                .last()
                .and_then(|s| context.step_result(&s.name))
                .cloned()
                .unwrap_or(Value::Null)),
        };

        match final_result {
            Ok(result) => {
                info!(workflow_id = %workflow_id, "Workflow completed");
                self.update(workflow_id, |w| {
                    w.status = TaskStatus::Completed;
                    w.final_result = Some(result);
                    w.completed_at = Some(now_millis());
                });
            }
            Err(e) => {
                error!(workflow_id = %workflow_id, error = %e, "Workflow finalization failed");
                self.update(workflow_id, |w| {
                    w.status = TaskStatus::Failed;
                    w.error = Some(e.to_string());
                    w.completed_at = Some(now_millis());
                });
            }
        }
    }

    /// Build, dispatch and judge one step. Returns the step result and its
    /// log summary.
    async fn run_step(
        &self,
        step: &WorkflowStep,
        context: &WorkflowContext,
    ) -> Result<(Value, String)> {
        let task = (step.build)(context)?;
        let done = self.coordinator.dispatch(&step.agent_id, task).await?;

        if done.status != TaskStatus::Completed {
            return Err(ProctorError::Agent(
                done.error
                    .unwrap_or_else(|| format!("task ended as {:?}", done.status)),
            ));
        }
        let result = done.result.unwrap_or(Value::Null);

        let summary = match step.kind {
            StepKind::Single => summarize(&result),
            StepKind::Batch => {
                let outcome = BatchOutcome::from_value(&result).ok_or_else(|| {
                    ProctorError::Agent(format!(
                        "step '{}' returned no batch outcome",
                        step.name
                    ))
                })?;
                format!(
                    "{} succeeded, {} failed",
                    outcome.succeeded(),
                    outcome.failed()
                )
            }
        };
        Ok((result, summary))
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflow_types", &self.workflow_types())
            .field("workflows", &self.workflows.read().len())
            .finish()
    }
}

/// Short human-readable rendering of a step result.
fn summarize(result: &Value) -> String {
    let text = match result {
        Value::String(s) => s.clone(),
        Value::Array(items) => format!("{} items", items.len()),
        other => other.to_string(),
    };

    if text.chars().count() <= SUMMARY_LEN {
        return text;
    }
    let mut short: String = text.chars().take(SUMMARY_LEN).collect();
    short.push_str("...");
    short
}
