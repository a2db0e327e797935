//! Process-lifetime container for the coordinator, its agents and the
//! workflow engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use proctor_agents::{Agent, AgentBuilder, AgentState};
use proctor_common::{Payload, ProctorError, Result, Tool};
use proctor_gateway::{Gateway, LlmClient};
use tracing::info;

use crate::config::CoordinatorConfig;
use crate::coordinator::Coordinator;
use crate::grade_assignment;
use crate::workflow::{Workflow, WorkflowDefinition, WorkflowEngine, WorkflowStatusReport};

/// Explicit handle to one orchestration runtime.
///
/// Construct once and pass it to whatever needs to register agents or run
/// workflows; nothing here is global.
pub struct OrchestrationSystem {
    config: CoordinatorConfig,
    coordinator: Arc<Coordinator>,
    gateway: Gateway,
    engine: Arc<WorkflowEngine>,
    running: AtomicBool,
}

impl OrchestrationSystem {
    /// Build a system with the built-in workflows registered. Agents are
    /// added afterwards with [`register_agent`](Self::register_agent).
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;

        let coordinator = Coordinator::new(config.coordinator_id.clone(), config.task_timeout());
        let engine = Arc::new(WorkflowEngine::new(coordinator.clone()));
        engine.register(grade_assignment::definition());

        Ok(Self {
            gateway: Gateway::new(config.dependencies.clone()),
            config,
            coordinator,
            engine,
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Build `builder` with the configured poll interval and register the
    /// agent. Agents registered while the system runs start immediately.
    pub fn register_agent(&self, builder: AgentBuilder) -> Result<Arc<Agent>> {
        let agent = Arc::new(builder.poll_interval(self.config.poll_interval()).build());
        self.coordinator.register_agent(agent.clone())?;

        if self.is_running() {
            agent.start()?;
        }
        Ok(agent)
    }

    /// Wrap `tool` in the retry policy and concurrency cap of `dependency`.
    pub fn guard_tool(&self, dependency: &str, tool: Arc<dyn Tool>) -> Arc<dyn Tool> {
        self.gateway.guard_tool(dependency, tool)
    }

    /// Wrap `client` in the retry policy and concurrency cap of `dependency`.
    pub fn guard_client(
        &self,
        dependency: &str,
        client: Arc<dyn LlmClient>,
    ) -> Arc<dyn LlmClient> {
        self.gateway.guard_client(dependency, client)
    }

    pub fn register_workflow(&self, definition: WorkflowDefinition) {
        self.engine.register(definition);
    }

    /// Start every registered agent that has not started yet.
    ///
    /// Fails without starting anything when a registered agent has already
    /// been stopped; stopped agents cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let agents = self.coordinator.agents();
        if let Some(stopped) = agents.iter().find(|a| a.state() == AgentState::Stopped) {
            return Err(ProctorError::Agent(format!(
                "agent {} has been stopped and cannot be restarted",
                stopped.id()
            )));
        }

        for agent in &agents {
            if !agent.is_running() {
                agent.start()?;
            }
        }
        self.running.store(true, Ordering::SeqCst);
        info!(agents = ?self.coordinator.agent_ids(), "Orchestration system started");
        Ok(())
    }

    /// Stop every agent and wait for their loops to exit.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        for agent in self.coordinator.agents() {
            agent.stop().await;
        }
        info!("Orchestration system stopped");
    }

    /// Start a workflow in the background; poll it with
    /// [`workflow_status`](Self::workflow_status).
    pub fn start_workflow(&self, workflow_type: &str, data: Payload) -> Result<String> {
        self.engine.start(workflow_type, data)
    }

    pub async fn run_workflow(&self, workflow_type: &str, data: Payload) -> Result<Workflow> {
        self.engine.run(workflow_type, data).await
    }

    pub fn workflow_status(&self, workflow_id: &str) -> Option<WorkflowStatusReport> {
        self.engine.status(workflow_id)
    }

    pub fn workflows(&self) -> Vec<WorkflowStatusReport> {
        self.engine.list()
    }

    /// Forget a finished workflow; running ones are kept.
    pub fn remove_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.engine.remove(workflow_id)
    }

    pub fn prune_workflows(&self) -> usize {
        self.engine.prune_finished()
    }
}

impl std::fmt::Debug for OrchestrationSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationSystem")
            .field("coordinator", &self.coordinator)
            .field("engine", &self.engine)
            .field("running", &self.is_running())
            .finish()
    }
}
