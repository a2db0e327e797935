//! Agent actor - a private mailbox, a capability set and a dispatch loop.
//!
//! ```text
//!            route()                 recv (poll interval)
//! Coordinator ──────► [ mailbox ] ─────────────────────► dispatch loop
//!      ▲                                                     │
//!      └──────────────── task_response (exactly one) ────────┘
//! ```
//!
//! Only the agent's own loop drains its mailbox, one message at a time, so
//! messages sent to one agent are processed in send order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use proctor_common::{
    Message, MessageBody, MessageRouter, ProctorError, Result, Task, Tool, ToolRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::handler::TaskHandler;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of an agent. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    NotStarted,
    Running,
    Stopped,
}

pub struct AgentBuilder {
    id: String,
    poll_interval: Duration,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    tools: Vec<Arc<dyn Tool>>,
}

impl AgentBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            handlers: HashMap::new(),
            tools: Vec::new(),
        }
    }

    /// How long the loop waits on an empty mailbox before re-checking the
    /// running flag.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn handler(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn build(self) -> Agent {
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let tools = ToolRegistry::new();
        for tool in self.tools {
            tools.register(tool);
        }

        Agent {
            id: self.id,
            poll_interval: self.poll_interval,
            handlers: self.handlers,
            tools: Arc::new(tools),
            mailbox_tx,
            mailbox_rx: Mutex::new(Some(mailbox_rx)),
            state: RwLock::new(AgentState::NotStarted),
            running: AtomicBool::new(false),
            router: RwLock::new(None),
            processed: AtomicU64::new(0),
            join: Mutex::new(None),
        }
    }
}

/// An independently scheduled worker actor.
pub struct Agent {
    id: String,
    poll_interval: Duration,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    tools: Arc<ToolRegistry>,
    mailbox_tx: mpsc::UnboundedSender<Message>,
    /// Taken by the dispatch loop on start
    mailbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    state: RwLock<AgentState>,
    running: AtomicBool,
    /// Non-owning back-reference; the router owns the agent, not the reverse
    router: RwLock<Option<Weak<dyn MessageRouter>>>,
    processed: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn builder(id: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Messages taken off the mailbox and dispatched so far.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Add a capability. Takes effect for tasks dispatched afterwards.
    pub fn add_tool(&self, tool: Arc<dyn Tool>) {
        debug!(agent = %self.id, tool = %tool.name(), "Adding tool");
        self.tools.register(tool);
    }

    pub fn handles(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Set the router responses are sent through.
    pub fn attach(&self, router: Weak<dyn MessageRouter>) {
        *self.router.write() = Some(router);
    }

    fn router(&self) -> Option<Arc<dyn MessageRouter>> {
        self.router.read().as_ref().and_then(Weak::upgrade)
    }

    /// Push `message` into this agent's mailbox.
    ///
    /// Messages delivered before `start` queue up and are processed once the
    /// loop runs. Returns `false` once the loop has shut down.
    pub fn deliver(&self, message: Message) -> bool {
        self.mailbox_tx.send(message).is_ok()
    }

    /// Spawn the dispatch loop. Starting a running agent is a no-op;
    /// starting a stopped agent is an error.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.write();
        match *state {
            AgentState::Running => {
                warn!(agent = %self.id, "Agent already running");
                return Ok(());
            }
            AgentState::Stopped => {
                return Err(ProctorError::Agent(format!(
                    "agent {} is stopped and cannot be restarted",
                    self.id
                )));
            }
            AgentState::NotStarted => {}
        }

        let mailbox = self.mailbox_rx.lock().take().ok_or_else(|| {
            ProctorError::Agent(format!("agent {} mailbox already taken", self.id))
        })?;

        self.running.store(true, Ordering::SeqCst);
        *state = AgentState::Running;
        drop(state);

        let agent = Arc::clone(self);
        *self.join.lock() = Some(tokio::spawn(agent.run(mailbox)));

        info!(
            agent = %self.id,
            handlers = self.handlers.len(),
            tools = ?self.tools.names(),
            "Agent started"
        );
        Ok(())
    }

    /// Signal the loop to stop and wait for it to exit.
    ///
    /// The loop notices within one poll interval, after finishing the message
    /// it is currently handling. Messages still queued are dropped.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.join.lock().take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(agent = %self.id, error = %e, "Agent loop terminated abnormally");
            }
        }

        *self.state.write() = AgentState::Stopped;
        info!(agent = %self.id, processed = self.processed_count(), "Agent stopped");
    }

    async fn run(self: Arc<Self>, mut mailbox: mpsc::UnboundedReceiver<Message>) {
        debug!(agent = %self.id, "Dispatch loop running");

        while self.running.load(Ordering::SeqCst) {
            match tokio::time::timeout(self.poll_interval, mailbox.recv()).await {
                Ok(Some(message)) => {
                    self.dispatch(message).await;
                    self.processed.fetch_add(1, Ordering::SeqCst);
                }
                Ok(None) => break,
                // Poll tick: re-check the running flag.
                Err(_) => continue,
            }
        }

        debug!(agent = %self.id, "Dispatch loop exited");
    }

    async fn dispatch(&self, message: Message) {
        let Message {
            id, sender, body, ..
        } = message;

        match body {
            MessageBody::TaskRequest(task) => self.process_task(sender, task).await,
            MessageBody::StatusUpdate(payload) => {
                debug!(agent = %self.id, from = %sender, keys = payload.len(), "Status update");
            }
            MessageBody::Coordination(payload) => {
                debug!(agent = %self.id, from = %sender, keys = payload.len(), "Coordination message");
            }
            MessageBody::Error { message } => {
                warn!(agent = %self.id, from = %sender, error = %message, "Error message received");
            }
            MessageBody::TaskResponse(task) => {
                debug!(
                    agent = %self.id,
                    message_id = %id,
                    task_id = %task.id,
                    "Ignoring task response addressed to agent"
                );
            }
        }
    }

    /// Run `task` and send exactly one response to `reply_to`, whatever the
    /// handler does.
    async fn process_task(&self, reply_to: String, mut task: Task) {
        task.start(&self.id);
        info!(agent = %self.id, task_id = %task.id, task_type = %task.task_type, "Processing task");

        match self.execute(&task).await {
            Ok(result) => {
                debug!(agent = %self.id, task_id = %task.id, "Task completed");
                task.complete(result);
            }
            Err(e) => {
                warn!(agent = %self.id, task_id = %task.id, error = %e, "Task failed");
                task.fail(e.to_string());
            }
        }

        let response = Message::task_response(self.id.clone(), reply_to, task);
        match self.router() {
            Some(router) => router.route(response),
            None => warn!(
                agent = %self.id,
                message_id = %response.id,
                "No router attached, dropping task response"
            ),
        }
    }

    async fn execute(&self, task: &Task) -> Result<Value> {
        let Some(handler) = self.handlers.get(&task.task_type).cloned() else {
            warn!(
                agent = %self.id,
                task_type = %task.task_type,
                "No handler for task type, returning null result"
            );
            return Ok(Value::Null);
        };

        // Run on its own task so a panicking handler still yields a response.
        let tools = Arc::clone(&self.tools);
        let task = task.clone();
        match tokio::spawn(async move { handler.handle(&task, &tools).await }).await {
            Ok(result) => result,
            Err(e) => Err(ProctorError::Agent(format!("handler aborted: {e}"))),
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("tools", &self.tools)
            .finish()
    }
}
