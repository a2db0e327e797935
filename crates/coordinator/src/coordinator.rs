//! Message router and task broker.
//!
//! The coordinator owns the agent registry and mediates all traffic between
//! agents. `dispatch` turns the one-way mailbox protocol into a bounded
//! request/response exchange keyed by task id.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use proctor_agents::Agent;
use proctor_common::{Message, MessageBody, MessageRouter, ProctorError, Result, Task};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// The router every agent answers through.
pub struct Coordinator {
    id: String,
    task_timeout: Duration,
    agents: RwLock<HashMap<String, Arc<Agent>>>,

    /// Tasks dispatched and not yet answered or timed out
    active_tasks: Mutex<HashMap<String, Task>>,

    /// Waiting brokers keyed by task id
    pending: Mutex<HashMap<String, oneshot::Sender<Task>>>,

    /// Handed to agents as their router back-reference
    self_ref: Weak<Coordinator>,
}

impl Coordinator {
    pub fn new(id: impl Into<String>, task_timeout: Duration) -> Arc<Self> {
        let id = id.into();
        info!(
            coordinator = %id,
            timeout_ms = task_timeout.as_millis() as u64,
            "Initializing coordinator"
        );

        Arc::new_cyclic(|self_ref| Self {
            id,
            task_timeout,
            agents: RwLock::new(HashMap::new()),
            active_tasks: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Add `agent` to the registry and point its responses at this
    /// coordinator. An id can be registered once; unregister it first to
    /// replace the agent.
    pub fn register_agent(&self, agent: Arc<Agent>) -> Result<()> {
        let mut agents = self.agents.write();
        let Entry::Vacant(slot) = agents.entry(agent.id().to_string()) else {
            return Err(ProctorError::Agent(format!(
                "agent {} is already registered",
                agent.id()
            )));
        };

        let router: Weak<dyn MessageRouter> = self.self_ref.clone();
        agent.attach(router);

        info!(agent = %agent.id(), "Registering agent");
        slot.insert(agent);
        Ok(())
    }

    pub fn unregister_agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        let removed = self.agents.write().remove(agent_id);
        if removed.is_some() {
            info!(agent = %agent_id, "Unregistered agent");
        }
        removed
    }

    pub fn agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents.read().get(agent_id).cloned()
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents.read().values().cloned().collect()
    }

    /// Registered agent ids, sorted.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids of tasks currently awaiting a response, sorted.
    pub fn active_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active_tasks.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Send `task` to `agent_id` and wait for its response.
    ///
    /// Returns the finished task (completed or failed) as the agent reported
    /// it. Fails with [`ProctorError::AgentNotFound`] for an unregistered
    /// target and [`ProctorError::TaskTimeout`] when no response arrives
    /// within the task timeout. The agent is never interrupted; a response
    /// arriving after the timeout is discarded.
    pub async fn dispatch(&self, agent_id: &str, task: Task) -> Result<Task> {
        let agent = self
            .agent(agent_id)
            .ok_or_else(|| ProctorError::AgentNotFound(agent_id.to_string()))?;

        let task_id = task.id.clone();
        let (tx, rx) = oneshot::channel();
        {
            let mut active = self.active_tasks.lock();
            if active.contains_key(&task_id) {
                return Err(ProctorError::DuplicateTask(task_id));
            }
            active.insert(task_id.clone(), task.clone());
            self.pending.lock().insert(task_id.clone(), tx);
        }
        // Clears both registries on every exit path, including cancellation.
        let _entry = ActiveEntry {
            coordinator: self,
            task_id: &task_id,
        };

        debug!(
            agent = %agent_id,
            task_id = %task_id,
            task_type = %task.task_type,
            "Dispatching task"
        );
        if !agent.deliver(Message::task_request(self.id.clone(), agent_id, task)) {
            return Err(ProctorError::Agent(format!(
                "agent {agent_id} is not accepting messages"
            )));
        }

        match tokio::time::timeout(self.task_timeout, rx).await {
            Ok(Ok(done)) => {
                debug!(task_id = %task_id, status = ?done.status, "Task response received");
                Ok(done)
            }
            Ok(Err(_)) => Err(ProctorError::Agent(format!(
                "response channel for task {task_id} closed"
            ))),
            Err(_) => {
                warn!(agent = %agent_id, task_id = %task_id, "Timed out waiting for task response");
                Err(ProctorError::TaskTimeout {
                    task_id: task_id.clone(),
                    timeout_ms: self.task_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn clear_entry(&self, task_id: &str) {
        self.active_tasks.lock().remove(task_id);
        self.pending.lock().remove(task_id);
    }

    fn deliver_response(&self, message: Message) {
        let Message {
            sender,
            body,
            correlation_id,
            ..
        } = message;

        let MessageBody::TaskResponse(task) = body else {
            debug!(from = %sender, "Coordinator ignoring non-response message");
            return;
        };

        let key = correlation_id.unwrap_or_else(|| task.id.clone());
        let waiter = self.pending.lock().remove(&key);
        self.active_tasks.lock().remove(&key);

        match waiter {
            Some(tx) => {
                if tx.send(task).is_err() {
                    debug!(task_id = %key, "Waiter gone, discarding response");
                }
            }
            None => debug!(task_id = %key, from = %sender, "No waiter for response, discarding"),
        }
    }
}

impl MessageRouter for Coordinator {
    fn router_id(&self) -> &str {
        &self.id
    }

    /// Deliver `message` to its receiver. Never fails: messages for unknown
    /// receivers are logged and dropped.
    fn route(&self, message: Message) {
        if message.receiver == self.id {
            self.deliver_response(message);
            return;
        }

        let receiver = message.receiver.clone();
        match self.agent(&receiver) {
            Some(agent) => {
                debug!(
                    to = %receiver,
                    from = %message.sender,
                    kind = ?message.message_type(),
                    "Routing message"
                );
                if !agent.deliver(message) {
                    warn!(agent = %receiver, "Agent mailbox closed, dropping message");
                }
            }
            None => {
                let error = ProctorError::AgentNotFound(receiver);
                warn!(error = %error, message_id = %message.id, "Dropping message");
            }
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("id", &self.id)
            .field("task_timeout", &self.task_timeout)
            .field("agents", &self.agent_ids())
            .field("active_tasks", &self.active_task_ids())
            .finish()
    }
}

struct ActiveEntry<'a> {
    coordinator: &'a Coordinator,
    task_id: &'a str,
}

impl Drop for ActiveEntry<'_> {
    fn drop(&mut self) {
        self.coordinator.clear_entry(self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_agents::{AgentBuilder, TaskHandler};
    use proctor_common::{Payload, TaskStatus, ToolRegistry};
    use serde_json::{json, Value};

    struct Sleepy(Duration);

    #[async_trait::async_trait]
    impl TaskHandler for Sleepy {
        async fn handle(&self, _task: &Task, _tools: &ToolRegistry) -> Result<Value> {
            tokio::time::sleep(self.0).await;
            Ok(json!("done"))
        }
    }

    fn sleepy_agent(id: &str, delay: Duration) -> Arc<Agent> {
        Arc::new(
            AgentBuilder::new(id)
                .poll_interval(Duration::from_millis(10))
                .handler("sleep", Arc::new(Sleepy(delay)))
                .build(),
        )
    }

    #[tokio::test]
    async fn dispatch_to_unknown_agent_fails_fast() {
        let coordinator = Coordinator::new("coordinator", Duration::from_secs(1));
        let err = coordinator
            .dispatch("ghost", Task::new("sleep", Payload::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProctorError::AgentNotFound(id) if id == "ghost"));
        assert!(coordinator.active_task_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_returns_completed_task() {
        let coordinator = Coordinator::new("coordinator", Duration::from_secs(5));
        let agent = sleepy_agent("worker", Duration::from_millis(100));
        coordinator.register_agent(agent.clone()).unwrap();
        agent.start().unwrap();

        let done = coordinator
            .dispatch("worker", Task::new("sleep", Payload::new()))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result, Some(json!("done")));
        assert!(coordinator.active_task_ids().is_empty());

        agent.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_clears_registry_and_leaves_agent_running() {
        let coordinator = Coordinator::new("coordinator", Duration::from_millis(200));
        let agent = sleepy_agent("worker", Duration::from_secs(1));
        coordinator.register_agent(agent.clone()).unwrap();
        agent.start().unwrap();

        let task = Task::new("sleep", Payload::new());
        let task_id = task.id.clone();
        let err = coordinator.dispatch("worker", task).await.unwrap_err();
        assert!(matches!(
            err,
            ProctorError::TaskTimeout { task_id: ref id, timeout_ms: 200 } if id == &task_id
        ));
        assert!(coordinator.active_task_ids().is_empty());

        // The late response lands on an abandoned channel without effect.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(agent.processed_count(), 1);
        assert!(agent.is_running());
        assert!(coordinator.active_task_ids().is_empty());

        agent.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_task_id_is_rejected_while_active() {
        let coordinator = Coordinator::new("coordinator", Duration::from_secs(5));
        let agent = sleepy_agent("worker", Duration::from_millis(500));
        coordinator.register_agent(agent.clone()).unwrap();
        agent.start().unwrap();

        let task = Task::new("sleep", Payload::new()).with_id("grade-42");
        let duplicate = Task::new("sleep", Payload::new()).with_id("grade-42");

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.dispatch("worker", task).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.active_task_ids().len(), 1);

        let err = coordinator.dispatch("worker", duplicate).await.unwrap_err();
        assert!(matches!(err, ProctorError::DuplicateTask(ref id) if id == "grade-42"));
        assert_eq!(coordinator.active_task_ids(), vec!["grade-42"]);

        assert!(first.await.unwrap().is_ok());
        agent.stop().await;
    }

    #[test]
    fn route_to_unknown_receiver_is_silent() {
        let coordinator = Coordinator::new("coordinator", Duration::from_secs(1));
        coordinator.route(Message::error("a", "nobody", "boom"));
        // Unsolicited response for no waiter
        coordinator.route(Message::task_response(
            "a",
            "coordinator",
            Task::new("x", Payload::new()),
        ));
        assert!(coordinator.active_task_ids().is_empty());
    }

    #[test]
    fn registry_introspection() {
        let coordinator = Coordinator::new("coordinator", Duration::from_secs(1));
        let first = sleepy_agent("a", Duration::ZERO);
        coordinator.register_agent(sleepy_agent("b", Duration::ZERO)).unwrap();
        coordinator.register_agent(first.clone()).unwrap();
        assert_eq!(coordinator.agent_ids(), vec!["a", "b"]);

        let err = coordinator
            .register_agent(sleepy_agent("a", Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, ProctorError::Agent(_)));
        assert!(Arc::ptr_eq(&coordinator.agent("a").unwrap(), &first));

        assert!(coordinator.unregister_agent("a").is_some());
        assert!(coordinator.unregister_agent("a").is_none());
        assert_eq!(coordinator.agent_ids(), vec!["b"]);
    }
}
