//! Capability and routing traits.
//!
//! These traits are defined in `proctor-common` so that both the coordinator
//! and agent crates can reference them without circular dependencies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::ToolError;
use crate::message::Message;
use crate::task::Payload;

/// A capability an agent invokes but does not own.
///
/// Tools are leaves: they never hold a reference to the agent using them and
/// never send messages themselves.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the agent looks the tool up by.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, args: Payload) -> std::result::Result<Value, ToolError>;
}

/// Delivers messages to their receiver.
///
/// Agents keep a non-owning reference to their router and send every
/// outbound message through it.
pub trait MessageRouter: Send + Sync {
    /// Identity used as the sender/receiver of broker traffic.
    fn router_id(&self) -> &str;

    /// Deliver `message`. Unknown receivers are dropped, never reported back.
    fn route(&self, message: Message);
}

/// Name-indexed set of tools owned by one agent.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool`, replacing any tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.write().insert(tool.name().to_string(), tool)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up `name` and execute it with `args`.
    pub async fn execute(&self, name: &str, args: Payload) -> std::result::Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(args).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
