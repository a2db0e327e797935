use std::sync::Arc;

use async_trait::async_trait;
use proctor_common::{Payload, Tool, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn prompt(content: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage {
                role: Role::User,
                content: content.into(),
            }],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// Narrow interface to an AI text provider.
///
/// Implementations report quota/rate-limit responses as
/// [`ToolError::RateLimited`] so retry policies can classify them without
/// inspecting error text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> std::result::Result<LlmResponse, ToolError>;
    fn model_name(&self) -> &str;
}

#[async_trait]
impl LlmClient for Arc<dyn LlmClient> {
    async fn complete(&self, request: LlmRequest) -> std::result::Result<LlmResponse, ToolError> {
        (**self).complete(request).await
    }
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

pub const COMPLETION_TOOL: &str = "complete";

/// Exposes an [`LlmClient`] to agents as the `complete` capability.
///
/// Arguments: `prompt` (required), `system`, `temperature`, `max_tokens`.
/// Returns the completion text as a JSON string.
pub struct CompletionTool {
    client: Arc<dyn LlmClient>,
}

impl CompletionTool {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn build_request(args: &Payload) -> std::result::Result<LlmRequest, ToolError> {
        let prompt = args
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'prompt'".into()))?;

        let mut request = LlmRequest::prompt(prompt);
        request.system_prompt = args
            .get("system")
            .and_then(Value::as_str)
            .map(String::from);
        request.temperature = args
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|t| t as f32);
        request.max_tokens = args
            .get("max_tokens")
            .and_then(Value::as_u64)
            .map(|t| t as u32);
        Ok(request)
    }
}

#[async_trait]
impl Tool for CompletionTool {
    fn name(&self) -> &str {
        COMPLETION_TOOL
    }

    fn description(&self) -> &str {
        "Generate text with the configured AI provider"
    }

    async fn execute(&self, args: Payload) -> std::result::Result<Value, ToolError> {
        let request = Self::build_request(&args)?;
        let response = self.client.complete(request).await?;
        Ok(Value::String(response.content))
    }
}
