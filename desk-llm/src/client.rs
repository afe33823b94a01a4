use crate::error::{LlmError, Result};
use crate::openai::OpenAiClient;
use crate::types::{ChatMessage, ChatResponse, ToolDefinition};
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const MAX_TOOL_NAME_LEN: usize = 64;

/// The model as seen by the agent loop: a function from prompt context and
/// tool schema to assistant text plus zero or more tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDefinition])
    -> Result<ChatResponse>;

    fn model(&self) -> &str;
}

/// Client for any OpenAI-compatible chat completions endpoint
/// (OpenRouter, OpenAI, local gateways).
#[derive(Clone)]
pub struct LlmClient {
    inner: OpenAiClient,
    model: String,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(LlmError::InvalidInput("api key is required".to_string()));
        }
        if model.trim().is_empty() {
            return Err(LlmError::InvalidInput("model is required".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let base_url = base_url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            inner: OpenAiClient::new(http, api_key, model, base_url),
            model: model.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.inner.base_url()
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        self.inner.chat(messages, tools).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Tool names must match `^[a-zA-Z0-9_-]{1,64}$` to be accepted by
/// OpenAI-compatible providers.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LlmError::InvalidInput("tool name is empty".to_string()));
    }
    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} exceeds {MAX_TOOL_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_names_are_validated() {
        assert!(validate_tool_name("get_order_status").is_ok());
        assert!(validate_tool_name("cancel-order").is_ok());
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("orders.cancel").is_err());
        assert!(validate_tool_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn validated_definition_rejects_bad_names() {
        let err = ToolDefinition::validated("bad name", "desc", json!({})).unwrap_err();
        assert!(err.to_string().contains("invalid character"));
    }

    #[test]
    fn client_requires_key_and_model() {
        assert!(LlmClient::new("", "gpt-4o-mini", None).is_err());
        assert!(LlmClient::new("sk-test", " ", None).is_err());
        let client = LlmClient::new("sk-test", "gpt-4o-mini", None).expect("client");
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
        assert_eq!(client.model(), "gpt-4o-mini");
    }
}
