//! LLM gateway
//!
//! One capability: `chat`. The engine uses it for fact extraction, dedup
//! verification, entity-merge confirmation, contradiction classification,
//! summaries, and search-term extraction - every one of those callers is
//! fail-open, so a broken provider degrades behaviour without ever
//! failing a request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::GatewayConfig;
use crate::error::GatewayError;

// ============================================================================
// MESSAGES
// ============================================================================

/// Chat role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Per-call knobs
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Override the configured model
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object response
    pub json_mode: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.0,
            max_tokens: 512,
            json_mode: false,
        }
    }
}

impl ChatOptions {
    pub fn json() -> Self {
        Self {
            json_mode: true,
            ..Self::default()
        }
    }
}

// ============================================================================
// TRAIT
// ============================================================================

/// Capability surface of the chat provider
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one chat completion and return the assistant text.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, GatewayError>;
}

// ============================================================================
// OPENAI-COMPATIBLE HTTP IMPLEMENTATION
// ============================================================================

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Deadline for one chat round trip
const CHAT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// `/v1/chat/completions` client
pub struct HttpChatModel {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpChatModel {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, GatewayError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.config.model),
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        if options.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                detail: response.text().await.unwrap_or_default(),
            });
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GatewayError::InvalidResponse("no completion choices".into()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let message = ChatMessage::system("be terse");
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["role"], "system");
        assert_eq!(encoded["content"], "be terse");
    }

    #[test]
    fn default_options_are_deterministic() {
        let options = ChatOptions::default();
        assert_eq!(options.temperature, 0.0);
        assert!(!options.json_mode);
        assert!(ChatOptions::json().json_mode);
    }
}
