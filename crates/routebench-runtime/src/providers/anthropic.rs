//! Anthropic Claude provider (messages API).
//!
//! System text goes in the top-level `system` field; the remaining turns
//! are sent as-is.

use super::{
    factory::ProviderFactory,
    http::{AuthStyle, HttpEndpoint},
    secrets::KeyLookup,
    split_system, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// `CLAUDE_API_KEY` is accepted as an alias.
pub const ANTHROPIC_KEY: KeyLookup =
    KeyLookup::new("Anthropic API key", &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"]);

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const AUTH: AuthStyle = AuthStyle::Header("x-api-key");
const VERSION_HEADER: (&str, &str) = ("anthropic-version", "2023-06-01");

#[derive(Debug)]
pub struct AnthropicProvider {
    endpoint: HttpEndpoint,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: HttpEndpoint::with_key(api_key, &ANTHROPIC_KEY, DEFAULT_BASE_URL, AUTH)?,
        })
    }

    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: HttpEndpoint::from_config(config, &ANTHROPIC_KEY, DEFAULT_BASE_URL, AUTH)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

impl MessagesRequest {
    fn new(messages: Vec<ChatMessage>, config: &CompletionConfig) -> Self {
        let (system, turns) = split_system(messages);
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system,
            messages: turns,
            temperature: config.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Option<MessagesUsage>,
}

/// Only text blocks carry a reply; other block types have no `text`.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl MessagesResponse {
    fn into_completion(self, messages: &[ChatMessage]) -> CompletionResponse {
        let content: String = self.content.into_iter().filter_map(|b| b.text).collect();
        let usage = self.usage.map_or_else(
            || TokenUsage::estimate(messages, &content),
            |u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                estimated: false,
            },
        );
        CompletionResponse {
            content,
            usage,
            model: self.model,
            stop_reason: self.stop_reason,
        }
    }
}

fn error_message(body: &JsonValue) -> Option<String> {
    body["error"]["message"].as_str().map(str::to_string)
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = MessagesRequest::new(messages.clone(), config);
        let body: MessagesResponse = self
            .endpoint
            .post_json("messages", &request, config, &[VERSION_HEADER], error_message)
            .await?;
        Ok(body.into_completion(&messages))
    }

    async fn health_check(&self) -> bool {
        self.endpoint.has_key()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Factory for `type: anthropic`.
///
/// Settings: `api_key` (else `ANTHROPIC_API_KEY` / `CLAUDE_API_KEY`),
/// `base_url`, `model`.
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(AnthropicProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        HttpEndpoint::validate(config, &ANTHROPIC_KEY, DEFAULT_BASE_URL)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "model": "claude-sonnet-4-5-20250514" })
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude messages API"
    }
}
