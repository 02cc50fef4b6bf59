//! DeepSeek provider (OpenAI-compatible chat completions).

use super::{
    factory::ProviderFactory,
    http::{AuthStyle, HttpEndpoint},
    secrets::KeyLookup,
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const DEEPSEEK_KEY: KeyLookup = KeyLookup::new("DeepSeek API key", &["DEEPSEEK_API_KEY"]);

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";

#[derive(Debug)]
pub struct DeepSeekProvider {
    endpoint: HttpEndpoint,
}

impl DeepSeekProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: HttpEndpoint::with_key(api_key, &DEEPSEEK_KEY, DEFAULT_BASE_URL, AuthStyle::Bearer)?,
        })
    }

    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: HttpEndpoint::from_config(config, &DEEPSEEK_KEY, DEFAULT_BASE_URL, AuthStyle::Bearer)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn error_message(body: &JsonValue) -> Option<String> {
    body["error"]["message"].as_str().map(str::to_string)
}

#[async_trait]
impl LlmProvider for DeepSeekProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages: &messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: false,
        };

        let body: ChatResponse = self
            .endpoint
            .post_json("chat/completions", &request, config, &[], error_message)
            .await?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;
        let content = choice.message.content.unwrap_or_default();

        let usage = match body.usage {
            Some(u) => TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                estimated: false,
            },
            None => TokenUsage::estimate(&messages, &content),
        };

        Ok(CompletionResponse {
            content,
            usage,
            model: body.model.unwrap_or_else(|| config.model.clone()),
            stop_reason: choice.finish_reason,
        })
    }

    async fn health_check(&self) -> bool {
        self.endpoint.has_key()
    }

    fn name(&self) -> &str {
        "deepseek"
    }
}

/// Factory for `type: deepseek`.
pub struct DeepSeekProviderFactory;

impl ProviderFactory for DeepSeekProviderFactory {
    fn provider_type(&self) -> &'static str {
        "deepseek"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(DeepSeekProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        HttpEndpoint::validate(config, &DEEPSEEK_KEY, DEFAULT_BASE_URL)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "model": "deepseek-chat" })
    }

    fn description(&self) -> &'static str {
        "DeepSeek OpenAI-compatible chat completions"
    }
}
