//! Cohere chat provider (v1 chat API).
//!
//! The final user turn is sent as `message`; earlier turns go in
//! `chat_history` and system text becomes the `preamble`.

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

pub const COHERE_KEY: KeyLookup = KeyLookup::new("Cohere API key", &["COHERE_API_KEY"]);

const DEFAULT_BASE_URL: &str = "https://api.cohere.ai/v1";

#[derive(Debug)]
pub struct CohereProvider {
    endpoint: HttpEndpoint,
}

impl CohereProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: HttpEndpoint::with_key(api_key, &COHERE_KEY, DEFAULT_BASE_URL, AuthStyle::Bearer)?,
        })
    }

    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: HttpEndpoint::from_config(config, &COHERE_KEY, DEFAULT_BASE_URL, AuthStyle::Bearer)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct CohereRequest {
    model: String,
    message: String,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    preamble: Option<String>,
    chat_history: Vec<CohereTurn>,
}

#[derive(Debug, Serialize)]
struct CohereTurn {
    role: &'static str,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CohereResponse {
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    meta: Option<CohereMeta>,
}

#[derive(Debug, Deserialize)]
struct CohereMeta {
    #[serde(default)]
    tokens: Option<CohereTokens>,
}

#[derive(Debug, Deserialize)]
struct CohereTokens {
    input_tokens: u32,
    output_tokens: u32,
}

fn error_message(body: &JsonValue) -> Option<String> {
    body["message"].as_str().map(str::to_string)
}

fn build_request(messages: Vec<ChatMessage>, config: &CompletionConfig) -> CohereRequest {
    let (preamble, mut turns) = split_system(messages);
    let message = match turns.last() {
        Some(last) if last.role == "user" => turns.pop().map(|m| m.content).unwrap_or_default(),
        _ => String::new(),
    };

    CohereRequest {
        model: config.model.clone(),
        message,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        preamble,
        chat_history: turns
            .into_iter()
            .map(|m| CohereTurn {
                role: if m.role == "assistant" { "CHATBOT" } else { "USER" },
                message: m.content,
            })
            .collect(),
    }
}

#[async_trait]
impl LlmProvider for CohereProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = build_request(messages.clone(), config);
        let body: CohereResponse = self
            .endpoint
            .post_json("chat", &request, config, &[], error_message)
            .await?;

        let usage = match body.meta.and_then(|m| m.tokens) {
            Some(t) => TokenUsage {
                prompt_tokens: t.input_tokens,
                completion_tokens: t.output_tokens,
                estimated: false,
            },
            None => TokenUsage::estimate(&messages, &body.text),
        };

        Ok(CompletionResponse {
            content: body.text,
            usage,
            model: config.model.clone(),
            stop_reason: body.finish_reason,
        })
    }

    async fn health_check(&self) -> bool {
        self.endpoint.has_key()
    }

    fn name(&self) -> &str {
        "cohere"
    }
}

/// Factory for `type: cohere`.
pub struct CohereProviderFactory;

impl ProviderFactory for CohereProviderFactory {
    fn provider_type(&self) -> &'static str {
        "cohere"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(CohereProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        HttpEndpoint::validate(config, &COHERE_KEY, DEFAULT_BASE_URL)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "model": "command-r-plus" })
    }

    fn description(&self) -> &'static str {
        "Cohere chat API"
    }
}
