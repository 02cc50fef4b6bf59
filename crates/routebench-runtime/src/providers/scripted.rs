//! Offline provider that plays back canned replies.
//!
//! Useful for demos, CI and dry runs of a sweep file: replies are handed
//! out round-robin in call order, so a sweep with one script per provider
//! exercises the whole pipeline without credentials.
//!
//! ```yaml
//! type: scripted
//! latency: 20ms
//! replies:
//!   - '{"endpoint": "analyze_job_fit", "parameters": {"person_name": "Jane"}}'
//!   - error: upstream overloaded
//!     status: 503
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::ProviderFactory, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError, TokenUsage,
};

/// One canned reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ScriptedReply {
    /// Returned verbatim as the completion text.
    Text(String),
    /// Returned as an API error.
    Failure {
        error: String,
        #[serde(default = "default_error_status")]
        status: u16,
    },
}

fn default_error_status() -> u16 {
    400
}

#[derive(Debug, Deserialize)]
struct ScriptedConfig {
    replies: Vec<ScriptedReply>,
    #[serde(default)]
    latency: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Provider backed by a fixed reply script.
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    replies: Vec<ScriptedReply>,
    latency: Duration,
    cursor: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            name: "scripted".to_string(),
            replies,
            latency: Duration::ZERO,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Provider that always returns the same text.
    pub fn constant(text: impl Into<String>) -> Self {
        Self::new(vec![ScriptedReply::Text(text.into())])
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let parsed: ScriptedConfig = serde_json::from_value(config.clone())
            .map_err(|e| ProviderError::NotConfigured(format!("scripted provider: {}", e)))?;
        if parsed.replies.is_empty() {
            return Err(ProviderError::NotConfigured(
                "scripted provider needs at least one reply".to_string(),
            ));
        }

        let latency = match parsed.latency.as_deref() {
            Some(text) => humantime::parse_duration(text).map_err(|e| {
                ProviderError::NotConfigured(format!("scripted provider latency '{}': {}", text, e))
            })?,
            None => Duration::ZERO,
        };

        let mut provider = Self::new(parsed.replies).with_latency(latency);
        if let Some(name) = parsed.name {
            provider = provider.with_name(name);
        }
        Ok(provider)
    }

    /// Number of calls served so far.
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> &ScriptedReply {
        let n = self.cursor.fetch_add(1, Ordering::SeqCst);
        &self.replies[n % self.replies.len()]
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        if self.replies.is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "{} has no scripted replies",
                self.name
            )));
        }

        let reply = self.next_reply().clone();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match reply {
            ScriptedReply::Text(content) => Ok(CompletionResponse {
                usage: TokenUsage::estimate(&messages, &content),
                content,
                model: if config.model.is_empty() {
                    "scripted".to_string()
                } else {
                    config.model.clone()
                },
                stop_reason: Some("end_turn".to_string()),
            }),
            ScriptedReply::Failure { error, status } => Err(ProviderError::ApiError {
                status,
                message: error,
            }),
        }
    }

    async fn health_check(&self) -> bool {
        !self.replies.is_empty()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory for `type: scripted`.
pub struct ScriptedProviderFactory;

impl ProviderFactory for ScriptedProviderFactory {
    fn provider_type(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(ScriptedProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        ScriptedProvider::from_config(config).map(|_| ())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "model": "scripted" })
    }

    fn description(&self) -> &'static str {
        "Plays back canned replies without network access"
    }
}
