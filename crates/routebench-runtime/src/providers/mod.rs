//! Provider clients.
//!
//! [`LlmProvider`] is the one seam between a sweep and the outside world.
//! Anthropic, Cohere and DeepSeek clients sit behind cargo features of the
//! same name; the scripted provider is always compiled in.
//!
//! Hosted providers read their keys through [`secrets::KeyLookup`].

use async_trait::async_trait;
use routebench_core::Capabilities;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
mod retry;
mod scripted;
pub mod secrets;

#[cfg(any(feature = "anthropic", feature = "cohere", feature = "deepseek"))]
mod http;

#[cfg(feature = "anthropic")]
mod anthropic;
#[cfg(feature = "cohere")]
mod cohere;
#[cfg(feature = "deepseek")]
mod deepseek;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use retry::RetryingProvider;
pub use scripted::{ScriptedProvider, ScriptedProviderFactory, ScriptedReply};
pub use secrets::{ApiCredential, CredentialSource, KeyLookup};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};
#[cfg(feature = "cohere")]
pub use cohere::{CohereProvider, CohereProviderFactory};
#[cfg(feature = "deepseek")]
pub use deepseek::{DeepSeekProvider, DeepSeekProviderFactory};

/// Why a provider call produced no reply.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    HttpError(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    ParseError(String),

    #[error("API key rejected")]
    AuthError,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            ProviderError::ParseError(_)
            | ProviderError::AuthError
            | ProviderError::NotConfigured(_) => false,
        }
    }
}

/// Per-call settings, fixed for every iteration of one provider.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 500,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
        }
    }
}

/// One chat turn; `role` is "system", "user" or "assistant".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Split off the system prompt; remaining messages keep their order.
#[cfg_attr(not(any(feature = "anthropic", feature = "cohere")), allow(dead_code))]
pub(crate) fn split_system(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ChatMessage>) {
    let mut system: Option<String> = None;
    let mut others = Vec::new();
    for msg in messages {
        if msg.role == "system" {
            system = Some(match system {
                Some(prev) => format!("{}\n\n{}", prev, msg.content),
                None => msg.content,
            });
        } else {
            others.push(msg);
        }
    }
    (system, others)
}

/// A provider's reply before normalization.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Model the API says answered, which may differ from the one requested
    pub model: String,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,

    /// True when the provider reported nothing and these are estimates
    #[serde(default)]
    pub estimated: bool,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Estimate usage from text when the API reports none.
    pub fn estimate(messages: &[ChatMessage], completion: &str) -> Self {
        let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        Self {
            prompt_tokens: estimate_tokens_for_len(prompt_chars),
            completion_tokens: estimate_tokens_for_len(completion.len()),
            estimated: true,
        }
    }
}

/// ~4 characters per token, rounded up.
pub fn estimate_tokens_for_len(chars: usize) -> u32 {
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// A chat-completion backend.
///
/// Sweeps reach providers only through this trait, so tests swap in
/// scripted or mock implementations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Cheap local check; never calls the API.
    async fn health_check(&self) -> bool;

    /// Backend name for logs, e.g. "anthropic".
    fn name(&self) -> &str;

    /// What this provider's replies are expected to carry.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        estimate_tokens_for_len(text.len())
    }
}
