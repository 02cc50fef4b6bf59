//! Retry decorator for providers.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use routebench_core::Capabilities;
use std::sync::Arc;
use std::time::Duration;

use super::{ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError};

/// Wraps a provider and retries transient failures with exponential backoff.
///
/// Only errors for which [`ProviderError::is_retryable`] holds are retried.
/// One logical call still yields exactly one record upstream, whatever the
/// number of attempts.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    max_attempts: usize,
    min_delay: Duration,
    max_delay: Duration,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>) -> Self {
        Self {
            inner,
            max_attempts: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Total attempts including the first; `1` disables retries.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_delays(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min;
        self.max_delay = max.max(min);
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts - 1)
            .with_jitter()
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let inner = &self.inner;
        let name = inner.name();

        (|| {
            let messages = messages.clone();
            async move { inner.complete(messages, config).await }
        })
        .retry(self.backoff())
        .when(|e: &ProviderError| e.is_retryable())
        .notify(|e: &ProviderError, delay: Duration| {
            tracing::debug!(provider = %name, error = %e, ?delay, "retrying provider call");
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }
}
