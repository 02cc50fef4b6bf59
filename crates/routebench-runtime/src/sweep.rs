//! Sweep controller.
//!
//! Fans every (prompt version, provider, iteration) job out to the
//! providers through a bounded worker pool and folds each result into a
//! shared [`ConsistencyAggregator`]. Every job yields exactly one record:
//! a normalized reply, or a `ProviderCallFailed` record for errors,
//! timeouts and open circuits. Only configuration problems are fatal, and
//! they surface before the first call.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use routebench_core::{
    Capabilities, Checkpoint, CheckpointError, ConsistencyAggregator, ErrorKind,
    ExtractionNormalizer, MetricsReducer, RawReply, RecordKey, Report, ResponseRecord, Scenario,
    ScenarioError,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{ConfigError, RuntimeConfig, SweepFile};
use crate::prompts::{PromptContext, PromptError, PromptStore};
use crate::providers::{
    ChatMessage, CompletionConfig, LlmProvider, ProviderError, ProviderRegistry, RetryingProvider,
};
use crate::resilience::{BudgetTracker, CircuitBreaker, LlmUsage};

/// Log progress every this many iterations per (version, provider) pair.
const PROGRESS_EVERY: u32 = 5;

/// Errors that stop a sweep from starting.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// A provider bound to its per-call settings.
pub struct ProviderSlot {
    /// Scenario provider id, e.g. "Cohere"
    pub id: String,
    pub provider: Arc<dyn LlmProvider>,
    pub completion: CompletionConfig,
    pub capabilities: Capabilities,
}

impl ProviderSlot {
    pub fn new(id: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        let capabilities = provider.capabilities();
        Self {
            id: id.into(),
            provider,
            completion: CompletionConfig::default(),
            capabilities,
        }
    }

    pub fn with_completion(mut self, completion: CompletionConfig) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("id", &self.id)
            .field("provider", &self.provider.name())
            .field("model", &self.completion.model)
            .finish()
    }
}

struct Job {
    key: RecordKey,
    slot: usize,
}

/// What a finished (or interrupted) sweep produced.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub report: Report,
    /// Usage ledger per provider id
    pub usage: BTreeMap<String, LlmUsage>,
    /// Observations the aggregator refused
    pub rejected: u64,
    /// True when the sweep stopped before issuing every job
    pub cancelled: bool,
    /// True when the token budget is what stopped it
    pub budget_exhausted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SweepOutcome {
    pub fn total_usage(&self) -> LlmUsage {
        let mut total = LlmUsage::default();
        for usage in self.usage.values() {
            total.merge(usage);
        }
        total
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Runs one scenario against its providers.
pub struct SweepController {
    scenario: Scenario,
    slots: Vec<ProviderSlot>,
    prompts: BTreeMap<String, Vec<ChatMessage>>,
    normalizer: ExtractionNormalizer,
    aggregator: Arc<ConsistencyAggregator>,
    config: RuntimeConfig,
    circuit_breaker: CircuitBreaker,
    budget: BudgetTracker,
}

impl SweepController {
    pub fn builder(scenario: Scenario) -> SweepControllerBuilder {
        SweepControllerBuilder::new(scenario)
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn aggregator(&self) -> &Arc<ConsistencyAggregator> {
        &self.aggregator
    }

    /// Snapshot the aggregator for writing to disk.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::capture(&self.aggregator)
    }

    /// Jobs not yet observed, iteration-major so that an interrupted sweep
    /// leaves every pair with a similar number of samples.
    fn pending_jobs(&self) -> Vec<Job> {
        let mut jobs = Vec::new();
        for i in 0..self.scenario.iterations_per_config {
            for version in &self.scenario.prompt_versions {
                for (slot, provider) in self.slots.iter().enumerate() {
                    let key = RecordKey::new(version.clone(), provider.id.clone(), i);
                    if !self.aggregator.has_observed(&key) {
                        jobs.push(Job { key, slot });
                    }
                }
            }
        }
        jobs
    }

    /// Run to completion.
    pub async fn run(&self) -> SweepOutcome {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until every job is done, the token budget runs out, or
    /// `shutdown` resolves, whichever comes first.
    ///
    /// On shutdown, calls still in flight are dropped; everything observed
    /// so far stays in the aggregator and is reported.
    pub async fn run_until<F>(&self, shutdown: F) -> SweepOutcome
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        let jobs = self.pending_jobs();
        let total = jobs.len();
        let budget_stopped = AtomicBool::new(false);

        tracing::info!(
            scenario = %self.scenario.title(),
            versions = self.scenario.prompt_versions.len(),
            providers = self.slots.len(),
            iterations = self.scenario.iterations_per_config,
            pending = total,
            concurrency = self.config.concurrency,
            "Starting sweep"
        );

        let work = stream::iter(jobs)
            .take_while(|_| {
                let exhausted = self.budget.is_exhausted();
                if exhausted && !budget_stopped.swap(true, Ordering::SeqCst) {
                    tracing::warn!("Token budget exhausted, no new calls will be issued");
                }
                std::future::ready(!exhausted)
            })
            .map(|job| self.run_job(job))
            .buffer_unordered(self.config.concurrency)
            .for_each(|()| std::future::ready(()));

        tokio::pin!(shutdown);
        let interrupted = tokio::select! {
            () = work => false,
            () = &mut shutdown => {
                tracing::warn!("Shutdown requested, stopping sweep");
                true
            }
        };

        let budget_exhausted = budget_stopped.load(Ordering::SeqCst);
        let report = MetricsReducer::new(&self.scenario).reduce_all(&self.aggregator);
        let outcome = SweepOutcome {
            report,
            usage: self.budget.usage_by_provider(),
            rejected: self.aggregator.rejected_count(),
            cancelled: interrupted || budget_exhausted,
            budget_exhausted,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            observed = self.aggregator.observed_count(),
            configured = self.scenario.total_iterations(),
            rejected = outcome.rejected,
            cancelled = outcome.cancelled,
            tokens = outcome.total_usage().total_tokens,
            "Sweep finished"
        );
        outcome
    }

    async fn run_job(&self, job: Job) {
        let slot = &self.slots[job.slot];
        let bucket = job.key.bucket();

        let record = if self.circuit_breaker.is_open(&slot.id) {
            ResponseRecord::failed(
                job.key,
                ErrorKind::ProviderCallFailed,
                "circuit open: call skipped after repeated provider failures",
                None,
            )
        } else {
            self.call(slot, job.key).await
        };

        if self.aggregator.observe(record).is_ok() {
            let seen = self.aggregator.iterations_seen(&bucket);
            let configured = self.scenario.iterations_per_config;
            if seen % PROGRESS_EVERY == 0 || seen == configured {
                tracing::info!(
                    version = %bucket.prompt_version,
                    provider = %bucket.provider,
                    seen,
                    configured,
                    "Progress"
                );
            }
        }
    }

    async fn call(&self, slot: &ProviderSlot, key: RecordKey) -> ResponseRecord {
        let Some(messages) = self.prompts.get(&key.prompt_version) else {
            return ResponseRecord::failed(
                key,
                ErrorKind::ProviderCallFailed,
                "no rendered prompt for this version",
                None,
            );
        };

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.request_timeout,
            slot.provider.complete(messages.clone(), &slot.completion),
        )
        .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let error = match result {
            Ok(Ok(response)) => {
                self.circuit_breaker.record_success(&slot.id);
                self.budget
                    .record_usage(&slot.id, &response.usage, &response.model);

                let reply = RawReply::new(response.content)
                    .with_latency(latency_ms)
                    .with_tokens(
                        u64::from(response.usage.prompt_tokens),
                        u64::from(response.usage.completion_tokens),
                    );
                return self.normalizer.normalize(key, &reply, slot.capabilities);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "timed out after {}",
                humantime::format_duration(self.config.request_timeout)
            ),
        };

        tracing::warn!(
            provider = %slot.id,
            version = %key.prompt_version,
            iteration = key.iteration_index,
            error = %error,
            "Provider call failed"
        );
        self.circuit_breaker.record_failure(&slot.id);
        self.budget.record_failure(&slot.id);
        ResponseRecord::failed(key, ErrorKind::ProviderCallFailed, error, Some(latency_ms))
    }
}

/// Builder for [`SweepController`].
pub struct SweepControllerBuilder {
    scenario: Scenario,
    slots: Vec<ProviderSlot>,
    prompts: PromptStore,
    config: RuntimeConfig,
    aggregator: Option<ConsistencyAggregator>,
}

impl SweepControllerBuilder {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            slots: Vec::new(),
            prompts: PromptStore::builtin(),
            config: RuntimeConfig::default(),
            aggregator: None,
        }
    }

    /// Build slots for every scenario provider from a sweep file.
    ///
    /// Models default to the factory's `model` when the provider entry names none.
    pub fn from_sweep_file(
        sweep: &SweepFile,
        registry: &ProviderRegistry,
        prompts: PromptStore,
    ) -> Result<Self, RuntimeError> {
        let mut builder = Self::new(sweep.scenario.clone())
            .config(sweep.runtime.clone())
            .prompts(prompts);

        for id in &sweep.scenario.providers {
            let spec = sweep.providers.get(id).ok_or_else(|| {
                RuntimeError::ProviderNotConfigured(format!("no providers: entry for '{}'", id))
            })?;

            let provider = registry.create(&spec.provider_type, &spec.factory_config())?;
            let model = spec
                .model
                .clone()
                .or_else(|| {
                    registry
                        .default_config(&spec.provider_type)
                        .and_then(|c| c["model"].as_str().map(str::to_string))
                })
                .unwrap_or_default();

            let completion = CompletionConfig {
                model,
                max_tokens: spec.max_tokens.unwrap_or(sweep.runtime.max_tokens),
                temperature: spec.temperature.unwrap_or(sweep.runtime.temperature),
                timeout: sweep.runtime.request_timeout,
            };
            let capabilities = spec.capabilities.unwrap_or_else(|| provider.capabilities());

            builder = builder.slot(
                ProviderSlot::new(id.clone(), provider)
                    .with_completion(completion)
                    .with_capabilities(capabilities),
            );
        }
        Ok(builder)
    }

    /// Register a provider under a scenario provider id with default settings.
    pub fn provider(self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        let completion = CompletionConfig {
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            timeout: self.config.request_timeout,
            ..CompletionConfig::default()
        };
        self.slot(ProviderSlot::new(id, provider).with_completion(completion))
    }

    pub fn slot(mut self, slot: ProviderSlot) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn prompts(mut self, prompts: PromptStore) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Continue from an existing aggregator; observed jobs are skipped.
    pub fn aggregator(mut self, aggregator: ConsistencyAggregator) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Continue from a checkpoint.
    pub fn resume_from(self, checkpoint: Checkpoint) -> Result<Self, RuntimeError> {
        let aggregator = checkpoint.into_aggregator(&self.scenario)?;
        tracing::info!(observed = aggregator.observed_count(), "Resuming from checkpoint");
        Ok(self.aggregator(aggregator))
    }

    pub fn build(self) -> Result<SweepController, RuntimeError> {
        self.scenario.validate()?;
        self.config.validate()?;

        let mut by_id: BTreeMap<String, ProviderSlot> = BTreeMap::new();
        for slot in self.slots {
            if !self.scenario.providers.contains(&slot.id) {
                return Err(RuntimeError::ProviderNotConfigured(format!(
                    "provider '{}' is not listed in the scenario",
                    slot.id
                )));
            }
            by_id.insert(slot.id.clone(), slot);
        }

        let mut slots = Vec::with_capacity(self.scenario.providers.len());
        for id in &self.scenario.providers {
            let mut slot = by_id.remove(id).ok_or_else(|| {
                RuntimeError::ProviderNotConfigured(format!("no provider registered for '{}'", id))
            })?;
            if self.config.retry.max_attempts > 1 {
                slot.provider = Arc::new(
                    RetryingProvider::new(slot.provider)
                        .with_max_attempts(self.config.retry.max_attempts)
                        .with_delays(self.config.retry.min_delay, self.config.retry.max_delay),
                );
            }
            slots.push(slot);
        }

        self.prompts.ensure_versions(&self.scenario.prompt_versions)?;
        let context = PromptContext::from_scenario(&self.scenario);
        let mut prompts = BTreeMap::new();
        for version in &self.scenario.prompt_versions {
            prompts.insert(version.clone(), self.prompts.render(version, &context)?);
        }

        let aggregator = match self.aggregator {
            Some(agg) if agg.scenario() != &self.scenario => {
                return Err(RuntimeError::Config(ConfigError::Invalid(
                    "aggregator was built for a different scenario".to_string(),
                )))
            }
            Some(agg) => agg,
            None => ConsistencyAggregator::new(self.scenario.clone()),
        };

        Ok(SweepController {
            normalizer: ExtractionNormalizer::for_scenario(&self.scenario),
            circuit_breaker: CircuitBreaker::new(self.config.circuit_breaker.clone()),
            budget: BudgetTracker::new(self.config.max_total_tokens),
            aggregator: Arc::new(aggregator),
            scenario: self.scenario,
            slots,
            prompts,
            config: self.config,
        })
    }
}
