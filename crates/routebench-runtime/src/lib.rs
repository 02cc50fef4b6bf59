//! # routebench-runtime
//!
//! Async sweep execution for routebench.
//!
//! This crate drives a scenario against real (or scripted) LLM providers
//! and feeds every reply through the deterministic engine in
//! `routebench-core`.
//!
//! ## Architecture
//!
//! - **Bounded fan-out**: every (version, provider, iteration) job runs
//!   through `buffer_unordered(concurrency)`
//! - **One record per job**: errors, timeouts and open circuits become
//!   `ProviderCallFailed` records instead of aborting the sweep
//! - **Resilience**: retry with backoff, per-provider circuit breaker,
//!   optional global token budget
//! - **Resumable**: a checkpointed aggregator can be handed back in and
//!   only the missing jobs run
//!
//! ## Example
//!
//! ```rust,ignore
//! use routebench_runtime::{PromptStore, ProviderRegistry, SweepControllerBuilder, SweepFile};
//!
//! let sweep = SweepFile::from_file("sweep.yaml")?;
//! let registry = ProviderRegistry::with_defaults();
//! let controller = SweepControllerBuilder::from_sweep_file(&sweep, &registry, PromptStore::builtin())?
//!     .build()?;
//! let outcome = controller.run().await;
//! ```

pub mod config;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod sweep;

pub use config::{ConfigError, ProviderSpec, RetryConfig, RuntimeConfig, SweepFile};
pub use prompts::{PromptContext, PromptError, PromptStore, PromptTemplate};
pub use providers::{
    ApiCredential, ChatMessage, CompletionConfig, CompletionResponse, KeyLookup, LlmProvider, ProviderError,
    ProviderFactory, ProviderRegistry, RetryingProvider, ScriptedProvider, ScriptedReply,
    TokenUsage,
};
pub use resilience::{BudgetTracker, CircuitBreaker, CircuitBreakerConfig, LlmUsage};
pub use sweep::{ProviderSlot, RuntimeError, SweepController, SweepControllerBuilder, SweepOutcome};
