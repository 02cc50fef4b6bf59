//! Resilience patterns for sweeps.
//!
//! - Circuit breaker per provider, so a dead provider does not eat the
//!   whole timeout budget for every remaining iteration
//! - Token budget and usage ledger
//!
//! Retry with backoff lives in [`crate::providers::RetryingProvider`].

mod budget;
mod circuit_breaker;

pub use budget::{BudgetTracker, LlmUsage, TokenBudget};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
