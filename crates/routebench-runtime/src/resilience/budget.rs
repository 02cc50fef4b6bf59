//! Token budget and usage ledger for a sweep.
//!
//! A sweep can be capped by total tokens. Once the cap is reached no new
//! calls start; calls already in flight finish and are recorded.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::providers::TokenUsage;

/// A token cap shared by every provider in a sweep.
pub struct TokenBudget {
    pub max_tokens: u64,
    used: AtomicU64,
}

impl TokenBudget {
    pub fn new(max_tokens: u64) -> Self {
        Self {
            max_tokens,
            used: AtomicU64::new(0),
        }
    }

    pub fn can_afford(&self, tokens: u64) -> bool {
        self.remaining() >= tokens
    }

    pub fn record(&self, tokens: u64) {
        self.used.fetch_add(tokens, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> u64 {
        self.max_tokens.saturating_sub(self.used.load(Ordering::SeqCst))
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Accumulated usage for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,

    /// Calls that returned a reply
    pub llm_calls: u64,

    /// Calls that ended in an error or timeout
    pub failed_calls: u64,

    /// Calls whose token counts were estimated from text length
    pub estimated_calls: u64,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total());
        self.llm_calls += 1;
        if usage.estimated {
            self.estimated_calls += 1;
        }
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    /// Fold another ledger entry into this one.
    pub fn merge(&mut self, other: &LlmUsage) {
        self.total_tokens += other.total_tokens;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.llm_calls += other.llm_calls;
        self.failed_calls += other.failed_calls;
        self.estimated_calls += other.estimated_calls;
        self.estimated_cost += other.estimated_cost;
    }

    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens
        let (input_rate, output_rate) = match model {
            m if m.contains("opus") => (15.0, 75.0),
            m if m.contains("haiku") => (1.0, 5.0),
            m if m.contains("sonnet") || m.contains("claude") => (3.0, 15.0),
            m if m.contains("command-r-plus") => (2.5, 10.0),
            m if m.contains("command-r") => (0.15, 0.6),
            m if m.contains("deepseek") => (0.27, 1.1),
            "scripted" => (0.0, 0.0),
            _ => (3.0, 15.0),
        };

        let input_cost = (f64::from(usage.prompt_tokens) / 1_000_000.0) * input_rate;
        let output_cost = (f64::from(usage.completion_tokens) / 1_000_000.0) * output_rate;
        input_cost + output_cost
    }
}

/// Usage ledger keyed by provider id, with an optional global cap.
#[derive(Default)]
pub struct BudgetTracker {
    global: Option<TokenBudget>,
    usage: RwLock<BTreeMap<String, LlmUsage>>,
}

impl BudgetTracker {
    /// Tracker without a token cap.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn new(max_total_tokens: Option<u64>) -> Self {
        Self {
            global: max_total_tokens.map(TokenBudget::new),
            usage: RwLock::new(BTreeMap::new()),
        }
    }

    /// True once the cap (if any) has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.global.as_ref().is_some_and(TokenBudget::is_exhausted)
    }

    pub fn record_usage(&self, provider: &str, usage: &TokenUsage, model: &str) {
        if let Some(global) = &self.global {
            global.record(u64::from(usage.total()));
        }
        self.usage
            .write()
            .entry(provider.to_string())
            .or_default()
            .add(usage, model);
    }

    pub fn record_failure(&self, provider: &str) {
        self.usage
            .write()
            .entry(provider.to_string())
            .or_default()
            .failed_calls += 1;
    }

    pub fn usage_by_provider(&self) -> BTreeMap<String, LlmUsage> {
        self.usage.read().clone()
    }

    pub fn total_usage(&self) -> LlmUsage {
        let mut total = LlmUsage::default();
        for usage in self.usage.read().values() {
            total.merge(usage);
        }
        total
    }

    pub fn remaining_global(&self) -> Option<u64> {
        self.global.as_ref().map(TokenBudget::remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            estimated: false,
        }
    }

    #[test]
    fn test_budget_enforcement() {
        let budget = TokenBudget::new(100);
        assert!(budget.can_afford(100));
        assert!(!budget.can_afford(101));

        budget.record(60);
        assert_eq!(budget.remaining(), 40);
        assert!(!budget.is_exhausted());

        budget.record(50);
        assert_eq!(budget.remaining(), 0);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_tracker_per_provider_ledger() {
        let tracker = BudgetTracker::new(Some(500));
        tracker.record_usage("Cohere", &usage(30, 20), "command-r-plus");
        tracker.record_usage("Claude", &usage(10, 5), "claude-sonnet-4-5");
        tracker.record_failure("Claude");

        let ledger = tracker.usage_by_provider();
        assert_eq!(ledger["Cohere"].total_tokens, 50);
        assert_eq!(ledger["Claude"].llm_calls, 1);
        assert_eq!(ledger["Claude"].failed_calls, 1);
        assert_eq!(tracker.remaining_global(), Some(435));
        assert_eq!(tracker.total_usage().total_tokens, 65);
    }

    #[test]
    fn test_unlimited_is_never_exhausted() {
        let tracker = BudgetTracker::unlimited();
        tracker.record_usage("Cohere", &usage(u32::MAX / 2, u32::MAX / 2), "x");
        assert!(!tracker.is_exhausted());
        assert_eq!(tracker.remaining_global(), None);
    }

    #[test]
    fn test_cost_estimation() {
        let mut ledger = LlmUsage::default();
        ledger.add(&usage(1000, 500), "claude-sonnet-4-5");
        // 1000 * $3/MTok + 500 * $15/MTok = $0.0105
        assert!(ledger.estimated_cost > 0.01 && ledger.estimated_cost < 0.02);

        let mut scripted = LlmUsage::default();
        scripted.add(&TokenUsage { estimated: true, ..usage(1000, 500) }, "scripted");
        assert_eq!(scripted.estimated_cost, 0.0);
        assert_eq!(scripted.estimated_calls, 1);
    }
}
