//! Per-run metrics.
//!
//! A `RunMetrics` value is created at the start of a run, threaded through
//! the run's context by value, and handed back in the result. Nothing here
//! is shared between runs.

use serde::{Deserialize, Serialize};
use vanillaclaw_core::{ProviderTier, Usage};

use crate::pricing::PricingTable;

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Successful provider calls (one per step).
    pub provider_calls: u64,
    /// Individual provider attempts that failed or timed out.
    pub provider_failures: u64,
    /// Healthy racers dropped because another provider answered first.
    pub abandoned_racers: u64,
    pub free_tier_calls: u64,
    pub paid_tier_calls: u64,

    pub tool_executions: u64,
    pub tool_failures: u64,
    /// Marker present but no usable call recovered.
    pub parse_failures: u64,
    /// Tool results that did not match the tool's declared output schema.
    pub validation_failures: u64,

    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Tokens served by free-tier providers.
    pub free_tier_tokens: u64,
    /// What the free-tier tokens would have cost on the reference model.
    pub estimated_savings_usd: f64,

    pub prunes: u64,
    pub messages_pruned: u64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful provider call and value it if it was free.
    pub fn record_provider_call(
        &mut self,
        tier: ProviderTier,
        usage: Usage,
        pricing: &PricingTable,
        reference_model: &str,
    ) {
        self.provider_calls += 1;
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);

        match tier {
            ProviderTier::Free => {
                self.free_tier_calls += 1;
                self.free_tier_tokens += u64::from(usage.total_tokens);
                self.estimated_savings_usd += pricing.compute_cost(
                    reference_model,
                    u64::from(usage.prompt_tokens),
                    u64::from(usage.completion_tokens),
                );
            }
            ProviderTier::Paid => self.paid_tier_calls += 1,
        }
    }

    pub fn record_provider_failures(&mut self, count: usize) {
        self.provider_failures += count as u64;
    }

    pub fn record_abandoned_racers(&mut self, count: usize) {
        self.abandoned_racers += count as u64;
    }

    pub fn record_tool_execution(&mut self, success: bool) {
        self.tool_executions += 1;
        if !success {
            self.tool_failures += 1;
        }
    }

    pub fn record_parse_failure(&mut self) {
        self.parse_failures += 1;
    }

    pub fn record_validation_failure(&mut self) {
        self.validation_failures += 1;
    }

    pub fn record_prune(&mut self, dropped: usize) {
        self.prunes += 1;
        self.messages_pruned += dropped as u64;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}
