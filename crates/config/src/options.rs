//! Run-level options handed to the executor.

use std::time::Duration;
use vanillaclaw_core::StrategyMode;

use crate::AppConfig;

/// History pruning thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruningOptions {
    pub max_messages: usize,
    pub max_tokens: usize,
    pub keep_recent_turns: usize,
}

/// Everything a single run is configured by.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Iteration ceiling; the run stops once the count reaches it.
    pub max_steps: u32,
    pub default_step_budget: u32,
    /// Failures tolerated per (tool, arguments) pair.
    pub tool_retry_budget: u32,
    pub loop_threshold: usize,
    pub system_prompt: Option<String>,
    pub strategy: StrategyMode,
    pub racing_enabled: bool,
    pub call_timeout: Duration,
    pub pruning: PruningOptions,
    pub marker: String,
    /// Paid model used to price free-tier tokens.
    pub reference_model: String,
}

impl Default for AgentOptions {
    fn default() -> Self {
        AppConfig::default().agent_options()
    }
}

impl AgentOptions {
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyMode) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_racing(mut self, enabled: bool) -> Self {
        self.racing_enabled = enabled;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_tool_retry_budget(mut self, budget: u32) -> Self {
        self.tool_retry_budget = budget;
        self
    }

    pub fn with_pruning(mut self, pruning: PruningOptions) -> Self {
        self.pruning = pruning;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}
