//! Reference pricing for paid models.
//!
//! Prices are in USD per 1 million tokens. Free-tier calls cost nothing, so
//! the table is only used to value the tokens a free provider served as if a
//! paid reference model had produced them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Model name → pricing, with built-in defaults and custom overrides.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();

        // ── OpenAI ─────────────────────────────────────────────────
        table.set("openai/gpt-4o", ModelPricing::new(2.5, 10.0));
        table.set("openai/gpt-4o-mini", ModelPricing::new(0.15, 0.6));
        table.set("openai/o3-mini", ModelPricing::new(1.1, 4.4));

        // ── Anthropic ──────────────────────────────────────────────
        table.set("anthropic/claude-sonnet-4", ModelPricing::new(3.0, 15.0));
        table.set("anthropic/claude-3.5-haiku", ModelPricing::new(0.8, 4.0));

        // ── Google ─────────────────────────────────────────────────
        table.set("google/gemini-2.0-flash", ModelPricing::new(0.1, 0.4));
        table.set("google/gemini-1.5-pro", ModelPricing::new(1.25, 5.0));

        // ── Open weights (hosted) ──────────────────────────────────
        table.set("meta-llama/llama-3.1-70b", ModelPricing::new(0.52, 0.75));
        table.set("meta-llama/llama-3.1-8b", ModelPricing::new(0.055, 0.055));
        table.set("mistral/mistral-small", ModelPricing::new(0.2, 0.6));
        table.set("deepseek/deepseek-v3", ModelPricing::new(0.27, 1.1));

        table
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Add or update pricing for a model.
    pub fn set(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.insert(model.into(), pricing);
    }

    /// Look up pricing for a model.
    ///
    /// Tries an exact match first, then the longest known model whose bare
    /// name (without `vendor/`) prefixes the bare requested name, so
    /// `gpt-4o-mini-2024-07-18` resolves to `openai/gpt-4o-mini`.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        if let Some(p) = self.prices.get(model) {
            return Some(*p);
        }

        let wanted = bare_name(model).to_lowercase();
        self.prices
            .iter()
            .filter(|(key, _)| wanted.starts_with(&bare_name(key).to_lowercase()))
            .max_by_key(|(key, _)| bare_name(key).len())
            .map(|(_, p)| *p)
    }

    /// Compute cost for a model call, returning 0.0 if the model is unknown.
    pub fn compute_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.get(model)
            .map(|p| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn bare_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}
