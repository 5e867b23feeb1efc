//! Configuration loading, validation, and management for VanillaClaw.
//!
//! Loads configuration from `~/.vanillaclaw/config.toml` with environment
//! variable overrides, validates it, and turns it into the [`AgentOptions`]
//! a run is driven by.

mod options;

pub use options::{AgentOptions, PruningOptions};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vanillaclaw_core::StrategyMode;

/// The root configuration structure.
///
/// Maps directly to `~/.vanillaclaw/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Step loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Provider gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// History pruning thresholds
    #[serde(default)]
    pub pruning: PruningConfig,

    /// Tool-call extraction settings
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Metrics and cost estimation
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard ceiling on loop iterations per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Step count the planner falls back to when classification is ambiguous
    #[serde(default = "default_step_budget")]
    pub default_step_budget: u32,

    /// Failures allowed per (tool, arguments) pair before the run fails
    #[serde(default = "default_tool_retry_budget")]
    pub tool_retry_budget: u32,

    /// Identical consecutive tool calls that count as a loop
    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,

    /// Host instructions placed ahead of the tool protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_steps() -> u32 {
    10
}
fn default_step_budget() -> u32 {
    3
}
fn default_tool_retry_budget() -> u32 {
    2
}
fn default_loop_threshold() -> usize {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            default_step_budget: default_step_budget(),
            tool_retry_budget: default_tool_retry_budget(),
            loop_threshold: default_loop_threshold(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub strategy: StrategyMode,

    /// Whether paid tiers may be raced under the smart strategy
    #[serde(default = "default_true")]
    pub racing_enabled: bool,

    /// Per-provider-call timeout
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_call_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyMode::default(),
            racing_enabled: true,
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    /// Prune once history holds more messages than this
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,

    /// Prune once the estimated history size exceeds this many tokens
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,

    /// Most recent non-system turns that survive a prune
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
}

fn default_max_history_messages() -> usize {
    40
}
fn default_max_history_tokens() -> usize {
    8000
}
fn default_keep_recent_turns() -> usize {
    12
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            max_history_messages: default_max_history_messages(),
            max_history_tokens: default_max_history_tokens(),
            keep_recent_turns: default_keep_recent_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Literal token that introduces a tool call in model text
    #[serde(default = "default_marker")]
    pub marker: String,
}

fn default_marker() -> String {
    "[TOOL_CALL]".into()
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
        }
    }
}

/// Metrics and free-tier savings estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Paid model whose price is used to value free-tier tokens
    #[serde(default = "default_reference_model")]
    pub reference_model: String,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_reference_model() -> String {
    "openai/gpt-4o-mini".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            reference_model: default_reference_model(),
            custom_pricing: HashMap::new(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.vanillaclaw/config.toml).
    ///
    /// Then applies environment overrides:
    /// - `VANILLACLAW_MAX_STEPS`
    /// - `VANILLACLAW_STRATEGY` (`sequential`, `racing`, `smart`)
    /// - `VANILLACLAW_CALL_TIMEOUT_SECS`
    /// - `VANILLACLAW_RACING` (`true` / `false`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment-like lookup.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("VANILLACLAW_MAX_STEPS") {
            self.agent.max_steps = parse_env("VANILLACLAW_MAX_STEPS", &raw)?;
        }
        if let Some(raw) = lookup("VANILLACLAW_STRATEGY") {
            self.gateway.strategy = raw
                .parse()
                .map_err(|reason| ConfigError::InvalidEnv {
                    key: "VANILLACLAW_STRATEGY".into(),
                    reason,
                })?;
        }
        if let Some(raw) = lookup("VANILLACLAW_CALL_TIMEOUT_SECS") {
            self.gateway.call_timeout_secs = parse_env("VANILLACLAW_CALL_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("VANILLACLAW_RACING") {
            self.gateway.racing_enabled = parse_env("VANILLACLAW_RACING", &raw)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".vanillaclaw")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }
        if self.agent.default_step_budget == 0 {
            return Err(ConfigError::ValidationError(
                "agent.default_step_budget must be at least 1".into(),
            ));
        }
        if self.agent.loop_threshold < 2 {
            return Err(ConfigError::ValidationError(
                "agent.loop_threshold must be at least 2".into(),
            ));
        }
        if self.gateway.call_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.call_timeout_secs must be > 0".into(),
            ));
        }
        if self.pruning.keep_recent_turns == 0 {
            return Err(ConfigError::ValidationError(
                "pruning.keep_recent_turns must be at least 1".into(),
            ));
        }
        if self.extractor.marker.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "extractor.marker must not be blank".into(),
            ));
        }
        Ok(())
    }

    /// Build the run-level options for the executor.
    pub fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            max_steps: self.agent.max_steps,
            default_step_budget: self.agent.default_step_budget,
            tool_retry_budget: self.agent.tool_retry_budget,
            loop_threshold: self.agent.loop_threshold,
            system_prompt: self.agent.system_prompt.clone(),
            strategy: self.gateway.strategy,
            racing_enabled: self.gateway.racing_enabled,
            call_timeout: Duration::from_secs(self.gateway.call_timeout_secs),
            pruning: PruningOptions {
                max_messages: self.pruning.max_history_messages,
                max_tokens: self.pruning.max_history_tokens,
                keep_recent_turns: self.pruning.keep_recent_turns,
            },
            marker: self.extractor.marker.clone(),
            reference_model: self.telemetry.reference_model.clone(),
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            gateway: GatewayConfig::default(),
            pruning: PruningConfig::default(),
            extractor: ExtractorConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidEnv { key: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
