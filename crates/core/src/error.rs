//! Error types for the VanillaClaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each stage of a run has its own error type; the propagation policy is:
//!
//! - `ProviderError` is absorbed by the gateway's retry/fallback logic
//! - `ProviderExhausted` is fatal and surfaced to the caller
//! - `ParseError` never aborts a run (the turn proceeds as plain text)
//! - `ToolExecutionError` is reported back to the model, then escalates
//! - `StopCondition` ends the run with partial results

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{Pool, ProviderTier};

/// The top-level error type for all VanillaClaw operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    ProviderExhausted(#[from] ProviderExhausted),

    // --- Extraction errors ---
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error(transparent)]
    ToolExecution(#[from] ToolExecutionError),

    // --- Run control ---
    #[error("Run stopped: {0}")]
    Stop(#[from] StopCondition),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Provider ---

/// A single-provider failure. Recovered locally by the gateway strategy.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// One failed provider attempt recorded by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub provider_id: String,
    pub tier: ProviderTier,
    pub pool: Pool,
    pub cause: ProviderError,
    pub latency_ms: u64,
}

/// Both the primary and the fallback tier failed.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("All providers exhausted after {} attempt(s){}", .attempts.len(), summarize(.attempts))]
pub struct ProviderExhausted {
    pub attempts: Vec<FailedAttempt>,
}

fn summarize(attempts: &[FailedAttempt]) -> String {
    if attempts.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = attempts
        .iter()
        .map(|a| format!("{}: {}", a.provider_id, a.cause))
        .collect();
    format!(" [{}]", parts.join("; "))
}

// --- Extraction ---

/// A tool-call marker was found but no usable call could be recovered.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ParseError {
    #[error("marker present but no JSON object follows it")]
    MissingPayload,

    #[error("tool call JSON could not be repaired: {0}")]
    Unrepairable(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

// --- Tools ---

/// Errors raised by a tool handler.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// A tool handler failure as seen by the run loop.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Tool '{tool_name}' failed: {cause}")]
pub struct ToolExecutionError {
    pub tool_name: String,
    pub cause: String,
}

// --- Run control ---

/// Conditions that end a run early with partial results.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopCondition {
    #[error("no progress: '{tool_name}' called {repeats} times with identical arguments and result")]
    NonProgress { tool_name: String, repeats: usize },

    #[error("step budget of {max_steps} exhausted")]
    StepBudgetExhausted { max_steps: u32 },

    #[error("run cancelled at iteration {iteration}")]
    Cancelled { iteration: u32 },
}
