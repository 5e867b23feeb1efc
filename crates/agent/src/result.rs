//! What a run hands back to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vanillaclaw_core::{
    Message, ParseError, ProviderExhausted, StopCondition, ToolCall, ToolExecutionError,
    ToolResult,
};
use vanillaclaw_providers::ProviderAttempt;
use vanillaclaw_telemetry::RunMetrics;

use crate::plan::Plan;

/// How a tool invocation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(ToolResult),
    Failure(ToolExecutionError),
}

/// One executed step, as seen by the reflector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub iteration: u32,
    pub provider_id: String,
    pub raw_text: String,
    pub cleaned_content: String,
    pub tool_call: Option<ToolCall>,
    pub tool_outcome: Option<ToolOutcome>,
    pub parse_error: Option<ParseError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
}

/// Why a run ended in [`RunStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunFailure {
    #[error(transparent)]
    ProviderExhausted(ProviderExhausted),

    #[error("tool retry budget exceeded: {0}")]
    ToolRetryExhausted(ToolExecutionError),

    #[error("run stopped: {0}")]
    Stopped(StopCondition),
}

/// The kind of trace entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TraceKind {
    Thought,
    Action,
    Observation,
    Reflection,
}

/// A single entry in the run's reasoning log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub kind: TraceKind,
    pub iteration: u32,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Debug view of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    pub plan: Plan,
    /// Steps executed (equals the final iteration count)
    pub steps: u32,
    /// Reflector passes
    pub reflections: u32,
    /// Every provider attempt across all steps
    pub provider_calls: Vec<ProviderAttempt>,
    pub entries: Vec<TraceEntry>,
}

impl RunTrace {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            steps: 0,
            reflections: 0,
            provider_calls: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, kind: TraceKind, iteration: u32, content: impl Into<String>) {
        self.entries.push(TraceEntry {
            kind,
            iteration,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    /// Entries of one kind, in order.
    pub fn of_kind(&self, kind: TraceKind) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }
}

/// The outcome of [`Executor::run`](crate::Executor::run).
///
/// Every terminal path returns one of these, with the history and metrics
/// accumulated up to that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub messages: Vec<Message>,
    /// The final answer, on success
    pub answer: Option<String>,
    pub status: RunStatus,
    pub failure: Option<RunFailure>,
    pub trace: RunTrace,
    pub metrics: RunMetrics,
}

impl AgentResult {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }

    /// The stop condition, if the run ended on one.
    pub fn stop_condition(&self) -> Option<&StopCondition> {
        match &self.failure {
            Some(RunFailure::Stopped(condition)) => Some(condition),
            _ => None,
        }
    }
}
