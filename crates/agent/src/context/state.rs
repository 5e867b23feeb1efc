//! Per-run conversation state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vanillaclaw_core::{Message, Role};
use vanillaclaw_telemetry::RunMetrics;

use super::token;

/// One tool execution as remembered by the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Iteration the call was made in
    pub iteration: u32,
    pub tool_name: String,
    /// Canonical (key-sorted) JSON arguments
    pub arguments: String,
    pub output: String,
    pub success: bool,
}

/// Everything a run accumulates. Owned by exactly one run.
///
/// Messages are append-only; only the reflector may shrink the history,
/// through [`prune`](Self::prune).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    iteration: u32,
    pub metrics: RunMetrics,
    tool_history: Vec<ToolRecord>,
    #[serde(skip)]
    failures: HashMap<(String, String), u32>,
}

impl ConversationState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Count a finished step. Returns the new iteration count.
    pub fn advance(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    pub fn tool_history(&self) -> &[ToolRecord] {
        &self.tool_history
    }

    pub fn record_tool(&mut self, record: ToolRecord) {
        self.tool_history.push(record);
    }

    /// Count a failure of `tool_name` with `arguments`. Returns the total so far.
    pub fn record_tool_failure(&mut self, tool_name: &str, arguments: &str) -> u32 {
        let count = self
            .failures
            .entry((tool_name.to_string(), arguments.to_string()))
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn estimated_tokens(&self) -> usize {
        token::estimate_messages_tokens(&self.messages)
    }

    /// Turn index of every message, `None` for system messages.
    ///
    /// A turn is a user message, or an assistant message together with the
    /// tool results that follow it.
    fn turns(&self) -> Vec<Option<usize>> {
        let mut count = 0;
        self.messages
            .iter()
            .map(|m| match m.role {
                Role::System => None,
                Role::Tool if count > 0 => Some(count - 1),
                _ => {
                    count += 1;
                    Some(count - 1)
                }
            })
            .collect()
    }

    /// Number of turns in the history.
    pub fn turn_count(&self) -> usize {
        self.turns().into_iter().flatten().max().map_or(0, |last| last + 1)
    }

    /// Drop the oldest turns, keeping the `keep_recent` most recent ones.
    /// System messages and the latest user request always survive, and a
    /// tool call is never separated from its results. Returns how many
    /// messages were dropped.
    pub(crate) fn prune(&mut self, keep_recent: usize) -> usize {
        let first_kept = self.turn_count().saturating_sub(keep_recent);
        if first_kept == 0 {
            return 0;
        }

        let turns = self.turns();
        let request = self.messages.iter().rposition(|m| m.role == Role::User);
        let before = self.messages.len();

        let mut index = 0;
        self.messages.retain(|_| {
            let keep = match turns[index] {
                None => true,
                Some(turn) => turn >= first_kept || Some(index) == request,
            };
            index += 1;
            keep
        });
        before - self.messages.len()
    }

    pub fn into_parts(self) -> (Vec<Message>, RunMetrics) {
        (self.messages, self.metrics)
    }
}
