//! Token estimation.
//!
//! Uses a character-based heuristic: ~4 characters per token. Providers that
//! report usage are trusted over this; the estimate is only a fallback and
//! the unit the pruning budget is measured in.

use vanillaclaw_core::{Message, ToolDefinition, Usage};

/// Per-message overhead for role name and delimiters.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a tool definition (serialized as JSON).
pub fn estimate_tool_tokens(tool: &ToolDefinition) -> usize {
    let json = serde_json::to_string(tool).unwrap_or_default();
    estimate_tokens(&json)
}

/// Usage for a provider call that reported none.
pub fn estimate_usage(prompt: &[Message], completion: &str) -> Usage {
    let prompt_tokens = estimate_messages_tokens(prompt);
    let completion_tokens = estimate_tokens(completion);
    Usage::new(
        u32::try_from(prompt_tokens).unwrap_or(u32::MAX),
        u32::try_from(completion_tokens).unwrap_or(u32::MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("test"); // 1 token + 4 overhead
        assert_eq!(estimate_message_tokens(&msg), 5);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }

    #[test]
    fn tool_definition_tokens() {
        let tool = ToolDefinition {
            name: "multiply".into(),
            description: "Multiply two numbers".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        assert!(estimate_tool_tokens(&tool) > 0);
    }

    #[test]
    fn usage_estimate_sums_both_sides() {
        let usage = estimate_usage(&[Message::user("test")], "hello");
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 7);
    }
}
