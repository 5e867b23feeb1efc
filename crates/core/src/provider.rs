//! Provider trait: the abstraction over text-completion backends.
//!
//! A Provider knows how to send a conversation to a model and get raw text
//! back. It exposes nothing vendor-specific: the gateway only sees its
//! identity, its tier, and its capability flags.
//!
//! Implementations (HTTP adapters, auth, payload shaping) live in the host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Billing classification of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    /// Free or quota-limited; calls are spent sparingly.
    Free,
    /// Metered per token.
    Paid,
}

impl std::fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Paid => write!(f, "paid"),
        }
    }
}

/// Which pool of a group a provider was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Primary,
    Fallback,
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// How the gateway walks a tier of providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    /// One provider at a time, in list order.
    Sequential,
    /// Every provider of the primary tier at once; first success wins.
    Racing,
    /// Sequential for free tiers, racing for paid tiers when enabled.
    #[default]
    Smart,
}

impl std::str::FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "racing" | "race" => Ok(Self::Racing),
            "smart" => Ok(Self::Smart),
            other => Err(format!("unknown strategy mode '{other}'")),
        }
    }
}

/// What a provider can do beyond plain text completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Accepts a native function-calling schema (unused by the VANILLA protocol).
    pub native_tools: bool,
    /// Can stream partial output.
    pub streaming: bool,
    /// Reports token usage with each response.
    pub reports_usage: bool,
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A chat request handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The provider-facing conversation
    pub messages: Vec<Message>,

    /// Tool schemas, for adapters that can use them natively
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_schemas: Vec<ToolDefinition>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tool_schemas: Vec::new(),
        }
    }

    pub fn with_tool_schemas(mut self, schemas: Vec<ToolDefinition>) -> Self {
        self.tool_schemas = schemas;
        self
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Raw completion returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated text, unparsed
    pub content: String,

    /// Token usage statistics, if the provider reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// The core Provider trait.
///
/// Every backend implements this trait. The gateway calls `chat()` without
/// knowing which vendor is behind it. Implementations must be free of
/// externally visible side effects beyond billing/quota, because racing
/// abandons in-flight calls without rollback.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used in attempt logs and metrics.
    fn id(&self) -> &str;

    /// Billing tier, drives strategy selection.
    fn tier(&self) -> ProviderTier;

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    /// Send the conversation and get raw text back.
    async fn chat(&self, request: ChatRequest) -> std::result::Result<ChatResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_mode_parses_case_insensitively() {
        assert_eq!("Sequential".parse::<StrategyMode>(), Ok(StrategyMode::Sequential));
        assert_eq!("race".parse::<StrategyMode>(), Ok(StrategyMode::Racing));
        assert_eq!(" smart ".parse::<StrategyMode>(), Ok(StrategyMode::Smart));
        assert!("fastest".parse::<StrategyMode>().is_err());
    }

    #[test]
    fn usage_totals() {
        let usage = Usage::new(100, 20);
        assert_eq!(usage.total_tokens, 120);
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "multiply".into(),
            description: "Multiply two numbers".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("multiply"));
        assert!(json.contains("required"));
    }

    #[test]
    fn tier_serializes_lowercase() {
        let json = serde_json::to_string(&ProviderTier::Free).unwrap();
        assert_eq!(json, "\"free\"");
    }
}
