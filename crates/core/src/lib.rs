//! # VanillaClaw Core
//!
//! Domain types, traits, and error definitions for the VanillaClaw
//! orchestrator. It depends on no other workspace crate; it defines the
//! domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Providers and tools are traits here; concrete vendor adapters and tool
//! business logic belong to the host application. This enables:
//! - Swapping providers without touching the orchestration core
//! - Easy testing with scripted mock providers and tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{
    Error, FailedAttempt, ParseError, ProviderError, ProviderExhausted, Result, StopCondition,
    ToolError, ToolExecutionError,
};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    ChatRequest, ChatResponse, Pool, Provider, ProviderCapabilities, ProviderTier, StrategyMode,
    ToolDefinition, Usage,
};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
