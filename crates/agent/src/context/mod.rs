//! Run context: what the host hands in, and what the run accumulates.

pub mod prompt;
pub mod state;
pub mod token;

pub use state::{ConversationState, ToolRecord};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vanillaclaw_config::AgentOptions;
use vanillaclaw_core::{Message, Role, ToolRegistry};
use vanillaclaw_providers::ProviderGroup;

/// Inputs and state of one run.
pub struct AgentContext {
    pub tools: Arc<ToolRegistry>,
    pub providers: ProviderGroup,
    pub options: AgentOptions,
    pub state: ConversationState,
    /// Checked at step boundaries only.
    pub cancellation: CancellationToken,
}

impl AgentContext {
    /// Start a run from the host's initial messages. A configured system
    /// prompt is prepended unless the messages already carry one.
    pub fn new(
        mut messages: Vec<Message>,
        tools: Arc<ToolRegistry>,
        providers: ProviderGroup,
        options: AgentOptions,
    ) -> Self {
        if let Some(prompt) = &options.system_prompt
            && !messages.iter().any(Message::is_system)
        {
            messages.insert(0, Message::system(prompt));
        }

        Self {
            tools,
            providers,
            options,
            state: ConversationState::new(messages),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn messages(&self) -> &[Message] {
        self.state.messages()
    }

    /// The latest user message, which is what gets planned.
    pub fn request_text(&self) -> Option<&str> {
        self.messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("tools", &self.tools.names())
            .field("providers", &self.providers)
            .field("iteration", &self.state.iteration())
            .field("messages", &self.state.messages().len())
            .finish()
    }
}
