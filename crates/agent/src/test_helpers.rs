//! Shared test helpers: scripted providers and arithmetic tools.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use vanillaclaw_config::AgentOptions;
use vanillaclaw_core::{
    ChatRequest, ChatResponse, Message, Provider, ProviderError, ProviderTier, Tool, ToolError,
    ToolRegistry, ToolResult, Usage,
};
use vanillaclaw_providers::ProviderGroup;

use crate::context::AgentContext;

/// A provider that replays scripted replies in order.
///
/// Once the script runs out it keeps returning the last reply when built
/// with [`repeating`](Self::repeating), and fails otherwise.
pub struct ScriptedProvider {
    id: String,
    tier: ProviderTier,
    script: Mutex<VecDeque<String>>,
    repeat_last: bool,
    last: Mutex<Option<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Self::build(replies, false)
    }

    pub fn repeating(reply: &str) -> Arc<Self> {
        Self::build(&[reply], true)
    }

    fn build(replies: &[&str], repeat_last: bool) -> Arc<Self> {
        Arc::new(Self {
            id: "scripted".into(),
            tier: ProviderTier::Free,
            script: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            repeat_last,
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn tier(&self) -> ProviderTier {
        self.tier
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                reply
            }
            None if self.repeat_last => self.last.lock().unwrap().clone().unwrap_or_default(),
            None => return Err(ProviderError::MalformedResponse("script exhausted".into())),
        };
        Ok(ChatResponse::text(reply).with_usage(Usage::new(10, 5)))
    }
}

/// A provider that always fails.
pub struct DownProvider(pub &'static str);

#[async_trait]
impl Provider for DownProvider {
    fn id(&self) -> &str {
        self.0
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Paid
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

fn operands(arguments: &Value) -> Result<(f64, f64), ToolError> {
    let a = arguments["a"]
        .as_f64()
        .ok_or_else(|| ToolError::InvalidArguments("missing number 'a'".into()))?;
    let b = arguments["b"]
        .as_f64()
        .ok_or_else(|| ToolError::InvalidArguments("missing number 'b'".into()))?;
    Ok((a, b))
}

fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        x.to_string()
    }
}

fn operand_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": { "type": "number" },
            "b": { "type": "number" }
        },
        "required": ["a", "b"]
    })
}

pub struct MultiplyTool {
    pub with_output_schema: bool,
}

#[async_trait]
impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn description(&self) -> &str {
        "Multiply a by b"
    }

    fn parameters_schema(&self) -> Value {
        operand_schema()
    }

    fn output_schema(&self) -> Option<Value> {
        self.with_output_schema
            .then(|| json!({"type": "object", "required": ["product"]}))
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let (a, b) = operands(&arguments)?;
        Ok(ToolResult::ok(format_number(a * b)))
    }
}

pub struct DivideTool;

#[async_trait]
impl Tool for DivideTool {
    fn name(&self) -> &str {
        "divide"
    }

    fn description(&self) -> &str {
        "Divide a by b"
    }

    fn parameters_schema(&self) -> Value {
        operand_schema()
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let (a, b) = operands(&arguments)?;
        if b == 0.0 {
            return Err(ToolError::ExecutionFailed {
                tool_name: "divide".into(),
                reason: "division by zero".into(),
            });
        }
        Ok(ToolResult::ok(format_number(a / b)))
    }
}

pub fn math_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(MultiplyTool {
        with_output_schema: false,
    }));
    registry.register(Box::new(DivideTool));
    registry
}

pub fn math_tools_with_schema() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(MultiplyTool {
        with_output_schema: true,
    }));
    registry.register(Box::new(DivideTool));
    registry
}

/// A context over the arithmetic tools with no providers.
pub fn context_with(messages: Vec<Message>, options: AgentOptions) -> AgentContext {
    AgentContext::new(
        messages,
        Arc::new(math_tools()),
        ProviderGroup::new(),
        options,
    )
}

/// A context over the arithmetic tools served by one provider.
pub fn context_for(
    request: &str,
    provider: Arc<dyn Provider>,
    options: AgentOptions,
) -> AgentContext {
    AgentContext::new(
        vec![Message::user(request)],
        Arc::new(math_tools()),
        ProviderGroup::new().primary(provider),
        options,
    )
}
