//! Provider-facing prompt assembly.
//!
//! Text-only providers see one leading system message (host prompt, tool
//! catalogue, call protocol and plan), followed by the history. Tool calls
//! are written back into assistant turns in protocol form and tool results
//! become user turns, since such providers have no tool role.

use std::collections::HashMap;
use vanillaclaw_core::{Message, Role, ToolDefinition};

use crate::plan::Plan;

/// Build the message list for one provider call.
pub fn assemble(
    history: &[Message],
    tools: &[ToolDefinition],
    plan: Option<&Plan>,
    marker: &str,
) -> Vec<Message> {
    let mut sections: Vec<String> = history
        .iter()
        .filter(|m| m.is_system())
        .map(|m| m.content.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if !tools.is_empty() {
        sections.push(render_tools(tools));
        sections.push(render_protocol(marker));
    }
    if let Some(plan) = plan {
        sections.push(plan.render().trim_end().to_string());
    }

    let mut messages = Vec::with_capacity(history.len() + 1);
    if !sections.is_empty() {
        messages.push(Message::system(sections.join("\n\n")));
    }

    let mut call_names: HashMap<&str, &str> = HashMap::new();
    for msg in history {
        match msg.role {
            Role::System => {}
            Role::User => messages.push(msg.clone()),
            Role::Assistant => {
                for call in &msg.tool_calls {
                    call_names.insert(call.id.as_str(), call.name.as_str());
                }
                messages.push(render_assistant(msg, marker));
            }
            Role::Tool => {
                let name = msg
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| call_names.get(id).copied())
                    .unwrap_or("tool");
                messages.push(Message::user(format!(
                    "Tool result ({name}): {}",
                    msg.content
                )));
            }
        }
    }
    messages
}

fn render_tools(tools: &[ToolDefinition]) -> String {
    let mut out = String::from("## Available Tools\n");
    for tool in tools {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        out.push_str(&format!("  parameters: {}\n", tool.parameters));
    }
    out.trim_end().to_string()
}

fn render_protocol(marker: &str) -> String {
    format!(
        "## Calling a Tool\n\
         To use a tool, write the marker {marker} followed by exactly one JSON object:\n\
         {marker} {{\"name\": \"<tool name>\", \"arguments\": {{...}}}}\n\
         Emit at most one tool call per reply, then stop and wait for the tool result.\n\
         When no tool is needed, reply with the final answer only."
    )
}

fn render_assistant(msg: &Message, marker: &str) -> Message {
    let Some(call) = msg.tool_calls.first() else {
        return msg.clone();
    };
    let payload = format!(
        "{marker} {{\"name\": {}, \"arguments\": {}}}",
        serde_json::Value::String(call.name.clone()),
        call.arguments
    );
    let content = if msg.content.is_empty() {
        payload
    } else {
        format!("{}\n{payload}", msg.content)
    };
    Message::assistant(content)
}
