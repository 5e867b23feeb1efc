//! The VanillaClaw run loop.
//!
//! A run follows a **Plan → Step → Reflect** cycle:
//!
//! 1. **Plan** the request with a cheap heuristic classifier
//! 2. **Step**: assemble the prompt, call the provider gateway, pull at most
//!    one text-encoded tool call out of the reply and execute it
//! 3. **Reflect**: validate the tool output, detect non-progress, prune the
//!    history, and decide whether to continue
//!
//! The loop ends when the model answers in plain text, or with a typed
//! failure: providers exhausted, tool retries exhausted, step budget spent,
//! non-progress detected, or cancellation.
//!
//! Tool calls are never native: the model writes a marker followed by a JSON
//! object (`[TOOL_CALL] {"name": ..., "arguments": {...}}`) and the
//! [`ToolCallExtractor`] recovers it, repairing truncated or sloppy JSON.

pub mod context;
pub mod executor;
pub mod extractor;
pub mod plan;
pub mod planner;
pub mod reflector;
pub mod result;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{AgentContext, ConversationState, ToolRecord};
pub use executor::Executor;
pub use extractor::{DEFAULT_MARKER, Extraction, ToolCallExtractor};
pub use plan::{Plan, PlanStep, StepStatus, StepStrategy};
pub use planner::{Classification, Classifier, HeuristicClassifier, Planner};
pub use reflector::{Reflection, Reflector, Verdict};
pub use result::{
    AgentResult, RunFailure, RunStatus, RunTrace, StepResult, ToolOutcome, TraceEntry, TraceKind,
};
