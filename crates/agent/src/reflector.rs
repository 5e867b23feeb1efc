//! Post-step reflection.
//!
//! After every step the reflector checks the result's shape, looks for a
//! model stuck repeating the same call, prunes the history when it has
//! grown past its limits, and decides whether the run goes on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use vanillaclaw_config::{AgentOptions, PruningOptions};
use vanillaclaw_core::{StopCondition, ToolResult};

use crate::context::{AgentContext, ToolRecord};
use crate::plan::Plan;
use crate::result::{StepResult, ToolOutcome};

/// What the run should do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Continue,
    /// The step produced a final answer.
    Stop,
    Fail(StopCondition),
}

/// A verdict plus whatever the reflector noticed on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflection {
    pub verdict: Verdict,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Reflector {
    loop_threshold: usize,
    max_steps: u32,
    pruning: PruningOptions,
}

impl Reflector {
    pub fn new(loop_threshold: usize, max_steps: u32, pruning: PruningOptions) -> Self {
        Self {
            loop_threshold,
            max_steps,
            pruning,
        }
    }

    pub fn from_options(options: &AgentOptions) -> Self {
        Self::new(
            options.loop_threshold,
            options.max_steps,
            options.pruning.clone(),
        )
    }

    /// Judge a finished step. `plan` is the run's plan with the step's plan
    /// entry still current.
    pub fn reflect(&self, step: &StepResult, plan: &Plan, ctx: &mut AgentContext) -> Reflection {
        let mut notes = Vec::new();

        if let Some(error) = &step.parse_error {
            ctx.state.metrics.record_parse_failure();
            notes.push(format!("tool call not recovered, turn kept as text: {error}"));
        }

        if let (Some(call), Some(ToolOutcome::Success(result))) = (&step.tool_call, &step.tool_outcome)
            && let Some(schema) = ctx.tools.get(&call.name).and_then(|t| t.output_schema())
            && let Err(reason) = check_shape(&schema, result)
        {
            warn!(tool = %call.name, reason = %reason, "Reflector: tool result shape mismatch");
            ctx.state.metrics.record_validation_failure();
            notes.push(format!("'{}' result does not match its schema: {reason}", call.name));
        }

        if step.tool_call.is_some()
            && let Some(condition) = self.detect_non_progress(ctx.state.tool_history())
        {
            warn!(condition = %condition, "Reflector: no progress");
            notes.push(condition.to_string());
            return Reflection {
                verdict: Verdict::Fail(condition),
                notes,
            };
        }

        self.prune(ctx, &mut notes);

        let verdict = if step.tool_call.is_none() {
            self.text_verdict(step, plan, ctx.state.iteration(), &mut notes)
        } else if ctx.state.iteration() >= self.max_steps {
            Verdict::Fail(StopCondition::StepBudgetExhausted {
                max_steps: self.max_steps,
            })
        } else {
            Verdict::Continue
        };

        Reflection { verdict, notes }
    }

    /// A reply without a tool call is the answer, unless it only failed to
    /// carry one and later plan steps remain; then it stands as this step's
    /// plain-text result.
    fn text_verdict(
        &self,
        step: &StepResult,
        plan: &Plan,
        iteration: u32,
        notes: &mut Vec<String>,
    ) -> Verdict {
        if step.parse_error.is_none() {
            return Verdict::Stop;
        }

        let later_steps = plan.steps.len() > plan.current_step + 1;
        if later_steps && iteration < self.max_steps {
            notes.push("reply kept as plain text; moving on to the next plan step".into());
            Verdict::Continue
        } else {
            notes.push("run ended on a reply whose tool call could not be recovered".into());
            Verdict::Stop
        }
    }

    /// The last `loop_threshold` calls share name, arguments and result,
    /// and were made on consecutive steps.
    fn detect_non_progress(&self, history: &[ToolRecord]) -> Option<StopCondition> {
        let n = self.loop_threshold.max(2);
        if history.len() < n {
            return None;
        }

        let recent = &history[history.len() - n..];
        let first = &recent[0];
        let repeated = recent.iter().all(|r| {
            r.tool_name == first.tool_name
                && r.arguments == first.arguments
                && r.output == first.output
                && r.success == first.success
        });
        let consecutive = recent
            .windows(2)
            .all(|w| w[1].iteration == w[0].iteration + 1);

        (repeated && consecutive).then(|| StopCondition::NonProgress {
            tool_name: first.tool_name.clone(),
            repeats: n,
        })
    }

    fn prune(&self, ctx: &mut AgentContext, notes: &mut Vec<String>) {
        let messages = ctx.state.messages().len();
        let tokens = ctx.state.estimated_tokens();
        if messages <= self.pruning.max_messages && tokens <= self.pruning.max_tokens {
            return;
        }

        let dropped = ctx.state.prune(self.pruning.keep_recent_turns);
        if dropped > 0 {
            ctx.state.metrics.record_prune(dropped);
            info!(
                dropped,
                messages,
                tokens,
                kept = ctx.state.messages().len(),
                "Reflector: pruned history"
            );
            notes.push(format!("pruned {dropped} old message(s)"));
        }
    }
}

/// Check a result against a schema's `type` and `required` keys. The
/// structured `data` is checked when present, otherwise the output text
/// must itself be JSON.
fn check_shape(schema: &Value, result: &ToolResult) -> Result<(), String> {
    let value = match &result.data {
        Some(data) => data.clone(),
        None => serde_json::from_str(&result.output).map_err(|_| "output is not JSON".to_string())?,
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, &value)) {
            return Err(format!("expected type {}", allowed.join(" | ")));
        }
    }

    if let (Some(required), Some(object)) = (
        schema.get("required").and_then(Value::as_array),
        value.as_object(),
    ) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required field '{key}'"));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}
