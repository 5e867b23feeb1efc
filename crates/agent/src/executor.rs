//! The step loop.
//!
//! A run is `plan → (step → reflect)* → done | failed`. Each step:
//!
//! 1. checks for cancellation (only ever at a step boundary)
//! 2. assembles the provider-facing prompt
//! 3. calls the gateway; exhaustion is fatal
//! 4. extracts at most one tool call from the reply
//! 5. runs the tool and appends the assistant turn and the tool result
//! 6. advances the iteration count
//! 7. asks the reflector whether to continue, stop or fail
//!
//! A failing tool is reported back to the model as a tool-error message and
//! the same plan step is re-entered. Failures are counted per tool and
//! arguments; past the retry budget the run fails.

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vanillaclaw_config::AppConfig;
use vanillaclaw_core::{
    ChatRequest, Message, MessageToolCall, StopCondition, ToolCall, ToolExecutionError,
    ToolRegistry,
};
use vanillaclaw_providers::{AttemptOutcome, ChatResult, ProviderAttempt, ProviderGateway};
use vanillaclaw_telemetry::{ModelPricing, PricingTable};

use crate::context::{AgentContext, ToolRecord, prompt, token};
use crate::extractor::ToolCallExtractor;
use crate::planner::Planner;
use crate::reflector::{Reflector, Verdict};
use crate::result::{
    AgentResult, RunFailure, RunStatus, RunTrace, StepResult, ToolOutcome, TraceKind,
};

/// Drives runs. Holds nothing run-specific, so one executor can serve
/// any number of concurrent runs.
pub struct Executor {
    planner: Planner,
    pricing: PricingTable,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            planner: Planner::default(),
            pricing: PricingTable::with_defaults(),
        }
    }

    /// An executor whose pricing table carries the configured overrides.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut pricing = PricingTable::with_defaults();
        for (model, price) in &config.telemetry.custom_pricing {
            pricing.set(
                model.clone(),
                ModelPricing::new(price.input_per_m, price.output_per_m),
            );
        }
        Self::new().with_pricing(pricing)
    }

    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    /// Run to completion. Never panics on provider or tool failure; every
    /// outcome is reported through the returned [`AgentResult`].
    pub async fn run(&self, mut ctx: AgentContext) -> AgentResult {
        let options = ctx.options.clone();
        let gateway =
            ProviderGateway::new(options.call_timeout).with_racing(options.racing_enabled);
        let extractor = ToolCallExtractor::new(options.marker.clone());
        let reflector = Reflector::from_options(&options);
        let tool_defs = ctx.tools.definitions();

        let mut trace = RunTrace::new(self.planner.plan(&ctx));
        trace.push(
            TraceKind::Thought,
            0,
            format!(
                "{} plan with {} step(s)",
                trace.plan.strategy,
                trace.plan.steps.len()
            ),
        );

        info!(
            max_steps = options.max_steps,
            strategy = ?options.strategy,
            tools = tool_defs.len(),
            providers = ctx.providers.len(),
            "Run starting"
        );

        let outcome = loop {
            let iteration = ctx.state.iteration() + 1;
            if ctx.cancellation.is_cancelled() {
                info!(iteration, "Run cancelled");
                break Err(RunFailure::Stopped(StopCondition::Cancelled {
                    iteration: iteration - 1,
                }));
            }

            let planned = !trace.plan.is_exhausted();
            if planned {
                let step = trace.plan.enter_step();
                debug!(iteration, goal = %step.goal, attempt = step.attempts, "Step starting");
            }

            let prompt = prompt::assemble(
                ctx.messages(),
                &tool_defs,
                Some(&trace.plan),
                extractor.marker(),
            );
            let request = ChatRequest::new(prompt).with_tool_schemas(tool_defs.clone());

            let chat = match gateway.call(&request, &ctx.providers, options.strategy).await {
                Ok(chat) => chat,
                Err(exhausted) => {
                    ctx.state
                        .metrics
                        .record_provider_failures(exhausted.attempts.len());
                    trace.provider_calls.extend(
                        exhausted
                            .attempts
                            .iter()
                            .cloned()
                            .map(ProviderAttempt::from),
                    );
                    break Err(RunFailure::ProviderExhausted(exhausted));
                }
            };
            self.record_call(&mut ctx, &request.messages, &chat);
            trace.provider_calls.extend(chat.attempts.iter().cloned());

            let extraction =
                extractor.extract_known(&chat.content, |name| ctx.tools.contains(name));
            if !extraction.cleaned_content.is_empty() {
                trace.push(TraceKind::Thought, iteration, &extraction.cleaned_content);
            }

            let mut step = StepResult {
                iteration,
                provider_id: chat.provider_id,
                raw_text: chat.content,
                cleaned_content: extraction.cleaned_content,
                tool_call: extraction.tool_call,
                tool_outcome: None,
                parse_error: extraction.parse_error,
            };
            let mut assistant = Message::assistant(&step.cleaned_content);
            let mut retry_exhausted = None;

            match &step.tool_call {
                Some(call) => {
                    if !planned {
                        trace.plan.enter_step();
                    }

                    let arguments = call.canonical_arguments();
                    assistant.tool_calls.push(MessageToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: arguments.clone(),
                    });
                    ctx.state.push(assistant);
                    trace.push(
                        TraceKind::Action,
                        iteration,
                        format!("{}({})", call.name, arguments),
                    );

                    let outcome = execute_tool(&ctx.tools, call).await;
                    let (observation, output, success) = match &outcome {
                        ToolOutcome::Success(result) => {
                            (result.output.clone(), result.output.clone(), true)
                        }
                        ToolOutcome::Failure(error) => {
                            (format!("Error: {}", error.cause), error.cause.clone(), false)
                        }
                    };

                    trace.push(TraceKind::Observation, iteration, &observation);
                    ctx.state.push(Message::tool_result(&call.id, observation));
                    ctx.state.metrics.record_tool_execution(success);
                    ctx.state.record_tool(ToolRecord {
                        iteration,
                        tool_name: call.name.clone(),
                        arguments: arguments.clone(),
                        output,
                        success,
                    });

                    if let ToolOutcome::Failure(error) = &outcome {
                        let failures = ctx.state.record_tool_failure(&call.name, &arguments);
                        trace.plan.note_failure(&error.to_string());
                        if failures > options.tool_retry_budget {
                            retry_exhausted = Some(error.clone());
                        } else {
                            warn!(
                                tool = %call.name,
                                failures,
                                budget = options.tool_retry_budget,
                                "Tool failed, handing the error back to the model"
                            );
                        }
                    }
                    step.tool_outcome = Some(outcome);
                }
                None => ctx.state.push(assistant),
            }

            ctx.state.advance();
            trace.steps = ctx.state.iteration();

            if let Some(error) = retry_exhausted {
                break Err(RunFailure::ToolRetryExhausted(error));
            }

            let reflection = reflector.reflect(&step, &trace.plan, &mut ctx);
            trace.reflections += 1;
            for note in reflection.notes {
                trace.push(TraceKind::Reflection, iteration, note);
            }

            match reflection.verdict {
                Verdict::Continue => match &step.tool_outcome {
                    Some(ToolOutcome::Success(result)) => {
                        trace.plan.complete_step(Some(result.output.clone()));
                    }
                    Some(ToolOutcome::Failure(_)) => {}
                    None => trace.plan.complete_step(Some(step.cleaned_content.clone())),
                },
                Verdict::Stop => {
                    if !trace.plan.is_exhausted() {
                        trace.plan.complete_step(Some(step.cleaned_content.clone()));
                    }
                    break Ok(step.cleaned_content);
                }
                Verdict::Fail(condition) => break Err(RunFailure::Stopped(condition)),
            }
        };

        let (messages, metrics) = ctx.state.into_parts();

        match outcome {
            Ok(answer) => {
                trace.plan.skip_remaining();
                info!(
                    steps = trace.steps,
                    tool_calls = metrics.tool_executions,
                    tokens = metrics.total_tokens(),
                    "Run completed"
                );
                AgentResult {
                    messages,
                    answer: Some(answer),
                    status: RunStatus::Done,
                    failure: None,
                    trace,
                    metrics,
                }
            }
            Err(failure) => {
                trace.plan.fail_step(&failure.to_string());
                trace.plan.skip_remaining();
                warn!(steps = trace.steps, error = %failure, "Run failed");
                AgentResult {
                    messages,
                    answer: None,
                    status: RunStatus::Failed,
                    failure: Some(failure),
                    trace,
                    metrics,
                }
            }
        }
    }

    fn record_call(&self, ctx: &mut AgentContext, prompt: &[Message], chat: &ChatResult) {
        let failures = chat.attempts.iter().filter(|a| a.failed()).count();
        let abandoned = chat
            .attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Abandoned)
            .count();
        let usage = chat
            .usage
            .unwrap_or_else(|| token::estimate_usage(prompt, &chat.content));

        ctx.state.metrics.record_provider_failures(failures);
        ctx.state.metrics.record_abandoned_racers(abandoned);
        ctx.state.metrics.record_provider_call(
            chat.tier,
            usage,
            &self.pricing,
            &ctx.options.reference_model,
        );
    }
}

async fn execute_tool(tools: &Arc<ToolRegistry>, call: &ToolCall) -> ToolOutcome {
    let started = Instant::now();
    let result = tools.execute(call).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let failure = |cause: String| {
        ToolOutcome::Failure(ToolExecutionError {
            tool_name: call.name.clone(),
            cause,
        })
    };

    match result {
        Ok(result) if result.success => {
            info!(tool = %call.name, duration_ms, "Tool executed");
            ToolOutcome::Success(result)
        }
        Ok(result) => {
            warn!(tool = %call.name, duration_ms, "Tool reported failure");
            failure(result.output)
        }
        Err(e) => {
            warn!(tool = %call.name, duration_ms, error = %e, "Tool execution failed");
            failure(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepStatus;
    use crate::test_helpers::{DownProvider, ScriptedProvider, context_for};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use vanillaclaw_config::AgentOptions;
    use vanillaclaw_core::{ParseError, Provider, Role};
    use vanillaclaw_providers::ProviderGroup;

    const MULTIPLY: &str = r#"[TOOL_CALL] {"name": "multiply", "arguments": {"a": 15, "b": 8}}"#;
    const DIVIDE: &str = r#"[TOOL_CALL] {"name": "divide", "arguments": {"a": 120, "b": 3}}"#;

    #[tokio::test]
    async fn plain_answer_finishes_in_one_step() {
        let provider = ScriptedProvider::new(&["Paris is the capital of France."]);
        let ctx = context_for("Capital of France?", provider.clone(), AgentOptions::default());

        let result = Executor::new().run(ctx).await;

        assert!(result.is_done());
        assert_eq!(result.answer.as_deref(), Some("Paris is the capital of France."));
        assert_eq!(result.trace.steps, 1);
        assert_eq!(result.metrics.tool_executions, 0);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(result.trace.plan.steps[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn tool_result_is_fed_back_before_the_answer() {
        let provider = ScriptedProvider::new(&[MULTIPLY, DIVIDE, "The result is 40."]);
        let ctx = context_for(
            "Calculate area of 15×8 rectangle, then divide by 3",
            provider.clone(),
            AgentOptions::default(),
        );

        let result = Executor::new().run(ctx).await;

        assert!(result.is_done());
        assert_eq!(result.metrics.tool_executions, 2);
        assert_eq!(result.trace.steps, 3);

        // The second request carries the multiply result as a user turn.
        let second = &provider.requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "Tool result (multiply): 120");
        assert!(second.messages[0].content.contains("[TOOL_CALL]"));
    }

    #[tokio::test]
    async fn history_records_calls_and_results() {
        let provider = ScriptedProvider::new(&[MULTIPLY, "120."]);
        let ctx = context_for("multiply 15 by 8", provider, AgentOptions::default());

        let result = Executor::new().run(ctx).await;
        let roles: Vec<Role> = result.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);

        let call = &result.messages[1].tool_calls[0];
        assert_eq!(call.name, "multiply");
        assert_eq!(call.arguments, r#"{"a":15,"b":8}"#);
        assert_eq!(result.messages[2].tool_call_id.as_deref(), Some(call.id.as_str()));
        assert_eq!(result.messages[2].content, "120");
    }

    #[tokio::test]
    async fn tool_error_is_reported_and_step_reentered() {
        let bad = r#"[TOOL_CALL] {"name": "divide", "arguments": {"a": 1, "b": 0}}"#;
        let good = r#"[TOOL_CALL] {"name": "divide", "arguments": {"a": 1, "b": 1}}"#;
        let provider = ScriptedProvider::new(&[bad, good, "It is 1."]);
        let ctx = context_for("divide 1 by 0", provider, AgentOptions::default());

        let result = Executor::new().run(ctx).await;

        assert!(result.is_done());
        assert_eq!(result.metrics.tool_failures, 1);
        assert!(result.messages[2].content.starts_with("Error: "));
        assert!(result.messages[2].content.contains("division by zero"));
        assert_eq!(result.trace.plan.steps[0].attempts, 2);
    }

    #[tokio::test]
    async fn retry_budget_exceeded_fails_the_run() {
        let bad = r#"[TOOL_CALL] {"name": "divide", "arguments": {"a": 1, "b": 0}}"#;
        let provider = ScriptedProvider::repeating(bad);
        let options = AgentOptions::default()
            .with_tool_retry_budget(1)
            .with_max_steps(10);
        let ctx = context_for("divide 1 by 0", provider.clone(), options);

        let result = Executor::new().run(ctx).await;

        assert_eq!(result.status, RunStatus::Failed);
        match result.failure {
            Some(RunFailure::ToolRetryExhausted(error)) => assert_eq!(error.tool_name, "divide"),
            other => panic!("unexpected failure: {other:?}"),
        }
        assert_eq!(provider.call_count(), 2);
        assert!(result.answer.is_none());
    }

    #[tokio::test]
    async fn provider_exhaustion_is_fatal_and_keeps_history() {
        let ctx = AgentContext::new(
            vec![Message::user("hello")],
            Arc::new(crate::test_helpers::math_tools()),
            ProviderGroup::new()
                .primary(Arc::new(DownProvider("a")))
                .fallback(Arc::new(DownProvider("b"))),
            AgentOptions::default(),
        );

        let result = Executor::new().run(ctx).await;

        assert_eq!(result.status, RunStatus::Failed);
        match &result.failure {
            Some(RunFailure::ProviderExhausted(e)) => assert_eq!(e.attempts.len(), 2),
            other => panic!("unexpected failure: {other:?}"),
        }
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.metrics.provider_failures, 2);

        let history: Vec<(&str, bool)> = result
            .trace
            .provider_calls
            .iter()
            .map(|a| (a.provider_id.as_str(), a.failed()))
            .collect();
        assert_eq!(history, vec![("a", true), ("b", true)]);
    }

    #[tokio::test]
    async fn step_budget_stops_the_run() {
        let provider = ScriptedProvider::new(&[
            r#"[TOOL_CALL] {"name": "multiply", "arguments": {"a": 1, "b": 2}}"#,
            r#"[TOOL_CALL] {"name": "multiply", "arguments": {"a": 2, "b": 2}}"#,
            r#"[TOOL_CALL] {"name": "multiply", "arguments": {"a": 3, "b": 2}}"#,
        ]);
        let ctx = context_for("multiply", provider.clone(), AgentOptions::default().with_max_steps(2));

        let result = Executor::new().run(ctx).await;

        assert_eq!(
            result.stop_condition(),
            Some(&StopCondition::StepBudgetExhausted { max_steps: 2 })
        );
        assert_eq!(provider.call_count(), 2);
        assert_eq!(result.trace.steps, 2);
    }

    #[tokio::test]
    async fn unparseable_call_on_the_last_step_ends_the_run() {
        let raw = "[TOOL_CALL] {name: multiply}";
        let provider = ScriptedProvider::new(&[raw]);
        let ctx = context_for("hello", provider, AgentOptions::default());

        let result = Executor::new().run(ctx).await;

        assert!(result.is_done());
        assert_eq!(result.answer.as_deref(), Some(raw));
        assert_eq!(result.metrics.parse_failures, 1);
        assert_eq!(result.metrics.tool_executions, 0);
        assert!(
            result
                .trace
                .of_kind(TraceKind::Reflection)
                .any(|e| e.content.contains("could not be recovered"))
        );
    }

    #[tokio::test]
    async fn unparseable_call_with_steps_left_moves_on() {
        let raw = "[TOOL_CALL] {name: multiply}";
        let provider = ScriptedProvider::new(&[raw, "15 times 8 is 120."]);
        let ctx = context_for("multiply", provider.clone(), AgentOptions::default());

        let result = Executor::new().run(ctx).await;

        assert!(result.is_done());
        assert_eq!(result.answer.as_deref(), Some("15 times 8 is 120."));
        assert_eq!(provider.call_count(), 2);
        assert_eq!(result.metrics.parse_failures, 1);
        let first = &result.trace.plan.steps[0];
        assert_eq!(first.status, StepStatus::Completed);
        assert_eq!(first.result.as_deref(), Some(raw));
        assert!(
            result
                .trace
                .of_kind(TraceKind::Reflection)
                .any(|e| e.content.contains("next plan step"))
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_not_executed() {
        let raw = r#"[TOOL_CALL] {"name": "teleport", "arguments": {}}"#;
        let provider = ScriptedProvider::new(&[raw]);
        let ctx = context_for("go", provider, AgentOptions::default());

        let result = Executor::new().run(ctx).await;

        assert!(result.is_done());
        assert_eq!(result.metrics.tool_executions, 0);
        assert!(
            result
                .trace
                .of_kind(TraceKind::Reflection)
                .any(|e| e.content.contains(&ParseError::UnknownTool("teleport".into()).to_string()))
        );
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let provider = ScriptedProvider::new(&["never"]);
        let token = CancellationToken::new();
        token.cancel();
        let ctx = context_for("hi", provider.clone(), AgentOptions::default())
            .with_cancellation(token);

        let result = Executor::new().run(ctx).await;

        assert_eq!(
            result.stop_condition(),
            Some(&StopCondition::Cancelled { iteration: 0 })
        );
        assert_eq!(provider.call_count(), 0);
    }

    /// Cancels the run from inside its first provider call.
    struct CancellingProvider {
        token: CancellationToken,
        inner: Arc<ScriptedProvider>,
    }

    #[async_trait::async_trait]
    impl Provider for CancellingProvider {
        fn id(&self) -> &str {
            "cancelling"
        }

        fn tier(&self) -> vanillaclaw_core::ProviderTier {
            vanillaclaw_core::ProviderTier::Free
        }

        async fn chat(
            &self,
            request: ChatRequest,
        ) -> Result<vanillaclaw_core::ChatResponse, vanillaclaw_core::ProviderError> {
            self.token.cancel();
            self.inner.chat(request).await
        }
    }

    #[tokio::test]
    async fn cancellation_takes_effect_at_the_next_boundary() {
        let token = CancellationToken::new();
        let inner = ScriptedProvider::new(&[MULTIPLY, "done"]);
        let provider = Arc::new(CancellingProvider {
            token: token.clone(),
            inner: inner.clone(),
        });
        let ctx = context_for("multiply 15 by 8", provider, AgentOptions::default())
            .with_cancellation(token);

        let result = Executor::new().run(ctx).await;

        // The in-flight step finished, tool included, before the stop.
        assert_eq!(result.metrics.tool_executions, 1);
        assert_eq!(
            result.stop_condition(),
            Some(&StopCondition::Cancelled { iteration: 1 })
        );
        assert_eq!(inner.call_count(), 1);
    }

    #[tokio::test]
    async fn free_tier_usage_is_valued() {
        let provider = ScriptedProvider::new(&["hi"]);
        let ctx = context_for("hello", provider, AgentOptions::default());

        let result = Executor::new().run(ctx).await;

        assert_eq!(result.metrics.free_tier_calls, 1);
        assert_eq!(result.metrics.prompt_tokens, 10);
        assert!(result.metrics.estimated_savings_usd > 0.0);
    }

    #[tokio::test]
    async fn pricing_overrides_come_from_config() {
        let mut config = AppConfig::default();
        config.telemetry.reference_model = "custom/model".into();
        config.telemetry.custom_pricing.insert(
            "custom/model".into(),
            vanillaclaw_config::PricingOverrideConfig {
                input_per_m: 1_000_000.0,
                output_per_m: 0.0,
            },
        );
        let provider = ScriptedProvider::new(&["hi"]);
        let ctx = context_for("hello", provider, config.agent_options());

        let result = Executor::from_config(&config).run(ctx).await;

        // 10 prompt tokens at $1 per token.
        assert!((result.metrics.estimated_savings_usd - 10.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out_into_fallback() {
        struct Hanging;

        #[async_trait::async_trait]
        impl Provider for Hanging {
            fn id(&self) -> &str {
                "hanging"
            }
            fn tier(&self) -> vanillaclaw_core::ProviderTier {
                vanillaclaw_core::ProviderTier::Free
            }
            async fn chat(
                &self,
                _request: ChatRequest,
            ) -> Result<vanillaclaw_core::ChatResponse, vanillaclaw_core::ProviderError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vanillaclaw_core::ChatResponse::text("late"))
            }
        }

        let ctx = AgentContext::new(
            vec![Message::user("hello")],
            Arc::new(crate::test_helpers::math_tools()),
            ProviderGroup::new()
                .primary(Arc::new(Hanging))
                .fallback(ScriptedProvider::new(&["on time"])),
            AgentOptions::default().with_call_timeout(Duration::from_millis(100)),
        );

        let result = Executor::new().run(ctx).await;

        assert_eq!(result.answer.as_deref(), Some("on time"));
        assert_eq!(result.metrics.provider_failures, 1);
        assert_eq!(result.trace.provider_calls.len(), 2);
    }

    /// A healthy paid provider that answers after a delay.
    struct Delayed {
        id: &'static str,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Provider for Delayed {
        fn id(&self) -> &str {
            self.id
        }
        fn tier(&self) -> vanillaclaw_core::ProviderTier {
            vanillaclaw_core::ProviderTier::Paid
        }
        async fn chat(
            &self,
            _request: ChatRequest,
        ) -> Result<vanillaclaw_core::ChatResponse, vanillaclaw_core::ProviderError> {
            tokio::time::sleep(self.delay).await;
            Ok(vanillaclaw_core::ChatResponse::text(self.id))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lost_racers_are_not_failures() {
        let ctx = AgentContext::new(
            vec![Message::user("hello")],
            Arc::new(crate::test_helpers::math_tools()),
            ProviderGroup::new()
                .primary(Arc::new(Delayed {
                    id: "quick",
                    delay: Duration::from_millis(10),
                }))
                .primary(Arc::new(Delayed {
                    id: "steady",
                    delay: Duration::from_millis(200),
                })),
            AgentOptions::default().with_racing(true),
        );

        let result = Executor::new().run(ctx).await;

        assert_eq!(result.answer.as_deref(), Some("quick"));
        assert_eq!(result.metrics.provider_failures, 0);
        assert_eq!(result.metrics.abandoned_racers, 1);
    }
}
