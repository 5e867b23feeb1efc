//! Task classification and planning.
//!
//! The planner turns the latest user request into a [`Plan`]. How the
//! request is classified is delegated to a [`Classifier`], a pure function
//! of the request text and the tool catalogue. The default
//! [`HeuristicClassifier`] looks for ordering language and tool vocabulary;
//! it only has to be deterministic, not right.

use serde::{Deserialize, Serialize};
use tracing::info;
use vanillaclaw_core::ToolDefinition;

use crate::context::AgentContext;
use crate::plan::{Plan, StepStrategy};

/// What a classifier concluded about a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub strategy: StepStrategy,
    /// Step goals. Empty means the classifier could not tell, and the
    /// planner falls back to the default step budget.
    pub steps: Vec<String>,
    /// Registered tools the request appears to refer to.
    pub tools: Vec<String>,
}

/// Classifies a request. Implementations must be pure and deterministic.
pub trait Classifier: Send + Sync {
    fn classify(&self, request: &str, tools: &[ToolDefinition]) -> Classification;
}

/// Ordered connectives; longer phrases win where they overlap.
const CONNECTIVES: &[&str] = &[
    "and then",
    "after that",
    "followed by",
    "afterwards",
    "subsequently",
    "finally",
    "then",
    "next",
    "first",
    "second",
];

/// Words too common in tool descriptions to identify a tool.
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "before", "being", "could", "every", "given", "other", "input",
    "output", "provided", "result", "results", "return", "returns", "should", "specified",
    "string", "their", "there", "these", "thing", "those", "using", "value", "values", "which",
    "while", "would",
];

/// Keyword-driven classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl Classifier for HeuristicClassifier {
    fn classify(&self, request: &str, tools: &[ToolDefinition]) -> Classification {
        let words = words(request);
        let mentioned: Vec<String> = tools
            .iter()
            .filter(|t| vocabulary(t).iter().any(|term| words.iter().any(|w| hits(w, term))))
            .map(|t| t.name.clone())
            .collect();

        if mentioned.is_empty() {
            return Classification {
                strategy: StepStrategy::Direct,
                steps: vec![request.trim().to_string()],
                tools: mentioned,
            };
        }

        let enumerated = enumerated_lines(request);
        let spans = connective_spans(&request.to_ascii_lowercase());
        let sequential = enumerated.len() >= 2 || !spans.is_empty();

        let clauses = if enumerated.len() >= 2 {
            enumerated
        } else {
            split_clauses(request, &spans)
        };

        if sequential && clauses.len() >= 2 {
            return Classification {
                strategy: StepStrategy::Iterative,
                steps: clauses,
                tools: mentioned,
            };
        }

        if !sequential && mentioned.len() >= 2 {
            return Classification {
                strategy: StepStrategy::ParallelTools,
                steps: mentioned.iter().map(|t| format!("Use {t}")).collect(),
                tools: mentioned,
            };
        }

        Classification {
            strategy: StepStrategy::Iterative,
            steps: Vec::new(),
            tools: mentioned,
        }
    }
}

/// Lowercased alphanumeric words.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Terms that identify a tool: its name, the parts of its name, and the
/// salient words of its description.
fn vocabulary(tool: &ToolDefinition) -> Vec<String> {
    let name = tool.name.to_lowercase();
    let mut terms = vec![name.clone()];
    terms.extend(
        name.split(['_', '-'])
            .filter(|p| p.len() >= 3 && *p != name)
            .map(str::to_string),
    );
    terms.extend(
        words(&tool.description)
            .into_iter()
            .filter(|w| w.len() >= 5 && w.chars().all(char::is_alphabetic))
            .filter(|w| !STOPWORDS.contains(&w.as_str())),
    );
    terms.sort();
    terms.dedup();
    terms
}

fn hits(word: &str, term: &str) -> bool {
    word == term || (term.len() >= 4 && word.starts_with(term))
}

/// Byte ranges of connectives at word boundaries, non-overlapping.
fn connective_spans(lower: &str) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    for phrase in CONNECTIVES {
        let mut from = 0;
        while let Some(offset) = lower[from..].find(phrase) {
            let start = from + offset;
            let end = start + phrase.len();
            if at_word_boundary(lower, start, end) {
                found.push((start, end));
            }
            from = end;
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    let mut spans = Vec::new();
    let mut last_end = 0;
    for (start, end) in found {
        if start >= last_end {
            spans.push((start, end));
            last_end = end;
        }
    }
    spans
}

fn at_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start]
        .chars()
        .next_back()
        .is_none_or(|c| !c.is_alphanumeric());
    let after = text[end..]
        .chars()
        .next()
        .is_none_or(|c| !c.is_alphanumeric());
    before && after
}

fn split_clauses(text: &str, spans: &[(usize, usize)]) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut cursor = 0;
    for &(start, end) in spans {
        push_clause(&mut clauses, &text[cursor..start]);
        cursor = end;
    }
    push_clause(&mut clauses, &text[cursor..]);
    clauses
}

fn push_clause(clauses: &mut Vec<String>, piece: &str) {
    let trim = |s: &str| {
        s.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '.' | ':'))
            .to_string()
    };
    let mut clause = trim(piece);
    if clause.to_ascii_lowercase().ends_with(" and") {
        clause = trim(&clause[..clause.len() - 4]);
    }
    if !clause.is_empty() {
        clauses.push(clause);
    }
}

/// Lines that start with `1.`, `2)`, `- `, `* ` or `step n`, enumerator removed.
fn enumerated_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| strip_enumerator(line.trim()))
        .filter(|rest| !rest.is_empty())
        .collect()
}

fn strip_enumerator(line: &str) -> Option<String> {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        let rest = &line[digits..];
        return rest
            .strip_prefix('.')
            .or_else(|| rest.strip_prefix(')'))
            .map(|r| r.trim().to_string());
    }

    for bullet in ["- ", "* ", "\u{2022} "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest.trim().to_string());
        }
    }

    let lower = line.to_ascii_lowercase();
    let rest = lower.strip_prefix("step ")?;
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let offset = line.len() - rest.len() + digits;
    Some(
        line[offset..]
            .trim_start_matches([':', '.', ')'])
            .trim()
            .to_string(),
    )
}

/// Builds a [`Plan`] for a run.
pub struct Planner {
    classifier: Box<dyn Classifier>,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(HeuristicClassifier)
    }
}

impl Planner {
    pub fn new(classifier: impl Classifier + 'static) -> Self {
        Self {
            classifier: Box::new(classifier),
        }
    }

    /// Plan the latest user request in `ctx`.
    pub fn plan(&self, ctx: &AgentContext) -> Plan {
        let request = ctx.request_text().unwrap_or_default();
        let classification = self.classifier.classify(request, &ctx.tools.definitions());
        let max_steps = ctx.options.max_steps.max(1) as usize;

        let ambiguous = classification.steps.is_empty();
        let goals = if ambiguous {
            let budget = (ctx.options.default_step_budget as usize).clamp(1, max_steps);
            (1..=budget)
                .map(|i| format!("Step {i} of {budget}: {request}"))
                .collect()
        } else {
            clamp_steps(classification.steps, max_steps)
        };

        info!(
            strategy = %classification.strategy,
            steps = goals.len(),
            tools = ?classification.tools,
            ambiguous,
            "Planner: plan ready"
        );

        Plan::new(request, classification.strategy, goals)
    }
}

/// Keep at most `max` steps, folding the overflow into the last one.
fn clamp_steps(mut steps: Vec<String>, max: usize) -> Vec<String> {
    if steps.len() > max {
        let tail = steps.split_off(max - 1);
        steps.push(tail.join("; "));
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{context_with, math_tools};
    use serde_json::json;
    use vanillaclaw_config::AgentOptions;
    use vanillaclaw_core::Message;

    fn defs() -> Vec<ToolDefinition> {
        math_tools().definitions()
    }

    fn def(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object"}),
        }
    }

    #[test]
    fn no_tool_vocabulary_is_direct() {
        let c = HeuristicClassifier.classify("Tell me a joke about cats", &defs());
        assert_eq!(c.strategy, StepStrategy::Direct);
        assert_eq!(c.steps, vec!["Tell me a joke about cats"]);
        assert!(c.tools.is_empty());
    }

    #[test]
    fn ordered_language_is_iterative_per_clause() {
        let c = HeuristicClassifier.classify(
            "Calculate area of 15×8 rectangle, then divide by 3",
            &defs(),
        );
        assert_eq!(c.strategy, StepStrategy::Iterative);
        assert_eq!(c.steps, vec!["Calculate area of 15×8 rectangle", "divide by 3"]);
    }

    #[test]
    fn longer_connective_wins_over_contained_one() {
        let c = HeuristicClassifier.classify("multiply 2 by 3 and then divide by 2", &defs());
        assert_eq!(c.steps, vec!["multiply 2 by 3", "divide by 2"]);
    }

    #[test]
    fn enumerated_lines_become_steps() {
        let request = "Please do this:\n1. multiply 4 and 5\n2) divide the result by 2\n- report it";
        let c = HeuristicClassifier.classify(request, &defs());
        assert_eq!(c.strategy, StepStrategy::Iterative);
        assert_eq!(
            c.steps,
            vec!["multiply 4 and 5", "divide the result by 2", "report it"]
        );
    }

    #[test]
    fn distinct_tools_without_order_are_parallel() {
        let tools = vec![
            def("get_weather", "Current weather for a city"),
            def("get_time", "Current local time for a timezone"),
        ];
        let c = HeuristicClassifier.classify("What's the weather and time in Paris?", &tools);
        assert_eq!(c.strategy, StepStrategy::ParallelTools);
        assert_eq!(c.steps, vec!["Use get_weather", "Use get_time"]);
        assert_eq!(c.tools.len(), 2);
    }

    #[test]
    fn connectives_respect_word_boundaries() {
        let c = HeuristicClassifier.classify("divide 10 seconds by 2 in a strengthened way", &defs());
        assert_eq!(c.strategy, StepStrategy::Iterative);
        assert!(c.steps.is_empty());
    }

    #[test]
    fn ambiguous_request_uses_default_budget() {
        let ctx = context_with(
            vec![Message::user("divide something")],
            AgentOptions {
                default_step_budget: 3,
                ..AgentOptions::default()
            },
        );
        let plan = Planner::default().plan(&ctx);
        assert_eq!(plan.strategy, StepStrategy::Iterative);
        assert_eq!(plan.steps.len(), 3);
        assert!(plan.steps[0].goal.starts_with("Step 1 of 3"));
    }

    #[test]
    fn step_count_is_clamped_to_max_steps() {
        let ctx = context_with(
            vec![Message::user(
                "multiply 1 by 2, then multiply 3 by 4, then divide 8 by 2, then divide 6 by 3",
            )],
            AgentOptions::default().with_max_steps(2),
        );
        let plan = Planner::default().plan(&ctx);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].goal, "multiply 1 by 2");
        assert_eq!(plan.steps[1].goal, "multiply 3 by 4; divide 8 by 2; divide 6 by 3");
    }

    #[test]
    fn planning_is_deterministic() {
        let ctx = context_with(
            vec![Message::user("Calculate area of 15×8 rectangle, then divide by 3")],
            AgentOptions::default(),
        );
        let planner = Planner::default();
        assert_eq!(planner.plan(&ctx), planner.plan(&ctx));
    }

    #[test]
    fn custom_classifier_is_used() {
        struct Always;
        impl Classifier for Always {
            fn classify(&self, _: &str, _: &[ToolDefinition]) -> Classification {
                Classification {
                    strategy: StepStrategy::Direct,
                    steps: vec!["just answer".into()],
                    tools: Vec::new(),
                }
            }
        }

        let ctx = context_with(vec![Message::user("divide 4 by 2")], AgentOptions::default());
        let plan = Planner::new(Always).plan(&ctx);
        assert_eq!(plan.strategy, StepStrategy::Direct);
        assert_eq!(plan.steps[0].goal, "just answer");
    }
}
