//! Plans produced by the planner and advanced by the executor.

use serde::{Deserialize, Serialize};

/// How a plan step is expected to be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStrategy {
    /// Answer without tools.
    Direct,
    /// One tool call per step, each depending on the last.
    Iterative,
    /// Several independent tools, one per step.
    ParallelTools,
}

impl std::fmt::Display for StepStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Iterative => write!(f, "iterative"),
            Self::ParallelTools => write!(f, "parallel_tools"),
        }
    }
}

/// Status of a plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed(String),
    /// Never started because the run finished first.
    Skipped,
}

/// A single step in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub goal: String,
    pub strategy: StepStrategy,
    pub status: StepStatus,
    /// Times this step has been entered (more than one only after a tool failure).
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl PlanStep {
    pub fn new(goal: impl Into<String>, strategy: StepStrategy) -> Self {
        Self {
            goal: goal.into(),
            strategy,
            status: StepStatus::Pending,
            attempts: 0,
            result: None,
        }
    }
}

/// An ordered list of steps with progress tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub strategy: StepStrategy,
    pub steps: Vec<PlanStep>,
    pub current_step: usize,
}

impl Plan {
    pub fn new(goal: impl Into<String>, strategy: StepStrategy, goals: Vec<String>) -> Self {
        Self {
            goal: goal.into(),
            strategy,
            steps: goals
                .into_iter()
                .map(|g| PlanStep::new(g, strategy))
                .collect(),
            current_step: 0,
        }
    }

    pub fn current(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_step >= self.steps.len()
    }

    /// Enter the current step, appending a follow-up step if the plan has
    /// run out. Re-entering a step after a tool failure counts an attempt.
    pub fn enter_step(&mut self) -> &PlanStep {
        if self.is_exhausted() {
            let goal = format!("Follow up on: {}", self.goal);
            self.steps.push(PlanStep::new(goal, StepStrategy::Iterative));
            self.current_step = self.steps.len() - 1;
        }
        let idx = self.current_step;
        let step = &mut self.steps[idx];
        step.status = StepStatus::InProgress;
        step.attempts += 1;
        step
    }

    /// Mark the current step completed and move to the next.
    pub fn complete_step(&mut self, result: Option<String>) {
        if let Some(step) = self.steps.get_mut(self.current_step) {
            step.status = StepStatus::Completed;
            step.result = result;
            self.current_step += 1;
        }
    }

    /// Record a failed attempt; the step stays current so it can be re-entered.
    pub fn note_failure(&mut self, reason: &str) {
        if let Some(step) = self.steps.get_mut(self.current_step) {
            step.result = Some(reason.to_string());
        }
    }

    /// Mark the current step failed, if it was started.
    pub fn fail_step(&mut self, reason: &str) {
        if let Some(step) = self.steps.get_mut(self.current_step)
            && step.status == StepStatus::InProgress
        {
            step.status = StepStatus::Failed(reason.to_string());
        }
    }

    /// Mark every step not yet started as skipped.
    pub fn skip_remaining(&mut self) {
        for step in &mut self.steps {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }
    }

    /// Render the plan for the system prompt.
    pub fn render(&self) -> String {
        let mut out = String::from("## Current Plan\n");
        out.push_str(&format!("Goal: {}\n", self.goal));
        for (i, step) in self.steps.iter().enumerate() {
            let marker = match &step.status {
                StepStatus::Completed => "x",
                StepStatus::InProgress => ">",
                StepStatus::Failed(_) => "!",
                StepStatus::Pending | StepStatus::Skipped => " ",
            };
            out.push_str(&format!("{}. [{}] {}\n", i + 1, marker, step.goal));
            if let Some(result) = &step.result {
                out.push_str(&format!("   Result: {}\n", result));
            }
        }
        out
    }
}
