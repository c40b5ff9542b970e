//! Core data model shared across the dispatcher, action plan engine, and
//! reliability substrate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Caution,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed | StepStatus::Skipped)
    }
}

/// One unit of work in an [`ActionPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_number: u32,
    pub agent: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub tools: Vec<String>,
    pub reference_code: Option<String>,
    pub status: StepStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub user_notes: Option<String>,
    pub triad_notes: Option<String>,
    pub elapsed_seconds: f64,
    pub skipped: bool,
    pub pause_after: bool,
}

impl PlanStep {
    pub fn new(step_number: u32, agent: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_number,
            agent: agent.into(),
            description: description.into(),
            risk_level: RiskLevel::Safe,
            tools: Vec::new(),
            reference_code: None,
            status: StepStatus::Pending,
            output: None,
            error: None,
            user_notes: None,
            triad_notes: None,
            elapsed_seconds: 0.0,
            skipped: false,
            pause_after: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Reviewing,
    Approved,
    Executing,
    Complete,
    Failed,
    Finalized,
}

/// A revision snapshot: the step set as it existed immediately before a
/// revision replaced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub steps: Vec<PlanStep>,
    pub timestamp: DateTime<Utc>,
}

/// A full ordered plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub task: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
    pub revision_count: u32,
    pub revision_history: Vec<RevisionRecord>,
    pub created_at: DateTime<Utc>,
    pub artifacts: Vec<String>,
    pub paused: bool,
    pub cancel: bool,
}

impl ActionPlan {
    pub fn new(task: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        let mut plan = Self {
            task: task.into(),
            steps,
            status: PlanStatus::Draft,
            revision_count: 0,
            revision_history: Vec::new(),
            created_at: Utc::now(),
            artifacts: Vec::new(),
            paused: false,
            cancel: false,
        };
        plan.renumber();
        plan
    }

    /// Renumber steps 1..n contiguously, preserving order.
    pub fn renumber(&mut self) {
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.step_number = (i + 1) as u32;
        }
    }

    pub fn push_artifact(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.artifacts.contains(&path) {
            self.artifacts.push(path);
        }
    }
}

/// One routable specialist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpoint {
    pub role: String,
    pub url: String,
    pub is_shared: bool,
}

/// One chat turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

/// Bounded chat history for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    pub session_id: String,
    pub turns: Vec<Turn>,
    pub window_size: usize,
}

impl SessionMemory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
            window_size: 5,
        }
    }

    /// Append a turn, truncating the front so `turns.len() <= 2 * window_size`.
    pub fn push(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.turns.push(Turn {
            role: role.into(),
            content: content.into(),
        });
        let cap = 2 * self.window_size;
        if self.turns.len() > cap {
            let excess = self.turns.len() - cap;
            self.turns.drain(0..excess);
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

/// Persisted state of one named circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub name: String,
    pub state: CircuitStateKind,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

/// One backed-up file version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub file: String,
    pub original_path: String,
    pub snapshot_name: String,
    pub snapshot_path: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub app: String,
    pub size_bytes: u64,
}

/// Per-workflow execution counts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowCounts {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

/// One point-in-time usage reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSample {
    pub timestamp: DateTime<Utc>,
    pub total_executions: u64,
    pub success: u64,
    pub failed: u64,
    pub failure_rate: f64,
    pub by_workflow: BTreeMap<String, WorkflowCounts>,
    pub monthly_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// One log line (JSONL) written by the Error Aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub app: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_memory_bounds_to_window() {
        let mut mem = SessionMemory::new("s1");
        mem.window_size = 2;
        for i in 0..10 {
            mem.push("user", format!("turn {}", i));
        }
        assert_eq!(mem.turns.len(), 4);
        assert_eq!(mem.turns.last().unwrap().content, "turn 9");
    }

    #[test]
    fn action_plan_renumbers_contiguously() {
        let mut steps = vec![
            PlanStep::new(5, "planner", "a"),
            PlanStep::new(9, "planner", "b"),
        ];
        steps[0].step_number = 5;
        steps[1].step_number = 9;
        let plan = ActionPlan::new("task", steps);
        assert_eq!(plan.steps[0].step_number, 1);
        assert_eq!(plan.steps[1].step_number, 2);
    }

    #[test]
    fn artifacts_deduplicated() {
        let mut plan = ActionPlan::new("t", vec![]);
        plan.push_artifact("a.md");
        plan.push_artifact("a.md");
        plan.push_artifact("b.md");
        assert_eq!(plan.artifacts, vec!["a.md".to_string(), "b.md".to_string()]);
    }
}
