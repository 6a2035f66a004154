//! Execution records produced by the orchestrator and the composition engine

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Pending -> Running -> {Completed, Failed, Cancelled}; Pending may also be cancelled
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match (self, next) {
            (ExecutionStatus::Pending, ExecutionStatus::Running) => true,
            (ExecutionStatus::Pending, ExecutionStatus::Cancelled) => true,
            (ExecutionStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one step or node after its retry policy ran out
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepResult {
    pub success: bool,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cost: f64,
    pub duration_ms: u64,
    pub attempts: u32,
    /// Conditions evaluated false, or a fallback that was not needed
    #[serde(default)]
    pub skipped: bool,
}

impl StepResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(reason.into()),
            cost: 0.0,
            duration_ms: 0,
            attempts: 0,
            skipped: true,
        }
    }

    /// A step that never produced an agent response
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(reason.into()),
            cost: 0.0,
            duration_ms: 0,
            attempts: 0,
            skipped: false,
        }
    }

    /// Result payload as an object, empty for non-object results
    pub fn result_object(&self) -> Map<String, Value> {
        self.result.as_object().cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExecutionSummary {
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub total_steps: usize,
    pub success_rate: f64,
}

impl ExecutionSummary {
    pub fn from_results<'a>(
        results: impl IntoIterator<Item = &'a StepResult>,
        total_steps: usize,
    ) -> Self {
        let mut summary = Self {
            steps_completed: 0,
            steps_failed: 0,
            steps_skipped: 0,
            total_steps,
            success_rate: 0.0,
        };
        for r in results {
            if r.skipped {
                summary.steps_skipped += 1;
            } else if r.success {
                summary.steps_completed += 1;
            } else {
                summary.steps_failed += 1;
            }
        }
        if total_steps > 0 {
            summary.success_rate = summary.steps_completed as f64 / total_steps as f64;
        }
        summary
    }
}

/// Fields shared by workflow and composition runs
pub trait ExecutionRecord: Send + Sync + 'static {
    fn execution_id(&self) -> &str;
    fn status(&self) -> ExecutionStatus;
    fn set_status(&mut self, status: ExecutionStatus);
    fn set_error(&mut self, error: String);
    fn finish(&mut self, status: ExecutionStatus) {
        if self.status().can_transition_to(status) {
            self.set_status(status);
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub step_results: BTreeMap<String, StepResult>,
    pub total_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExecutionSummary>,
}

impl WorkflowExecution {
    pub fn new(execution_id: String, workflow_id: String) -> Self {
        Self {
            execution_id,
            workflow_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            step_results: BTreeMap::new(),
            total_cost: 0.0,
            error: None,
            summary: None,
        }
    }
}

impl ExecutionRecord for WorkflowExecution {
    fn execution_id(&self) -> &str {
        &self.execution_id
    }

    fn status(&self) -> ExecutionStatus {
        self.status
    }

    fn set_status(&mut self, status: ExecutionStatus) {
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    fn set_error(&mut self, error: String) {
        self.error = Some(error);
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CompositionExecution {
    pub execution_id: String,
    pub composition_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub node_results: BTreeMap<String, StepResult>,
    /// External input with every node's mapped outputs folded in
    pub final_data: Map<String, Value>,
    pub total_cost: f64,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExecutionSummary>,
}

impl CompositionExecution {
    pub fn new(execution_id: String, composition_id: String) -> Self {
        Self {
            execution_id,
            composition_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            node_results: BTreeMap::new(),
            final_data: Map::new(),
            total_cost: 0.0,
            iterations: 0,
            error: None,
            summary: None,
        }
    }
}

impl ExecutionRecord for CompositionExecution {
    fn execution_id(&self) -> &str {
        &self.execution_id
    }

    fn status(&self) -> ExecutionStatus {
        self.status
    }

    fn set_status(&mut self, status: ExecutionStatus) {
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    fn set_error(&mut self, error: String) {
        self.error = Some(error);
    }
}

/// Either kind of execution, as returned by status lookups
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionSnapshot {
    Workflow(WorkflowExecution),
    Composition(CompositionExecution),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_finish_keeps_terminal_state() {
        let mut exec = WorkflowExecution::new("e1".into(), "w1".into());
        exec.finish(ExecutionStatus::Running);
        exec.finish(ExecutionStatus::Cancelled);
        exec.finish(ExecutionStatus::Completed);

        assert_eq!(exec.status, ExecutionStatus::Cancelled);
        assert!(exec.completed_at.is_some());
    }

    #[test]
    fn test_summary_counts() {
        let ok = StepResult {
            success: true,
            result: Value::Null,
            error: None,
            cost: 0.1,
            duration_ms: 1,
            attempts: 1,
            skipped: false,
        };
        let failed = StepResult {
            success: false,
            ..ok.clone()
        };
        let skipped = StepResult::skipped("condition not met");

        let summary = ExecutionSummary::from_results([&ok, &ok, &failed, &skipped], 4);
        assert_eq!(summary.steps_completed, 2);
        assert_eq!(summary.steps_failed, 1);
        assert_eq!(summary.steps_skipped, 1);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
