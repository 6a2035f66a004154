//! Workflow definitions: ordered, linked steps executed under one topology

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::capability::Payload;
use super::composition::AgentRole;

/// Execution strategy of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Dependency order, one step at a time; a failure aborts the run
    #[default]
    Sequential,
    /// Dependency levels fanned out concurrently
    Parallel,
    /// Declaration order with per-step conditions
    Conditional,
    /// Role tiers (primary, secondary, validator, aggregator, fallback)
    Hierarchical,
    /// Declaration order with per-step conditions
    Hybrid,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Topology::Sequential => "sequential",
            Topology::Parallel => "parallel",
            Topology::Conditional => "conditional",
            Topology::Hierarchical => "hierarchical",
            Topology::Hybrid => "hybrid",
        };
        write!(f, "{}", name)
    }
}

/// Expected value of a field in a prior step's result
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ValueCondition {
    pub field: String,
    pub value: Value,
}

/// Conjunction of predicates over prior step results
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct StepConditions {
    /// Steps that must have run and succeeded
    #[serde(default)]
    pub require_success: Vec<String>,
    /// Step id -> field that must equal a value in that step's result
    #[serde(default)]
    pub require_value: BTreeMap<String, ValueCondition>,
    /// Rhai expression over `input` and `steps` that must evaluate to true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl StepConditions {
    /// Every step id these conditions refer to
    pub fn referenced_steps(&self) -> impl Iterator<Item = &String> {
        self.require_success.iter().chain(self.require_value.keys())
    }

    pub fn is_empty(&self) -> bool {
        self.require_success.is_empty() && self.require_value.is_empty() && self.expression.is_none()
    }
}

/// A single capability invocation inside a workflow
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkflowStep {
    pub step_id: String,
    pub agent_id: String,
    pub capability: String,
    /// Static payload merged with the runtime context
    #[serde(default)]
    pub input_data: Payload,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<StepConditions>,
    /// Tier used by the hierarchical topology (defaults to primary)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AgentRole>,
    /// Per-attempt timeout enforced at the invocation gateway
    #[serde(default = "default_step_timeout")]
    pub timeout_ms: u64,
    /// Additional attempts after the first failure
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

pub(crate) fn default_step_timeout() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    3
}

impl WorkflowStep {
    pub fn new(
        step_id: impl Into<String>,
        agent_id: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            agent_id: agent_id.into(),
            capability: capability.into(),
            input_data: Payload::new(),
            depends_on: Vec::new(),
            conditions: None,
            role: None,
            timeout_ms: default_step_timeout(),
            retry_count: default_retry_count(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input(mut self, input: Payload) -> Self {
        self.input_data = input;
        self
    }

    pub fn with_conditions(mut self, conditions: StepConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn effective_role(&self) -> AgentRole {
        self.role.unwrap_or(AgentRole::Primary)
    }
}

/// Declarative workflow, registered once and executed many times
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topology: Topology,
    pub steps: Vec<WorkflowStep>,
    #[serde(default = "default_global_timeout")]
    pub global_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

fn default_global_timeout() -> u64 {
    300
}

impl WorkflowDefinition {
    pub fn new(workflow_id: impl Into<String>, topology: Topology, steps: Vec<WorkflowStep>) -> Self {
        let workflow_id = workflow_id.into();
        Self {
            name: workflow_id.clone(),
            workflow_id,
            description: String::new(),
            topology,
            steps,
            global_timeout_secs: default_global_timeout(),
            cost_limit: None,
            metadata: Map::new(),
        }
    }

    pub fn with_cost_limit(mut self, limit: f64) -> Self {
        self.cost_limit = Some(limit);
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

/// Catalog entry returned by workflow listings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    pub topology: Topology,
    pub step_count: usize,
    pub estimated_cost: Option<f64>,
    pub estimated_duration_secs: u64,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(def: &WorkflowDefinition) -> Self {
        Self {
            workflow_id: def.workflow_id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            topology: def.topology,
            step_count: def.steps.len(),
            estimated_cost: def.cost_limit,
            estimated_duration_secs: def.global_timeout_secs,
        }
    }
}
