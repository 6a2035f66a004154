use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod capability;
pub mod composition;
pub mod execution;
pub mod message;
pub mod workflow;

pub use capability::{CapabilityInterface, FieldKind, FieldSpec, Payload, Shape};
pub use composition::{
    AgentComposition, AgentRole, CompositionNode, CompositionSummary, CompositionType,
};
pub use execution::{
    CompositionExecution, ExecutionSnapshot, ExecutionStatus, ExecutionSummary, StepResult,
    WorkflowExecution,
};
pub use message::{
    CapabilityRequest, CapabilityResponse, InvocationRequest, InvocationResponse, MessagePriority,
};
pub use workflow::{
    StepConditions, Topology, ValueCondition, WorkflowDefinition, WorkflowStep, WorkflowSummary,
};

/// What an agent hands back for one capability call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOutput {
    pub success: bool,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cost: f64,
}

impl AgentOutput {
    pub fn ok(result: Value, cost: f64) -> Self {
        Self {
            success: true,
            result,
            error: None,
            cost,
        }
    }

    pub fn failed(error: impl Into<String>, cost: f64) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
            cost,
        }
    }
}

/// Capability-invocation boundary implemented by every agent.
///
/// An `Err` is treated as a failed, zero-cost invocation.
#[async_trait]
pub trait AgentPort: Send + Sync {
    async fn invoke(&self, capability: &str, input: Payload) -> anyhow::Result<AgentOutput>;
}
