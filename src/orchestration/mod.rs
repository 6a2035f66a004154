//! Orchestration engine: directory, gateway, resolver and the two executors

pub mod budget;
pub mod catalog;
pub mod composition;
pub mod conditions;
pub mod context;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod strategies;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use anyhow::Context as _;

use crate::adapters::metrics_handler::EngineMetrics;
use crate::adapters::mock_agent::MockAgent;
use crate::config::{AgentConfig, EngineSettings, Settings};
use crate::domain::{
    AgentComposition, AgentPort, CapabilityInterface, ExecutionSnapshot, WorkflowDefinition,
};

pub use composition::CompositionEngine;
pub use directory::CapabilityDirectory;
pub use error::{EngineError, EngineResult};
pub use gateway::InvocationGateway;
pub use orchestrator::Orchestrator;

/// Everything one engine instance owns. Instances share nothing, so tests
/// can build as many as they like.
#[derive(Clone)]
pub struct Engine {
    pub directory: CapabilityDirectory,
    pub gateway: InvocationGateway,
    pub orchestrator: Orchestrator,
    pub compositions: CompositionEngine,
    pub metrics: Arc<EngineMetrics>,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> anyhow::Result<Self> {
        let metrics = Arc::new(EngineMetrics::new()?);
        let directory = CapabilityDirectory::new().with_metrics(metrics.clone());
        let gateway = InvocationGateway::new().with_metrics(metrics.clone());
        let orchestrator = Orchestrator::new(directory.clone(), gateway.clone(), settings.clone())
            .with_metrics(metrics.clone());
        let compositions = CompositionEngine::new(directory.clone(), gateway.clone(), settings)
            .with_metrics(metrics.clone());

        Ok(Self {
            directory,
            gateway,
            orchestrator,
            compositions,
            metrics,
        })
    }

    /// Engine seeded with the built-in fitness agents, workflows and compositions
    pub async fn with_builtin_catalog(settings: EngineSettings) -> anyhow::Result<Self> {
        let engine = Self::new(settings)?;
        engine.load_builtin_catalog().await?;
        Ok(engine)
    }

    /// Build from full settings: optional built-in catalog first, then the
    /// configured catalogs, which may override built-in entries by id
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let engine = Self::new(settings.engine.clone())?;
        if settings.engine.builtin_catalog {
            engine.load_builtin_catalog().await?;
        }
        engine
            .load_catalog(
                &settings.capabilities,
                &settings.agents,
                &settings.workflows,
                &settings.compositions,
            )
            .await?;
        Ok(engine)
    }

    pub async fn load_builtin_catalog(&self) -> anyhow::Result<()> {
        self.load_catalog(
            &catalog::interfaces(),
            &catalog::agents(),
            &catalog::workflows(),
            &catalog::compositions(),
        )
        .await
        .context("Failed to load built-in catalog")
    }

    async fn load_catalog(
        &self,
        interfaces: &[CapabilityInterface],
        agents: &[AgentConfig],
        workflows: &[WorkflowDefinition],
        compositions: &[AgentComposition],
    ) -> anyhow::Result<()> {
        for interface in interfaces {
            self.register_capability(interface.clone()).await;
        }
        for agent in agents {
            self.attach_agent(&agent.agent_id, Arc::new(MockAgent::from_config(agent)))
                .await;
        }
        for workflow in workflows {
            self.orchestrator
                .register_workflow(workflow.clone())
                .await
                .with_context(|| format!("Workflow '{}' rejected", workflow.workflow_id))?;
        }
        for composition in compositions {
            self.compositions
                .register_composition(composition.clone())
                .await
                .with_context(|| format!("Composition '{}' rejected", composition.composition_id))?;
        }
        tracing::info!(
            capabilities = interfaces.len(),
            agents = agents.len(),
            workflows = workflows.len(),
            compositions = compositions.len(),
            "Catalog loaded"
        );
        Ok(())
    }

    pub async fn register_capability(&self, interface: CapabilityInterface) {
        tracing::info!(
            agent_id = %interface.agent_id,
            capabilities = ?interface.capabilities,
            "Capability interface registered"
        );
        self.directory.register(interface).await;
    }

    /// Route invocations for `agent_id` to `agent`
    pub async fn attach_agent(&self, agent_id: &str, agent: Arc<dyn AgentPort>) {
        self.gateway.register_agent(agent_id, agent).await;
    }

    /// Workflow or composition execution with this id
    pub async fn get_execution_status(&self, execution_id: &str) -> Option<ExecutionSnapshot> {
        if let Some(execution) = self.orchestrator.get_execution(execution_id).await {
            return Some(ExecutionSnapshot::Workflow(execution));
        }
        self.compositions
            .get_execution(execution_id)
            .await
            .map(ExecutionSnapshot::Composition)
    }

    /// `Ok(false)` when the execution already reached a terminal status
    pub async fn cancel_execution(&self, execution_id: &str) -> EngineResult<bool> {
        if let Some(cancelled) = self.orchestrator.cancel_execution(execution_id).await {
            return Ok(cancelled);
        }
        self.compositions
            .cancel_execution(execution_id)
            .await
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionStatus, Payload};
    use serde_json::json;

    fn quick() -> EngineSettings {
        EngineSettings {
            retry_base_delay_ms: 1,
            feedback_interval_ms: 1,
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_builtin_workflows_run_to_completion() {
        let engine = Engine::with_builtin_catalog(quick()).await.unwrap();
        assert_eq!(engine.orchestrator.list_workflows().await.len(), 3);

        for workflow in engine.orchestrator.list_workflows().await {
            let execution = engine
                .orchestrator
                .execute_workflow(&workflow.workflow_id, Payload::new(), Some(json!({"user_id": "u1"})))
                .await
                .unwrap();
            assert_eq!(execution.status, ExecutionStatus::Completed, "{}", workflow.workflow_id);
            assert_eq!(execution.step_results.len(), workflow.step_count);
        }
    }

    #[tokio::test]
    async fn test_builtin_wellness_composition_folds_outputs() {
        let engine = Engine::with_builtin_catalog(quick()).await.unwrap();
        let input = json!({
            "user_exercise": "plank",
            "user_stability": 0.72,
            "user_goals": ["core_strength"]
        });

        let execution = engine
            .compositions
            .execute_composition("complete-wellness-analysis", input.as_object().cloned().unwrap())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.final_data["muscle_data"]["core"], json!(0.82));
        assert_eq!(execution.final_data["nutrition_recommendations"]["calories"], json!(2200));
        assert_eq!(
            execution.final_data["final_recommendations"],
            json!("Nice work on plank. Keep your core braced and breathe steadily.")
        );
    }

    #[tokio::test]
    async fn test_status_and_cancel_cover_both_kinds() {
        let engine = Engine::with_builtin_catalog(quick()).await.unwrap();
        let execution = engine
            .compositions
            .execute_composition("realtime-performance-optimization", Payload::new())
            .await
            .unwrap();

        let snapshot = engine.get_execution_status(&execution.execution_id).await.unwrap();
        assert!(matches!(snapshot, ExecutionSnapshot::Composition(_)));
        assert!(!engine.cancel_execution(&execution.execution_id).await.unwrap());
        assert!(matches!(
            engine.cancel_execution("missing").await,
            Err(EngineError::ExecutionNotFound(_))
        ));
        assert!(engine.get_execution_status("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_engines_are_isolated() {
        let seeded = Engine::with_builtin_catalog(quick()).await.unwrap();
        let empty = Engine::new(quick()).unwrap();
        assert_eq!(seeded.compositions.composition_count().await, 3);
        assert_eq!(empty.compositions.composition_count().await, 0);
        assert!(empty.directory.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_counted_but_not_enforced() {
        use crate::domain::{FieldKind, FieldSpec, Shape, Topology, WorkflowStep};
        use crate::orchestration::test_support::{interface, ScriptedAgent};

        let engine = Engine::new(quick()).unwrap();
        let mut strict = interface("sensor");
        strict.input_shape = Shape::default().field("exercise", FieldSpec::required(FieldKind::String));
        engine.register_capability(strict).await;
        engine.attach_agent("sensor", Arc::new(ScriptedAgent::new(0.0))).await;
        engine
            .orchestrator
            .register_workflow(WorkflowDefinition::new(
                "unshaped",
                Topology::Sequential,
                vec![WorkflowStep::new("read", "sensor", "analyze")],
            ))
            .await
            .unwrap();

        let execution = engine
            .orchestrator
            .execute_workflow("unshaped", Payload::new(), None)
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.step_results["read"].success);
        let mismatches = engine.metrics.shape_mismatches_total.with_label_values(&["sensor"]).get();
        assert!((mismatches - 1.0).abs() < f64::EPSILON);
        assert!(engine.metrics.encode().unwrap().contains("stride_shape_mismatches_total"));
    }
}
