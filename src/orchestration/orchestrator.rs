//! Orchestrator: registration and execution of workflow definitions
//!
//! Registration rejects anything that could fail structurally at run time
//! (unknown agents, unknown capabilities, cycles, bad conditions). Execution
//! drives one [`WorkflowRun`] through the strategy picked by the topology and
//! settles the record into a terminal status.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::adapters::metrics_handler::EngineMetrics;
use crate::config::validator::ValidationError;
use crate::config::EngineSettings;
use crate::domain::execution::ExecutionRecord;
use crate::domain::{
    CapabilityInterface, ExecutionStatus, ExecutionSummary, Payload, Topology, WorkflowDefinition,
    WorkflowExecution, WorkflowSummary,
};
use crate::orchestration::budget::CostLedger;
use crate::orchestration::conditions::ConditionEvaluator;
use crate::orchestration::directory::CapabilityDirectory;
use crate::orchestration::error::{EngineError, EngineResult};
use crate::orchestration::gateway::InvocationGateway;
use crate::orchestration::resolver::validate_graph;
use crate::orchestration::retry::StepRunner;
use crate::orchestration::store::{DefinitionStore, ExecutionStore};
use crate::orchestration::strategies::{self, WorkflowRun};

#[derive(Clone)]
pub struct Orchestrator {
    directory: CapabilityDirectory,
    workflows: DefinitionStore<WorkflowDefinition>,
    executions: ExecutionStore<WorkflowExecution>,
    runner: StepRunner,
    conditions: Arc<ConditionEvaluator>,
    settings: EngineSettings,
    metrics: Option<Arc<EngineMetrics>>,
}

impl Orchestrator {
    pub fn new(directory: CapabilityDirectory, gateway: InvocationGateway, settings: EngineSettings) -> Self {
        let runner = StepRunner::new(
            gateway,
            settings.caller_id.clone(),
            Duration::from_millis(settings.retry_base_delay_ms),
        );
        Self {
            directory,
            workflows: DefinitionStore::new(),
            executions: ExecutionStore::new(),
            runner,
            conditions: Arc::new(ConditionEvaluator::new()),
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.runner = self.runner.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Validate and store a definition. A definition with the same id is replaced.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> EngineResult<()> {
        let interfaces = self.directory.snapshot().await;
        let errors = validate_workflow(&definition, &interfaces, &self.conditions);
        if !errors.is_empty() {
            tracing::warn!(
                workflow_id = %definition.workflow_id,
                errors = errors.len(),
                "Workflow rejected"
            );
            return Err(EngineError::Validation(errors));
        }

        let workflow_id = definition.workflow_id.clone();
        let steps = definition.steps.len();
        let topology = definition.topology;
        if self.workflows.insert(workflow_id.clone(), definition).await {
            tracing::info!(%workflow_id, "Workflow replaced");
        } else {
            tracing::info!(%workflow_id, %topology, steps, "Workflow registered");
        }
        Ok(())
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowSummary> {
        self.workflows
            .list()
            .await
            .iter()
            .map(|w| WorkflowSummary::from(w.as_ref()))
            .collect()
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(workflow_id).await
    }

    pub async fn workflow_count(&self) -> usize {
        self.workflows.len().await
    }

    /// Run a workflow to a terminal status and return the settled record.
    /// Step failures, budget overruns and timeouts end up in the record;
    /// only an unknown workflow id is an error.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Payload,
        user_context: Option<Value>,
    ) -> EngineResult<WorkflowExecution> {
        let run = self.prepare(workflow_id, input, user_context).await?;
        Ok(self.drive(run).await)
    }

    /// Start a workflow on its own task and return its execution id at once
    pub async fn spawn_workflow(
        &self,
        workflow_id: &str,
        input: Payload,
        user_context: Option<Value>,
    ) -> EngineResult<(String, JoinHandle<WorkflowExecution>)> {
        let run = self.prepare(workflow_id, input, user_context).await?;
        let execution_id = run.session_id.clone().unwrap_or_default();
        let this = self.clone();
        let handle = tokio::spawn(async move { this.drive(run).await });
        Ok((execution_id, handle))
    }

    pub async fn get_execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.executions.snapshot(execution_id).await
    }

    /// `None` for unknown ids, `Some(false)` when the execution already settled
    pub async fn cancel_execution(&self, execution_id: &str) -> Option<bool> {
        self.executions.cancel(execution_id).await
    }

    pub async fn execution_count(&self) -> usize {
        self.executions.len().await
    }

    async fn prepare(
        &self,
        workflow_id: &str,
        input: Payload,
        user_context: Option<Value>,
    ) -> EngineResult<WorkflowRun> {
        let definition = self
            .workflows
            .get(workflow_id)
            .await
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let handle = self
            .executions
            .create(WorkflowExecution::new(execution_id.clone(), workflow_id.to_string()))
            .await;

        Ok(WorkflowRun {
            ledger: CostLedger::new(definition.cost_limit),
            definition,
            input,
            user_context,
            session_id: Some(execution_id),
            handle,
            runner: self.runner.clone(),
            conditions: self.conditions.clone(),
            directory: self.directory.clone(),
            in_flight: Default::default(),
        })
    }

    async fn drive(&self, run: WorkflowRun) -> WorkflowExecution {
        let execution_id = run.session_id.clone().unwrap_or_default();
        let workflow_id = run.definition.workflow_id.clone();
        run.handle.record.write().await.finish(ExecutionStatus::Running);
        if let Some(metrics) = &self.metrics {
            metrics.execution_started();
        }
        tracing::info!(
            %execution_id,
            %workflow_id,
            topology = %run.definition.topology,
            "Workflow execution started"
        );

        let global = run.definition.global_timeout_secs;
        let outcome = if self.settings.enforce_global_timeout && global > 0 {
            match timeout(Duration::from_secs(global), strategies::execute(&run)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    run.abandon_in_flight("global timeout").await;
                    Err(EngineError::GlobalTimeout(global))
                }
            }
        } else {
            strategies::execute(&run).await
        };

        let mut record = run.handle.record.write().await;
        let summary = ExecutionSummary::from_results(record.step_results.values(), run.definition.steps.len());
        record.summary = Some(summary);
        record.total_cost = run.ledger.spent();

        match outcome {
            Ok(()) => record.finish(ExecutionStatus::Completed),
            Err(EngineError::Cancelled) => record.finish(ExecutionStatus::Cancelled),
            Err(e) => {
                if record.status.can_transition_to(ExecutionStatus::Failed) {
                    record.set_error(e.to_string());
                    record.finish(ExecutionStatus::Failed);
                }
            }
        }

        tracing::info!(
            %execution_id,
            %workflow_id,
            status = %record.status,
            cost = record.total_cost,
            "Workflow execution finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.execution_finished("workflow", &record.status.to_string());
        }
        record.clone()
    }
}

/// Everything wrong with a definition, checked against the directory as it
/// stands at registration time
pub fn validate_workflow(
    definition: &WorkflowDefinition,
    interfaces: &HashMap<String, CapabilityInterface>,
    conditions: &ConditionEvaluator,
) -> Vec<ValidationError> {
    let owner = format!("workflow '{}'", definition.workflow_id);
    let mut errors = Vec::new();

    if definition.workflow_id.is_empty() {
        errors.push(ValidationError::MissingField("workflow_id".to_string()));
    }
    if definition.steps.is_empty() {
        errors.push(ValidationError::InvalidValue {
            field: format!("{}.steps", owner),
            reason: "must contain at least one step".to_string(),
        });
    }
    if let Some(limit) = definition.cost_limit {
        if limit.is_nan() || limit <= 0.0 {
            errors.push(ValidationError::InvalidValue {
                field: format!("{}.cost_limit", owner),
                reason: "must be positive".to_string(),
            });
        }
    }

    errors.extend(validate_graph(&owner, &definition.steps));

    for step in &definition.steps {
        let step_owner = format!("{}.{}", owner, step.step_id);
        match interfaces.get(&step.agent_id) {
            None => errors.push(ValidationError::UnknownAgent {
                owner: step_owner.clone(),
                agent_id: step.agent_id.clone(),
            }),
            Some(interface) if !interface.supports(&step.capability) => {
                errors.push(ValidationError::UnknownCapability {
                    owner: step_owner.clone(),
                    agent_id: step.agent_id.clone(),
                    capability: step.capability.clone(),
                })
            }
            Some(_) => {}
        }

        if let Some(step_conditions) = &step.conditions {
            for referenced in step_conditions.referenced_steps() {
                if definition.step(referenced).is_none() {
                    errors.push(ValidationError::UnknownDependency {
                        owner: step_owner.clone(),
                        dependency: referenced.clone(),
                    });
                }
            }
            if let Some(expression) = &step_conditions.expression {
                if let Err(reason) = conditions.check_expression(expression) {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("{}.conditions.expression", step_owner),
                        reason,
                    });
                }
            }
        }

        if definition.topology == Topology::Hierarchical {
            let role = step.effective_role();
            for dep in &step.depends_on {
                let Some(dep_step) = definition.step(dep) else {
                    continue;
                };
                if dep_step.effective_role().tier() > role.tier() {
                    errors.push(ValidationError::RoleOrder {
                        owner: step_owner.clone(),
                        role: role.to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
    }

    errors
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
