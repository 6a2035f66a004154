//! Composition engine: free-form agent graphs with field mappings
//!
//! Shares the resolver, retry runner, cost ledger and condition evaluator
//! with the orchestrator. What it adds is mapping resolution between nodes,
//! stricter registration checks against the agents' declared shapes, and the
//! feedback loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::adapters::metrics_handler::EngineMetrics;
use crate::config::validator::ValidationError;
use crate::config::EngineSettings;
use crate::domain::composition::parse_source;
use crate::domain::execution::ExecutionRecord;
use crate::domain::{
    AgentComposition, AgentRole, CapabilityInterface, CompositionExecution, CompositionNode,
    CompositionSummary, CompositionType, ExecutionStatus, ExecutionSummary, Payload, StepResult,
};
use crate::orchestration::budget::CostLedger;
use crate::orchestration::conditions::ConditionEvaluator;
use crate::orchestration::context::CompositionContext;
use crate::orchestration::directory::CapabilityDirectory;
use crate::orchestration::error::{EngineError, EngineResult};
use crate::orchestration::gateway::InvocationGateway;
use crate::orchestration::resolver::{validate_graph, DependencyGraph, GraphNode};
use crate::orchestration::retry::{StepCall, StepRunner};
use crate::orchestration::store::{DefinitionStore, ExecutionHandle, ExecutionStore};

#[derive(Clone)]
pub struct CompositionEngine {
    directory: CapabilityDirectory,
    compositions: DefinitionStore<AgentComposition>,
    executions: ExecutionStore<CompositionExecution>,
    runner: StepRunner,
    conditions: Arc<ConditionEvaluator>,
    settings: EngineSettings,
    metrics: Option<Arc<EngineMetrics>>,
}

impl CompositionEngine {
    pub fn new(directory: CapabilityDirectory, gateway: InvocationGateway, settings: EngineSettings) -> Self {
        let runner = StepRunner::new(
            gateway,
            settings.caller_id.clone(),
            Duration::from_millis(settings.retry_base_delay_ms),
        );
        Self {
            directory,
            compositions: DefinitionStore::new(),
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

    pub async fn register_composition(&self, composition: AgentComposition) -> EngineResult<()> {
        let interfaces = self.directory.snapshot().await;
        let errors = validate_composition(&composition, &interfaces, &self.conditions);
        if !errors.is_empty() {
            tracing::warn!(
                composition_id = %composition.composition_id,
                errors = errors.len(),
                "Composition rejected"
            );
            return Err(EngineError::Validation(errors));
        }

        let composition_id = composition.composition_id.clone();
        let kind = composition.composition_type;
        let nodes = composition.nodes.len();
        self.compositions.insert(composition_id.clone(), composition).await;
        tracing::info!(%composition_id, composition_type = %kind, nodes, "Composition registered");
        Ok(())
    }

    pub async fn list_compositions(&self) -> Vec<CompositionSummary> {
        self.compositions
            .list()
            .await
            .iter()
            .map(|c| CompositionSummary::from(c.as_ref()))
            .collect()
    }

    pub async fn get_composition(&self, composition_id: &str) -> Option<Arc<AgentComposition>> {
        self.compositions.get(composition_id).await
    }

    pub async fn composition_count(&self) -> usize {
        self.compositions.len().await
    }

    /// Agents that expose any of `capabilities`, optionally sharing a tag
    pub async fn find_compatible_agents(
        &self,
        capabilities: &[String],
        tags: Option<&[String]>,
    ) -> Vec<CapabilityInterface> {
        self.directory.find_compatible(capabilities, tags).await
    }

    pub async fn execute_composition(
        &self,
        composition_id: &str,
        input: Payload,
    ) -> EngineResult<CompositionExecution> {
        let run = self.prepare(composition_id, input).await?;
        Ok(self.drive(run).await)
    }

    pub async fn spawn_composition(
        &self,
        composition_id: &str,
        input: Payload,
    ) -> EngineResult<(String, JoinHandle<CompositionExecution>)> {
        let run = self.prepare(composition_id, input).await?;
        let execution_id = run.execution_id.clone();
        let this = self.clone();
        let handle = tokio::spawn(async move { this.drive(run).await });
        Ok((execution_id, handle))
    }

    pub async fn get_execution(&self, execution_id: &str) -> Option<CompositionExecution> {
        self.executions.snapshot(execution_id).await
    }

    pub async fn cancel_execution(&self, execution_id: &str) -> Option<bool> {
        self.executions.cancel(execution_id).await
    }

    pub async fn execution_count(&self) -> usize {
        self.executions.len().await
    }

    async fn prepare(&self, composition_id: &str, input: Payload) -> EngineResult<CompositionRun> {
        let definition = self
            .compositions
            .get(composition_id)
            .await
            .ok_or_else(|| EngineError::CompositionNotFound(composition_id.to_string()))?;

        // Nodes without an explicit capability call the agent's primary one
        let interfaces = self.directory.snapshot().await;
        let capabilities = definition
            .nodes
            .iter()
            .map(|node| {
                let capability = node
                    .capability
                    .clone()
                    .or_else(|| {
                        interfaces
                            .get(&node.agent_id)
                            .and_then(|i| i.primary_capability())
                            .map(str::to_string)
                    })
                    .unwrap_or_default();
                (node.node_id.clone(), capability)
            })
            .collect();

        let execution_id = uuid::Uuid::new_v4().to_string();
        let handle = self
            .executions
            .create(CompositionExecution::new(execution_id.clone(), composition_id.to_string()))
            .await;

        Ok(CompositionRun {
            ledger: CostLedger::new(definition.cost_limit),
            context: Mutex::new(CompositionContext::new(input)),
            max_iterations: definition
                .max_iterations
                .unwrap_or(self.settings.max_feedback_iterations),
            feedback_interval: Duration::from_millis(self.settings.feedback_interval_ms),
            definition,
            capabilities,
            execution_id,
            handle,
            runner: self.runner.clone(),
            conditions: self.conditions.clone(),
            directory: self.directory.clone(),
        })
    }

    async fn drive(&self, run: CompositionRun) -> CompositionExecution {
        let composition_id = run.definition.composition_id.clone();
        run.handle.record.write().await.finish(ExecutionStatus::Running);
        if let Some(metrics) = &self.metrics {
            metrics.execution_started();
        }
        tracing::info!(
            execution_id = %run.execution_id,
            %composition_id,
            composition_type = %run.definition.composition_type,
            "Composition execution started"
        );

        let outcome = match run.definition.composition_type {
            CompositionType::SequentialChain => run.sequential_chain().await,
            CompositionType::ParallelEnsemble => run.parallel_ensemble().await,
            CompositionType::HierarchicalTree => run.hierarchical_tree().await,
            CompositionType::FeedbackLoop => run.feedback_loop().await,
            CompositionType::ConditionalBranch => run.conditional_branch().await,
        };

        let final_data = run.context.lock().await.data.clone();
        let mut record = run.handle.record.write().await;
        let summary = ExecutionSummary::from_results(record.node_results.values(), run.definition.nodes.len());
        record.summary = Some(summary);
        record.final_data = final_data;
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
            execution_id = %run.execution_id,
            %composition_id,
            status = %record.status,
            iterations = record.iterations,
            "Composition execution finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.execution_finished("composition", &record.status.to_string());
        }
        record.clone()
    }
}

/// State of one composition execution
struct CompositionRun {
    definition: Arc<AgentComposition>,
    /// node id -> capability actually invoked
    capabilities: HashMap<String, String>,
    execution_id: String,
    handle: ExecutionHandle<CompositionExecution>,
    context: Mutex<CompositionContext>,
    ledger: CostLedger,
    runner: StepRunner,
    conditions: Arc<ConditionEvaluator>,
    directory: CapabilityDirectory,
    max_iterations: u32,
    feedback_interval: Duration,
}

impl CompositionRun {
    fn ensure_active(&self) -> EngineResult<()> {
        if self.handle.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn order(&self) -> EngineResult<Vec<&CompositionNode>> {
        let order = DependencyGraph::from_nodes(&self.definition.nodes)
            .topological_order()
            .map_err(|e| EngineError::Validation(vec![e]))?;
        Ok(order.iter().filter_map(|id| self.definition.node(id)).collect())
    }

    async fn results(&self) -> BTreeMap<String, StepResult> {
        self.handle.record.read().await.node_results.clone()
    }

    /// Skip when conditions do not hold, otherwise resolve mappings and invoke
    async fn run_node(&self, node: &CompositionNode, results: &BTreeMap<String, StepResult>) -> StepResult {
        let (input, data) = {
            let context = self.context.lock().await;
            (context.node_input(node, results), context.data.clone())
        };

        if let Some(conditions) = &node.conditions {
            match self.conditions.evaluate(conditions, &data, results) {
                Ok(true) => {}
                Ok(false) => return StepResult::skipped("conditions not met"),
                Err(reason) => return StepResult::skipped(reason),
            }
        }

        let call = StepCall {
            step_id: node.node_id.clone(),
            agent_id: node.agent_id.clone(),
            capability: self.capabilities.get(&node.node_id).cloned().unwrap_or_default(),
            input,
            timeout_ms: node.timeout_ms,
            retry_count: node.retry_count,
            session_id: Some(self.execution_id.clone()),
        };
        tracing::info!(
            execution_id = %self.execution_id,
            node_id = %node.node_id,
            agent_id = %node.agent_id,
            role = %node.role,
            "Dispatching node"
        );
        self.directory.check_input(&node.agent_id, &call.input).await;
        self.runner.run(&call, &self.handle.cancel).await
    }

    async fn record(&self, node: &CompositionNode, result: StepResult) -> EngineResult<()> {
        let charged = self.ledger.charge(result.cost);
        let final_data = {
            let mut context = self.context.lock().await;
            context.record_output(node, &result);
            context.data.clone()
        };
        {
            let mut record = self.handle.record.write().await;
            record.node_results.insert(node.node_id.clone(), result);
            record.final_data = final_data;
            record.total_cost = self.ledger.spent();
        }
        if let Err(e) = &charged {
            tracing::warn!(execution_id = %self.execution_id, node_id = %node.node_id, "{}", e);
        }
        charged.map(|_| ())
    }

    /// Fan out `nodes`, wait for all, then record every result
    async fn run_level(&self, nodes: &[&CompositionNode]) -> EngineResult<()> {
        self.ensure_active()?;
        let results = self.results().await;
        let outcomes = join_all(nodes.iter().map(|node| self.run_node(node, &results))).await;

        let mut first_error = None;
        for (node, result) in nodes.iter().zip(outcomes) {
            if let Err(e) = self.record(node, result).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn run_levels(&self, ids: &[String]) -> EngineResult<()> {
        let levels = DependencyGraph::from_nodes(&self.definition.nodes)
            .subgraph(ids)
            .level_grouping()
            .map_err(|e| EngineError::Validation(vec![e]))?;
        for ids in levels.values() {
            let nodes: Vec<&CompositionNode> =
                ids.iter().filter_map(|id| self.definition.node(id)).collect();
            self.run_level(&nodes).await?;
        }
        Ok(())
    }

    /// Dependency order, outputs folded as they arrive. Fallback nodes run
    /// only while an earlier failure is unrecovered; one that succeeds
    /// recovers it. An unrecovered failure fails the execution.
    async fn sequential_chain(&self) -> EngineResult<()> {
        let mut unrecovered: Option<(String, String)> = None;

        for node in self.order()? {
            self.ensure_active()?;
            if node.role == AgentRole::Fallback && unrecovered.is_none() {
                self.record(node, StepResult::skipped("fallback not needed")).await?;
                continue;
            }

            let results = self.results().await;
            let result = self.run_node(node, &results).await;
            let failed = !result.success && !result.skipped;
            let error = result.error.clone().unwrap_or_default();
            self.record(node, result).await?;

            if node.role == AgentRole::Fallback {
                if !failed {
                    tracing::info!(node_id = %node.node_id, "Fallback recovered chain");
                    unrecovered = None;
                }
            } else if failed && unrecovered.is_none() {
                unrecovered = Some((node.node_id.clone(), error));
            }
        }

        match unrecovered {
            Some((step_id, reason)) => Err(EngineError::StepFailed { step_id, reason }),
            None => Ok(()),
        }
    }

    async fn parallel_ensemble(&self) -> EngineResult<()> {
        let ids: Vec<String> = self.definition.nodes.iter().map(|n| n.node_id.clone()).collect();
        self.run_levels(&ids).await
    }

    async fn hierarchical_tree(&self) -> EngineResult<()> {
        for role in AgentRole::TIERS {
            let ids: Vec<String> = self
                .definition
                .nodes
                .iter()
                .filter(|n| n.role == role)
                .map(|n| n.node_id.clone())
                .collect();
            if ids.is_empty() {
                continue;
            }

            if role == AgentRole::Fallback {
                let failed = self
                    .results()
                    .await
                    .values()
                    .any(|r| !r.success && !r.skipped);
                if !failed {
                    for node in self.definition.nodes.iter().filter(|n| n.role == role) {
                        self.record(node, StepResult::skipped("fallback not needed")).await?;
                    }
                    continue;
                }
            }

            tracing::debug!(%role, nodes = ids.len(), "Running tier");
            self.run_levels(&ids).await?;
        }
        Ok(())
    }

    /// Every node in dependency order per iteration until one pass has no
    /// failed node or the iteration cap is reached. Nodes read the latest
    /// results, so a dependent sees its dependencies' output from the same
    /// iteration. Skipped nodes do not hold back convergence.
    async fn feedback_loop(&self) -> EngineResult<()> {
        let order = self.order()?;
        let mut iteration = 0;

        while iteration < self.max_iterations {
            self.ensure_active()?;
            iteration += 1;
            let mut converged = true;

            for node in &order {
                self.ensure_active()?;
                let results = self.results().await;
                let result = self.run_node(node, &results).await;
                converged &= result.success || result.skipped;
                self.record(node, result).await?;
            }

            self.handle.record.write().await.iterations = iteration;
            if converged {
                tracing::info!(execution_id = %self.execution_id, iteration, "Feedback loop converged");
                return Ok(());
            }
            if iteration < self.max_iterations {
                tokio::select! {
                    _ = sleep(self.feedback_interval) => {}
                    _ = self.handle.cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }
        }

        tracing::warn!(
            execution_id = %self.execution_id,
            iterations = self.max_iterations,
            "Feedback loop reached iteration cap"
        );
        Ok(())
    }

    /// Dependency order; nodes whose conditions fail are skipped
    async fn conditional_branch(&self) -> EngineResult<()> {
        for node in self.order()? {
            self.ensure_active()?;
            let results = self.results().await;
            let result = self.run_node(node, &results).await;
            self.record(node, result).await?;
        }
        Ok(())
    }
}

/// Registration checks for a composition against the current directory
pub fn validate_composition(
    composition: &AgentComposition,
    interfaces: &HashMap<String, CapabilityInterface>,
    conditions: &ConditionEvaluator,
) -> Vec<ValidationError> {
    let owner = format!("composition '{}'", composition.composition_id);
    let mut errors = Vec::new();

    if composition.composition_id.is_empty() {
        errors.push(ValidationError::MissingField("composition_id".to_string()));
    }
    if composition.nodes.is_empty() {
        errors.push(ValidationError::InvalidValue {
            field: format!("{}.nodes", owner),
            reason: "must contain at least one node".to_string(),
        });
    }
    if let Some(limit) = composition.cost_limit {
        if limit.is_nan() || limit <= 0.0 {
            errors.push(ValidationError::InvalidValue {
                field: format!("{}.cost_limit", owner),
                reason: "must be positive".to_string(),
            });
        }
    }
    if composition.max_iterations == Some(0) {
        errors.push(ValidationError::InvalidValue {
            field: format!("{}.max_iterations", owner),
            reason: "must be at least 1".to_string(),
        });
    }

    errors.extend(validate_graph(&owner, &composition.nodes));

    for node in &composition.nodes {
        let node_owner = format!("{}.{}", owner, node.node_id);

        for (local, source) in &node.input_mapping {
            if let Err(reason) = parse_source(source) {
                errors.push(ValidationError::MalformedMapping {
                    owner: node_owner.clone(),
                    reason,
                });
            }
            if let Some(interface) = interfaces.get(&node.agent_id) {
                if !interface.input_shape.declares(local) {
                    errors.push(ValidationError::UndeclaredField {
                        owner: node_owner.clone(),
                        field: local.clone(),
                        agent_id: node.agent_id.clone(),
                    });
                }
            }
        }

        let Some(interface) = interfaces.get(&node.agent_id) else {
            errors.push(ValidationError::UnknownAgent {
                owner: node_owner,
                agent_id: node.agent_id.clone(),
            });
            continue;
        };

        match &node.capability {
            Some(capability) if !interface.supports(capability) => {
                errors.push(ValidationError::UnknownCapability {
                    owner: node_owner.clone(),
                    agent_id: node.agent_id.clone(),
                    capability: capability.clone(),
                });
            }
            None if interface.primary_capability().is_none() => {
                errors.push(ValidationError::InvalidValue {
                    field: format!("{}.capability", node_owner),
                    reason: format!("agent '{}' publishes no capabilities", node.agent_id),
                });
            }
            _ => {}
        }

        for result_key in node.output_mapping.values() {
            let field = result_key.split('.').next().unwrap_or_default();
            if result_key.is_empty() || !interface.output_shape.declares(field) {
                errors.push(ValidationError::UndeclaredField {
                    owner: node_owner.clone(),
                    field: result_key.clone(),
                    agent_id: node.agent_id.clone(),
                });
            }
        }

        if let Some(node_conditions) = &node.conditions {
            for referenced in node_conditions.referenced_steps() {
                if composition.node(referenced).is_none() {
                    errors.push(ValidationError::UnknownDependency {
                        owner: node_owner.clone(),
                        dependency: referenced.clone(),
                    });
                }
            }
            if let Some(expression) = &node_conditions.expression {
                if let Err(reason) = conditions.check_expression(expression) {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("{}.conditions.expression", node_owner),
                        reason,
                    });
                }
            }
        }

        if composition.composition_type == CompositionType::HierarchicalTree {
            for dep in node.dependencies() {
                if let Some(source) = composition.node(dep) {
                    if source.role.tier() > node.role.tier() {
                        errors.push(ValidationError::RoleOrder {
                            owner: node_owner.clone(),
                            role: node.role.to_string(),
                            dependency: dep.to_string(),
                        });
                    }
                }
            }
        }
    }

    errors
}

#[cfg(test)]
#[path = "composition_test.rs"]
mod composition_test;
