//! Workflow execution strategies, one per topology
//!
//! - Sequential: dependency order, first failure aborts the run
//! - Parallel: dependency levels fanned out, failures isolated per step
//! - Hierarchical: role tiers, each tier a fan-out/fan-in barrier
//! - Conditional (and Hybrid): declaration order (dependencies first), false predicates skip

mod conditional;
mod hierarchical;
mod parallel;
mod sequential;

pub use conditional::ConditionalStrategy;
pub use hierarchical::HierarchicalStrategy;
pub use parallel::ParallelStrategy;
pub use sequential::SequentialStrategy;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::{Payload, StepResult, Topology, WorkflowDefinition, WorkflowExecution, WorkflowStep};
use crate::orchestration::budget::CostLedger;
use crate::orchestration::conditions::ConditionEvaluator;
use crate::orchestration::context;
use crate::orchestration::directory::CapabilityDirectory;
use crate::orchestration::error::{EngineError, EngineResult};
use crate::orchestration::retry::{StepCall, StepRunner};
use crate::orchestration::store::ExecutionHandle;

/// Everything one workflow execution needs while it runs
pub struct WorkflowRun {
    pub definition: Arc<WorkflowDefinition>,
    pub input: Payload,
    pub user_context: Option<Value>,
    pub session_id: Option<String>,
    pub handle: ExecutionHandle<WorkflowExecution>,
    pub ledger: CostLedger,
    pub runner: StepRunner,
    pub conditions: Arc<ConditionEvaluator>,
    pub directory: CapabilityDirectory,
    /// Steps dispatched to the gateway whose result is not recorded yet
    pub in_flight: Mutex<BTreeSet<String>>,
}

impl WorkflowRun {
    /// Strategies call this before dispatching anything new
    pub fn ensure_active(&self) -> EngineResult<()> {
        if self.handle.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn results(&self) -> BTreeMap<String, StepResult> {
        self.handle.record.read().await.step_results.clone()
    }

    /// `Some(skipped)` when the step's conditions do not hold
    pub fn check_conditions(
        &self,
        step: &WorkflowStep,
        results: &BTreeMap<String, StepResult>,
    ) -> Option<StepResult> {
        let conditions = step.conditions.as_ref()?;
        match self.conditions.evaluate(conditions, &self.input, results) {
            Ok(true) => None,
            Ok(false) => Some(StepResult::skipped("conditions not met")),
            Err(reason) => {
                tracing::warn!(step_id = %step.step_id, %reason, "Condition could not be evaluated");
                Some(StepResult::skipped(reason))
            }
        }
    }

    /// Build the step payload from current results and run it with retries
    pub async fn run_step(&self, step: &WorkflowStep, results: &BTreeMap<String, StepResult>) -> StepResult {
        let call = StepCall {
            step_id: step.step_id.clone(),
            agent_id: step.agent_id.clone(),
            capability: step.capability.clone(),
            input: context::step_input(step, &self.input, self.user_context.as_ref(), results),
            timeout_ms: step.timeout_ms,
            retry_count: step.retry_count,
            session_id: self.session_id.clone(),
        };
        tracing::info!(
            workflow_id = %self.definition.workflow_id,
            step_id = %step.step_id,
            agent_id = %step.agent_id,
            "Dispatching step"
        );
        self.directory.check_input(&step.agent_id, &call.input).await;
        self.in_flight.lock().await.insert(step.step_id.clone());
        self.runner.run(&call, &self.handle.cancel).await
    }

    /// Store a settled result and charge its cost. Results are kept even
    /// after cancellation; an overrun is reported once the result is stored.
    pub async fn record(&self, step_id: &str, result: StepResult) -> EngineResult<()> {
        let charged = self.ledger.charge(result.cost);
        self.in_flight.lock().await.remove(step_id);
        {
            let mut record = self.handle.record.write().await;
            record.step_results.insert(step_id.to_string(), result);
            record.total_cost = self.ledger.spent();
        }
        if let Err(e) = &charged {
            tracing::warn!(
                workflow_id = %self.definition.workflow_id,
                step_id,
                cost = self.ledger.spent(),
                "{}",
                e
            );
        }
        charged.map(|_| ())
    }

    /// Run `steps` concurrently and wait for all of them to settle.
    /// Each result is recorded as soon as its step settles; a budget overrun
    /// is reported once the whole level is in.
    pub async fn run_level(&self, steps: &[&WorkflowStep]) -> EngineResult<()> {
        self.ensure_active()?;
        let results = self.results().await;

        let mut first_error = None;
        let mut pending = FuturesUnordered::new();
        for step in steps {
            match self.check_conditions(step, &results) {
                Some(skipped) => {
                    if let Err(e) = self.record(&step.step_id, skipped).await {
                        first_error.get_or_insert(e);
                    }
                }
                None => {
                    let results = &results;
                    pending.push(async move { (step.step_id.as_str(), self.run_step(step, results).await) });
                }
            }
        }

        while let Some((step_id, result)) = pending.next().await {
            if let Err(e) = self.record(step_id, result).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Record a failed result for every step still waiting on its agent.
    /// Used when the run is abandoned with those calls outstanding.
    pub async fn abandon_in_flight(&self, reason: &str) {
        let abandoned = std::mem::take(&mut *self.in_flight.lock().await);
        if abandoned.is_empty() {
            return;
        }
        let mut record = self.handle.record.write().await;
        for step_id in abandoned {
            tracing::warn!(workflow_id = %self.definition.workflow_id, %step_id, reason, "Step abandoned");
            record
                .step_results
                .entry(step_id)
                .or_insert_with(|| StepResult::failed(reason));
        }
    }
}

/// Pick the strategy for a topology and run it
pub async fn execute(run: &WorkflowRun) -> EngineResult<()> {
    match run.definition.topology {
        Topology::Sequential => SequentialStrategy::execute(run).await,
        Topology::Parallel => ParallelStrategy::execute(run).await,
        Topology::Hierarchical => HierarchicalStrategy::execute(run).await,
        Topology::Conditional | Topology::Hybrid => ConditionalStrategy::execute(run).await,
    }
}

/// Steps in `ids` order
pub(crate) fn steps_by_id<'a>(definition: &'a WorkflowDefinition, ids: &[String]) -> Vec<&'a WorkflowStep> {
    ids.iter().filter_map(|id| definition.step(id)).collect()
}
