use super::{steps_by_id, WorkflowRun};
use crate::orchestration::error::{EngineError, EngineResult};
use crate::orchestration::resolver::DependencyGraph;

/// Steps one at a time in dependency order. The first failure aborts the
/// run; steps after it are never dispatched.
pub struct SequentialStrategy;

impl SequentialStrategy {
    pub async fn execute(run: &WorkflowRun) -> EngineResult<()> {
        let graph = DependencyGraph::from_nodes(&run.definition.steps);
        let order = graph.topological_order().map_err(|e| EngineError::Validation(vec![e]))?;

        for step in steps_by_id(&run.definition, &order) {
            run.ensure_active()?;
            let results = run.results().await;

            if let Some(skipped) = run.check_conditions(step, &results) {
                tracing::info!(step_id = %step.step_id, "Step skipped");
                run.record(&step.step_id, skipped).await?;
                continue;
            }

            let result = run.run_step(step, &results).await;
            let failure = (!result.success).then(|| result.error.clone().unwrap_or_default());
            run.record(&step.step_id, result).await?;

            if let Some(reason) = failure {
                return Err(EngineError::StepFailed {
                    step_id: step.step_id.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }
}
