use super::{steps_by_id, WorkflowRun};
use crate::orchestration::error::{EngineError, EngineResult};
use crate::orchestration::resolver::DependencyGraph;

/// Declaration order, one step at a time, with dependencies pulled ahead of
/// their dependents. A step whose conditions do not hold is recorded as
/// skipped; failures never stop the run.
pub struct ConditionalStrategy;

impl ConditionalStrategy {
    pub async fn execute(run: &WorkflowRun) -> EngineResult<()> {
        let graph = DependencyGraph::from_nodes(&run.definition.steps);
        let order = graph.topological_order().map_err(|e| EngineError::Validation(vec![e]))?;
        for step in steps_by_id(&run.definition, &order) {
            run.ensure_active()?;
            let results = run.results().await;

            let result = match run.check_conditions(step, &results) {
                Some(skipped) => {
                    tracing::info!(step_id = %step.step_id, "Conditions not met, skipping");
                    skipped
                }
                None => run.run_step(step, &results).await,
            };
            run.record(&step.step_id, result).await?;
        }
        Ok(())
    }
}
