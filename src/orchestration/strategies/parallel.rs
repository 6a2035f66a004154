use super::{steps_by_id, WorkflowRun};
use crate::orchestration::error::{EngineError, EngineResult};
use crate::orchestration::resolver::DependencyGraph;

/// Dependency levels in order; every step of a level runs concurrently and
/// the level settles before the next one starts. A failed step does not stop
/// its siblings or later levels.
pub struct ParallelStrategy;

impl ParallelStrategy {
    pub async fn execute(run: &WorkflowRun) -> EngineResult<()> {
        let graph = DependencyGraph::from_nodes(&run.definition.steps);
        let levels = graph.level_grouping().map_err(|e| EngineError::Validation(vec![e]))?;

        for (level, ids) in &levels {
            tracing::debug!(level, steps = ids.len(), "Running level");
            run.run_level(&steps_by_id(&run.definition, ids)).await?;
        }
        Ok(())
    }
}
