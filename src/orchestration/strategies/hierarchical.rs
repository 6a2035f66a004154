use super::{steps_by_id, WorkflowRun};
use crate::domain::{AgentRole, StepResult, WorkflowStep};
use crate::orchestration::error::{EngineError, EngineResult};
use crate::orchestration::resolver::DependencyGraph;

/// Role tiers in order: primary, secondary, validator, aggregator, fallback.
/// Each tier is a barrier and runs in dependency levels. Fallback steps only
/// run when an earlier step failed.
pub struct HierarchicalStrategy;

impl HierarchicalStrategy {
    pub async fn execute(run: &WorkflowRun) -> EngineResult<()> {
        let graph = DependencyGraph::from_nodes(&run.definition.steps);

        for role in AgentRole::TIERS {
            let tier: Vec<&WorkflowStep> = run
                .definition
                .steps
                .iter()
                .filter(|s| s.effective_role() == role)
                .collect();
            if tier.is_empty() {
                continue;
            }

            if role == AgentRole::Fallback && !Self::has_failure(run).await {
                for step in &tier {
                    run.record(&step.step_id, StepResult::skipped("fallback not needed"))
                        .await?;
                }
                continue;
            }

            let ids: Vec<String> = tier.iter().map(|s| s.step_id.clone()).collect();
            let levels = graph
                .subgraph(&ids)
                .level_grouping()
                .map_err(|e| EngineError::Validation(vec![e]))?;

            tracing::debug!(%role, steps = ids.len(), "Running tier");
            for ids in levels.values() {
                run.run_level(&steps_by_id(&run.definition, ids)).await?;
            }
        }
        Ok(())
    }

    async fn has_failure(run: &WorkflowRun) -> bool {
        run.results()
            .await
            .values()
            .any(|r| !r.success && !r.skipped)
    }
}
