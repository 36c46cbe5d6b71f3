//! Stage leveling
//!
//! Level-order topological sort: each pass collects every unplaced node whose
//! dependencies are all placed. Nodes that can never be placed (cycles,
//! dependencies outside the graph) fail the whole plan.

use crate::config::PlanningConfig;
use crate::context::ExecutionContext;
use crate::error::PlanningError;
use crate::planner::graph::{ExecutionGraph, NodeStatus};
use crate::types::{ExecutionPlan, PlanId, Stage, StageId, Task, TaskId};
use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;

/// Turns an execution graph into an ordered stage list
#[derive(Debug, Clone, Copy)]
pub struct PlanOptimizer {
    per_task: Duration,
    per_stage: Duration,
}

impl Default for PlanOptimizer {
    fn default() -> Self {
        Self::from_config(&PlanningConfig::default())
    }
}

impl PlanOptimizer {
    #[must_use]
    pub fn new(per_task: Duration, per_stage: Duration) -> Self {
        Self {
            per_task,
            per_stage,
        }
    }

    #[must_use]
    pub fn from_config(config: &PlanningConfig) -> Self {
        Self::new(
            Duration::from_secs(config.task_estimate_secs),
            Duration::from_secs(config.stage_estimate_secs),
        )
    }

    /// Level `graph` into an execution plan for `context`
    ///
    /// # Errors
    /// `PlanningError::UnplaceableTasks` when leveling leaves nodes behind
    pub fn optimize(
        &self,
        graph: ExecutionGraph,
        context: &ExecutionContext,
    ) -> Result<ExecutionPlan, PlanningError> {
        let plan = self.level(graph)?;
        tracing::debug!(
            request_id = %context.request_id(),
            plan_id = %plan.id,
            tasks = plan.tasks.len(),
            stages = plan.stages.len(),
            "optimized plan"
        );
        Ok(plan)
    }

    /// Level a graph without an owning context
    ///
    /// # Errors
    /// `PlanningError::UnplaceableTasks` when leveling leaves nodes behind
    pub fn level(&self, mut graph: ExecutionGraph) -> Result<ExecutionPlan, PlanningError> {
        let mut placed: HashSet<TaskId> = HashSet::with_capacity(graph.len());
        let mut stages: Vec<Stage> = Vec::new();

        loop {
            let ready: Vec<TaskId> = graph
                .nodes()
                .filter(|node| node.status == NodeStatus::Pending)
                .filter(|node| node.dependencies.iter().all(|dep| placed.contains(dep)))
                .map(|node| node.task.id)
                .collect();
            if ready.is_empty() {
                break;
            }

            let stage_id = StageId(stages.len());
            for id in &ready {
                if let Some(node) = graph.node_mut(*id) {
                    node.status = NodeStatus::Staged;
                    node.task.stage = Some(stage_id);
                }
                placed.insert(*id);
            }
            stages.push(Stage {
                id: stage_id,
                tasks: ready,
            });
        }

        if placed.len() < graph.len() {
            let leftover: Vec<String> = graph
                .nodes()
                .filter(|node| node.status == NodeStatus::Pending)
                .map(|node| node.task.id.to_string())
                .collect();
            tracing::error!(unplaced = leftover.len(), "cycle or dangling dependency in graph");
            return Err(PlanningError::UnplaceableTasks {
                count: leftover.len(),
                ids: leftover.join(", "),
            });
        }

        let tasks = graph.into_tasks();
        let estimated_duration = self.estimate(tasks.len(), stages.len());
        Ok(ExecutionPlan {
            id: PlanId::new(),
            tasks,
            stages,
            created_at: Utc::now(),
            estimated_duration,
        })
    }

    /// Rough estimate: a constant per task plus a constant per stage
    #[must_use]
    pub fn estimate(&self, tasks: usize, stages: usize) -> Duration {
        let tasks = u32::try_from(tasks).unwrap_or(u32::MAX);
        let stages = u32::try_from(stages).unwrap_or(u32::MAX);
        self.per_task
            .saturating_mul(tasks)
            .saturating_add(self.per_stage.saturating_mul(stages))
    }
}

impl ExecutionPlan {
    /// Build a plan directly from tasks whose dependencies reference each
    /// other, using the default estimate constants
    ///
    /// # Errors
    /// `PlanningError::UnplaceableTasks` on cycles or unknown dependencies
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, PlanningError> {
        PlanOptimizer::default().level(ExecutionGraph::from_tasks(tasks))
    }
}
