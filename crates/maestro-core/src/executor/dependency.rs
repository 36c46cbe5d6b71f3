//! Dependency gating for task units

use crate::types::{ExecutionPlan, TaskId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Answers whether a task's dependencies have completed.
///
/// Built fresh for each plan so state never leaks between plans.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    dependencies: RwLock<HashMap<TaskId, Vec<TaskId>>>,
}

impl DependencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker loaded from `plan`
    #[must_use]
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let tracker = Self::new();
        tracker.build_from_plan(plan);
        tracker
    }

    /// Replace the recorded dependencies with those of `plan`
    pub fn build_from_plan(&self, plan: &ExecutionPlan) {
        let mut deps = self.dependencies.write();
        deps.clear();
        for task in &plan.tasks {
            deps.insert(task.id, task.dependencies.clone());
        }
    }

    /// Record dependencies for one task
    pub fn record(&self, task: TaskId, dependencies: Vec<TaskId>) {
        self.dependencies.write().insert(task, dependencies);
    }

    /// True if every dependency of `task` maps to `true` in `completed`.
    /// A task with no recorded dependency list is always executable.
    #[must_use]
    pub fn can_execute(&self, task: TaskId, completed: &HashMap<TaskId, bool>) -> bool {
        self.unsatisfied(task, completed).is_empty()
    }

    /// Dependencies of `task` not yet completed
    #[must_use]
    pub fn unsatisfied(&self, task: TaskId, completed: &HashMap<TaskId, bool>) -> Vec<TaskId> {
        self.dependencies.read().get(&task).map_or_else(Vec::new, |deps| {
            deps.iter()
                .filter(|dep| !completed.get(dep).copied().unwrap_or(false))
                .copied()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gating_requires_every_dependency() {
        let tracker = DependencyTracker::new();
        let (dependent, dep1, dep2) = (TaskId::new(), TaskId::new(), TaskId::new());
        tracker.record(dependent, vec![dep1, dep2]);

        let mut completed = HashMap::from([(dep1, true), (dep2, false)]);
        assert!(!tracker.can_execute(dependent, &completed));
        assert_eq!(tracker.unsatisfied(dependent, &completed), vec![dep2]);

        completed.insert(dep2, true);
        assert!(tracker.can_execute(dependent, &completed));
    }

    #[test]
    fn unknown_task_is_executable() {
        let tracker = DependencyTracker::new();
        assert!(tracker.can_execute(TaskId::new(), &HashMap::new()));
    }
}
