//! Per-plan progress bookkeeping for external observers
//!
//! Purely additive: the executor reports into it, nothing reads it back for
//! control decisions.

use crate::types::{PlanId, TaskId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of one task within a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Progress record for one plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub plan_id: PlanId,
    pub total_tasks: usize,
    /// Tasks that finished, successfully or not
    pub completed_tasks: usize,
    /// Subset of `completed_tasks` that failed
    pub failed_tasks: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Set by [`ProgressTracker::complete_plan`]
    pub completed: bool,
    pub task_status: HashMap<TaskId, TaskStatus>,
}

impl PlanProgress {
    fn new(plan_id: PlanId, total_tasks: usize) -> Self {
        Self {
            plan_id,
            total_tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            started_at: Utc::now(),
            ended_at: None,
            completed: false,
            task_status: HashMap::new(),
        }
    }

    /// Finished fraction in `0.0..=1.0`
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total_tasks == 0 {
            return if self.completed { 1.0 } else { 0.0 };
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = self.completed_tasks as f64 / self.total_tasks as f64;
        fraction.min(1.0)
    }
}

/// Concurrent progress store, one record per plan id
#[derive(Debug, Default)]
pub struct ProgressTracker {
    plans: DashMap<PlanId, PlanProgress>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reset) the record for `plan_id`
    pub fn start_plan(&self, plan_id: PlanId, total_tasks: usize) {
        self.plans
            .insert(plan_id, PlanProgress::new(plan_id, total_tasks));
    }

    pub fn start_task(&self, plan_id: PlanId, task_id: TaskId) {
        if let Some(mut progress) = self.plans.get_mut(&plan_id) {
            progress.task_status.insert(task_id, TaskStatus::Running);
        }
    }

    /// Mark a task finished. Repeated calls for the same task count once.
    pub fn complete_task(&self, plan_id: PlanId, task_id: TaskId, success: bool) {
        let Some(mut progress) = self.plans.get_mut(&plan_id) else {
            return;
        };
        let status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let previous = progress.task_status.insert(task_id, status);
        if previous.map_or(false, TaskStatus::is_terminal) {
            return;
        }
        progress.completed_tasks += 1;
        if !success {
            progress.failed_tasks += 1;
        }
    }

    pub fn complete_plan(&self, plan_id: PlanId) {
        if let Some(mut progress) = self.plans.get_mut(&plan_id) {
            progress.completed = true;
            progress.ended_at = Some(Utc::now());
        }
    }

    /// Copy of the record for `plan_id`
    #[must_use]
    pub fn get_progress(&self, plan_id: PlanId) -> Option<PlanProgress> {
        self.plans.get(&plan_id).map(|p| p.clone())
    }

    #[must_use]
    pub fn task_status(&self, plan_id: PlanId, task_id: TaskId) -> Option<TaskStatus> {
        self.plans
            .get(&plan_id)
            .and_then(|p| p.task_status.get(&task_id).copied())
    }

    /// Drop the record for `plan_id`
    pub fn forget(&self, plan_id: PlanId) -> Option<PlanProgress> {
        self.plans.remove(&plan_id).map(|(_, p)| p)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_task_lifecycle() {
        let tracker = ProgressTracker::new();
        let plan = PlanId::new();
        let (a, b) = (TaskId::new(), TaskId::new());

        tracker.start_plan(plan, 2);
        tracker.start_task(plan, a);
        assert_eq!(tracker.task_status(plan, a), Some(TaskStatus::Running));

        tracker.complete_task(plan, a, true);
        tracker.complete_task(plan, a, true);
        tracker.start_task(plan, b);
        tracker.complete_task(plan, b, false);
        tracker.complete_plan(plan);

        let progress = tracker.get_progress(plan).unwrap();
        assert_eq!(progress.completed_tasks, 2);
        assert_eq!(progress.failed_tasks, 1);
        assert!(progress.completed);
        assert!(progress.ended_at.is_some());
        assert!((progress.fraction() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_plan_is_ignored() {
        let tracker = ProgressTracker::new();
        let plan = PlanId::new();
        tracker.start_task(plan, TaskId::new());
        tracker.complete_plan(plan);
        assert!(tracker.get_progress(plan).is_none());
        assert!(tracker.is_empty());
    }
}
