//! Staged plan execution
//!
//! Stages run strictly in order with a full barrier between them. Every task
//! unit of a stage is submitted to the bounded [`WorkerPool`], so the worker
//! count is the ceiling on concurrently running capabilities regardless of
//! stage width. A failing task is recorded in its [`TaskResult`] and never
//! aborts its stage or later stages.

pub mod dependency;
pub mod progress;
pub mod worker_pool;

pub use dependency::DependencyTracker;
pub use progress::{PlanProgress, ProgressTracker, TaskStatus};
pub use worker_pool::{PoolStats, WorkerPool};

use crate::capability::Capability;
use crate::config::MaestroConfig;
use crate::context::{ExecutionContext, ProgressStatus, ProgressUpdate};
use crate::coordinator::{Coordinator, CoordinatorLink};
use crate::error::{CapabilityError, MaestroError, PoolError, TaskExecutionError};
use crate::types::{CapabilityResult, ExecutionPlan, PlanId, Task, TaskId, TaskResult};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs execution plans stage by stage
#[derive(Debug)]
pub struct Executor {
    pool: Arc<WorkerPool>,
    progress: Arc<ProgressTracker>,
    coordinator: CoordinatorLink,
    default_timeout: Option<Duration>,
}

impl Executor {
    #[must_use]
    pub fn new(config: &MaestroConfig) -> Self {
        Self::with_parts(
            Arc::new(WorkerPool::new(
                config.max_workers,
                config.effective_queue_depth(),
            )),
            Arc::new(ProgressTracker::new()),
            config.default_task_timeout(),
        )
    }

    #[must_use]
    pub fn with_parts(
        pool: Arc<WorkerPool>,
        progress: Arc<ProgressTracker>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            pool,
            progress,
            coordinator: CoordinatorLink::new(),
            default_timeout,
        }
    }

    /// Wire the back-reference used to resolve capabilities
    pub fn set_coordinator(&self, coordinator: Weak<dyn Coordinator>) {
        if !self.coordinator.wire(coordinator) {
            tracing::warn!("executor coordinator already wired");
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    #[must_use]
    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Execute `plan` against `context`.
    ///
    /// Returns one `TaskResult` per planned task, in stage order. Per-task
    /// failures (missing capability, capability error, cancellation,
    /// timeout, unsatisfied dependencies) are captured in the results.
    ///
    /// # Errors
    /// `MaestroError::Planning` if the capability directory is unreachable
    pub async fn execute_plan(
        &self,
        cancel: &CancellationToken,
        plan: &ExecutionPlan,
        context: &Arc<ExecutionContext>,
    ) -> Result<Vec<TaskResult>, MaestroError> {
        let directory = self.coordinator.get()?;
        let tracker = DependencyTracker::from_plan(plan);
        let tasks: HashMap<TaskId, &Task> = plan.tasks.iter().map(|t| (t.id, t)).collect();

        tracing::info!(
            plan_id = %plan.id,
            tasks = plan.tasks.len(),
            stages = plan.stages.len(),
            "executing plan"
        );
        self.progress.start_plan(plan.id, plan.tasks.len());

        // a dependency counts as satisfied once it has executed, whatever its outcome
        let mut executed: HashMap<TaskId, bool> = HashMap::with_capacity(plan.tasks.len());
        let mut results = Vec::with_capacity(plan.tasks.len());

        for stage in &plan.stages {
            tracing::debug!(plan_id = %plan.id, stage = %stage.id, tasks = stage.tasks.len(), "starting stage");
            let mut pending = Vec::with_capacity(stage.tasks.len());

            for id in &stage.tasks {
                let Some(task) = tasks.get(id).copied() else {
                    tracing::warn!(plan_id = %plan.id, task_id = %id, "stage references unknown task");
                    continue;
                };

                let unsatisfied = tracker.unsatisfied(task.id, &executed);
                if !unsatisfied.is_empty() {
                    let ids: Vec<String> = unsatisfied.iter().map(ToString::to_string).collect();
                    tracing::warn!(plan_id = %plan.id, task_id = %task.id, missing = ?ids, "dependencies not executed");
                    results.push(self.refuse(
                        plan.id,
                        task,
                        TaskExecutionError::UnsatisfiedDependencies(ids.join(", ")),
                    ));
                    continue;
                }

                let unit = TaskUnit {
                    plan_id: plan.id,
                    task: task.clone(),
                    capability: directory.lookup(&task.capability),
                    context: Arc::clone(context),
                    progress: Arc::clone(&self.progress),
                    cancel: cancel.child_token(),
                    timeout: task.timeout.or(self.default_timeout),
                };
                match self.pool.run(unit.run()).await {
                    Ok(rx) => pending.push((task.clone(), rx)),
                    Err(err) => results.push(self.refuse(
                        plan.id,
                        task,
                        TaskExecutionError::WorkerUnavailable(err.to_string()),
                    )),
                }
            }

            let finished = join_all(pending.into_iter().map(|(task, rx)| async move {
                rx.await.map_err(|_| task)
            }))
            .await;

            for outcome in finished {
                let result = match outcome {
                    Ok(result) => result,
                    Err(task) => {
                        tracing::error!(plan_id = %plan.id, task_id = %task.id, "task unit dropped");
                        self.refuse(
                            plan.id,
                            &task,
                            TaskExecutionError::WorkerUnavailable(PoolError::JobDropped.to_string()),
                        )
                    }
                };
                executed.insert(result.task.id, true);
                results.push(result);
            }
            tracing::debug!(plan_id = %plan.id, stage = %stage.id, "stage finished");
        }

        self.progress.complete_plan(plan.id);
        let failed = results.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            plan_id = %plan.id,
            succeeded = results.len() - failed,
            failed,
            "plan finished"
        );
        Ok(results)
    }

    /// Stop accepting work and drain the worker pool
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    fn refuse(&self, plan_id: PlanId, task: &Task, error: TaskExecutionError) -> TaskResult {
        self.progress.complete_task(plan_id, task.id, false);
        TaskResult::failed(task.clone(), error)
    }
}

/// Everything one pool job needs to run a single task
struct TaskUnit {
    plan_id: PlanId,
    task: Task,
    capability: Option<Arc<dyn Capability>>,
    context: Arc<ExecutionContext>,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl TaskUnit {
    async fn run(self) -> TaskResult {
        let started_at = Utc::now();
        self.progress.start_task(self.plan_id, self.task.id);
        self.context.emit_progress(ProgressUpdate::new(
            self.plan_id,
            &self.task,
            ProgressStatus::Started,
        ));

        let mut result = match self.invoke().await {
            Ok(result) => {
                self.context.absorb_result(&self.task, &result);
                TaskResult {
                    task: self.task.clone(),
                    result,
                    error: None,
                    started_at,
                    ended_at: Utc::now(),
                }
            }
            Err(error) => {
                tracing::warn!(
                    task_id = %self.task.id,
                    capability = %self.task.capability,
                    error = %error,
                    "task failed"
                );
                TaskResult::failed(self.task.clone(), error)
            }
        };
        result.started_at = started_at;
        result.ended_at = Utc::now();

        let success = result.is_success();
        self.progress
            .complete_task(self.plan_id, self.task.id, success);
        let status = if success {
            ProgressStatus::Completed
        } else {
            ProgressStatus::Failed
        };
        self.context
            .emit_progress(ProgressUpdate::new(self.plan_id, &self.task, status));
        result
    }

    async fn invoke(&self) -> Result<CapabilityResult, TaskExecutionError> {
        let name = &self.task.capability;
        if self.cancel.is_cancelled() {
            return Err(TaskExecutionError::Cancelled {
                capability: name.clone(),
            });
        }
        let capability = self
            .capability
            .clone()
            .ok_or_else(|| TaskExecutionError::CapabilityNotFound(name.clone()))?;

        let mut request = self.task.request.clone();
        request.context = self.context.request_context_for(&self.task.request.context);

        tracing::debug!(task_id = %self.task.id, capability = %name, "invoking capability");
        let execution = capability.execute(&self.cancel, request);
        let mut deadline_hit = false;
        let outcome = match self.timeout {
            None => execution.await,
            Some(timeout) => {
                tokio::pin!(execution);
                tokio::select! {
                    outcome = &mut execution => outcome,
                    () = tokio::time::sleep(timeout) => {
                        tracing::debug!(task_id = %self.task.id, ?timeout, "deadline elapsed, signalling capability");
                        deadline_hit = true;
                        self.cancel.cancel();
                        execution.await
                    }
                }
            }
        };

        outcome.map_err(|err| self.classify(err, deadline_hit))
    }

    fn classify(&self, err: CapabilityError, deadline_hit: bool) -> TaskExecutionError {
        let capability = self.task.capability.clone();
        match (err, self.timeout) {
            (_, Some(timeout)) if deadline_hit => TaskExecutionError::TimedOut {
                capability,
                timeout,
            },
            (CapabilityError::Cancelled, _) => TaskExecutionError::Cancelled { capability },
            (err, _) => TaskExecutionError::CapabilityFailed {
                capability,
                message: err.to_string(),
            },
        }
    }
}
