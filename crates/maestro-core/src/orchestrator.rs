//! The orchestrator
//!
//! Owns the capability registry and every engine component:
//! - routes project-scale requests to the hierarchical planner
//! - plans and executes everything else as a flat staged plan
//! - aggregates task results into a single `CapabilityResult`
//! - hands feedback to the feedback loop
//!
//! Components are built independently and then wired back to the
//! orchestrator through weak references in a single post-construction step.
//!
//! Capabilities may call back into the orchestrator while executing. Such a
//! nested plan competes for the same worker pool, so a pool saturated with
//! capabilities that are all waiting on nested plans cannot make progress.
//! Size `max_workers` above the deepest nesting you expect.

use crate::capability::{Capability, CapabilityDirectory, CapabilityRegistry};
use crate::config::MaestroConfig;
use crate::context::{ExecutionContext, ProgressUpdate};
use crate::coordinator::Coordinator;
use crate::error::{ConfigError, MaestroError, PlanningError, RegistryError};
use crate::executor::{Executor, PlanProgress, PoolStats};
use crate::feedback::{FeedbackLoop, FeedbackOutcome, FeedbackRequest};
use crate::hierarchy::{ActiveProject, HierarchicalPlanner, Project, ProjectHistory};
use crate::planner::Planner;
use crate::types::{Bag, CapabilityResult, ExecutionPlan, PlanId, ProjectId, TaskResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Name aggregated results are attributed to
pub const COMPONENT: &str = "orchestrator";

/// The central orchestrator
#[derive(Debug)]
pub struct Orchestrator {
    config: MaestroConfig,
    registry: Arc<CapabilityRegistry>,
    planner: Planner,
    executor: Executor,
    feedback: FeedbackLoop,
    hierarchy: HierarchicalPlanner,
}

impl Orchestrator {
    /// Create an orchestrator with an empty registry
    ///
    /// # Errors
    /// `ConfigError::Invalid` if the configuration is out of range
    pub fn new(config: MaestroConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_registry(config, Arc::new(CapabilityRegistry::new()))
    }

    /// Create an orchestrator over an existing registry
    ///
    /// # Errors
    /// `ConfigError::Invalid` if the configuration is out of range
    pub fn with_registry(
        config: MaestroConfig,
        registry: Arc<CapabilityRegistry>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let orchestrator = Arc::new(Self {
            planner: Planner::new(&config),
            executor: Executor::new(&config),
            feedback: FeedbackLoop::new(&config),
            hierarchy: HierarchicalPlanner::new(&config),
            registry,
            config,
        });
        orchestrator.wire();

        tracing::info!(
            max_workers = orchestrator.config.max_workers,
            capabilities = orchestrator.registry.len(),
            "orchestrator ready"
        );
        Ok(orchestrator)
    }

    fn wire(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let weak: Weak<dyn Coordinator> = weak;
        self.planner.set_coordinator(weak.clone());
        self.executor.set_coordinator(weak.clone());
        self.feedback.set_coordinator(weak.clone());
        self.hierarchy.set_coordinator(weak);
    }

    /// Register a capability under its own name
    ///
    /// # Errors
    /// `RegistryError::Duplicate` if the name is already taken
    pub fn register_capability(&self, capability: Arc<dyn Capability>) -> Result<(), RegistryError> {
        self.registry.register(capability)
    }

    #[must_use]
    pub fn capability(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.registry.lookup(name)
    }

    /// Registered capability names in registration order
    #[must_use]
    pub fn capabilities(&self) -> Vec<String> {
        self.registry.names()
    }

    #[must_use]
    pub fn config(&self) -> &MaestroConfig {
        &self.config
    }

    #[must_use]
    pub fn feedback(&self) -> &FeedbackLoop {
        &self.feedback
    }

    #[must_use]
    pub fn hierarchy(&self) -> &HierarchicalPlanner {
        &self.hierarchy
    }

    /// Whether `request` is routed to the hierarchical planner
    #[must_use]
    pub fn is_project_level_request(&self, request: &str) -> bool {
        self.planner.is_project_level_request(request)
    }

    /// Execute a request end to end
    ///
    /// # Errors
    /// - `MaestroError::Cancelled` if `cancel` fired before work started
    /// - `MaestroError::Planning` for structural planning failures
    ///
    /// Task failures are reported in the result, never as errors.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        request: &str,
        options: Bag,
    ) -> Result<CapabilityResult, MaestroError> {
        let context = ExecutionContext::new(request).with_options(options);
        self.execute_in(cancel, request, Arc::new(context)).await
    }

    /// [`Orchestrator::execute`], reporting task progress to `sink`
    ///
    /// Updates are best effort; they are dropped when the sink is full.
    ///
    /// # Errors
    /// See [`Orchestrator::execute`]
    pub async fn execute_with_progress(
        &self,
        cancel: &CancellationToken,
        request: &str,
        options: Bag,
        sink: mpsc::Sender<ProgressUpdate>,
    ) -> Result<CapabilityResult, MaestroError> {
        let context = ExecutionContext::new(request)
            .with_options(options)
            .with_progress(sink);
        self.execute_in(cancel, request, Arc::new(context)).await
    }

    /// Progress channel sized by `progress_buffer`
    #[must_use]
    pub fn progress_channel(&self) -> (mpsc::Sender<ProgressUpdate>, mpsc::Receiver<ProgressUpdate>) {
        mpsc::channel(self.config.progress_buffer)
    }

    /// Execute `request` within an existing context
    ///
    /// # Errors
    /// See [`Orchestrator::execute`]
    pub async fn execute_in(
        &self,
        cancel: &CancellationToken,
        request: &str,
        context: Arc<ExecutionContext>,
    ) -> Result<CapabilityResult, MaestroError> {
        if cancel.is_cancelled() {
            return Err(MaestroError::Cancelled);
        }
        if request.trim().is_empty() {
            return Err(PlanningError::EmptyRequest.into());
        }

        let started_at = Utc::now();
        if self.planner.is_project_level_request(request) {
            tracing::info!(request_id = %context.request_id(), "routing to hierarchical planner");
            return Ok(self.hierarchy.run(cancel, request, context).await?);
        }

        let plan = self.planner.create_execution_plan(request, &context)?;
        let results = self.executor.execute_plan(cancel, &plan, &context).await?;
        Ok(aggregate(&plan, &results, &context, started_at))
    }

    /// Build a flat plan for `request` without executing it
    ///
    /// # Errors
    /// Any `PlanningError`
    pub fn plan(&self, request: &str) -> Result<ExecutionPlan, PlanningError> {
        let context = ExecutionContext::new(request);
        self.planner.create_execution_plan(request, &context)
    }

    /// Build a project hierarchy for `request` without executing it
    ///
    /// # Errors
    /// Any `PlanningError`
    pub fn plan_project(&self, request: &str, options: Bag) -> Result<Project, PlanningError> {
        let execution = Arc::new(ExecutionContext::new(request).with_options(options));
        let context = self.hierarchy.project_context(request, execution);
        self.hierarchy.plan_project(request, context)
    }

    /// Hand a feedback request to the feedback loop
    ///
    /// # Errors
    /// `MaestroError::Feedback` for unknown types, mismatched payloads or
    /// failed corrective actions
    pub async fn process_feedback(
        &self,
        cancel: &CancellationToken,
        request: &FeedbackRequest,
    ) -> Result<FeedbackOutcome, MaestroError> {
        Ok(self.feedback.process_feedback(cancel, request).await?)
    }

    #[must_use]
    pub fn progress(&self, plan_id: PlanId) -> Option<PlanProgress> {
        self.executor.progress().get_progress(plan_id)
    }

    #[must_use]
    pub fn project_history(&self, id: ProjectId) -> Option<ProjectHistory> {
        self.hierarchy.history(id)
    }

    #[must_use]
    pub fn active_projects(&self) -> Vec<ActiveProject> {
        self.hierarchy.active_projects()
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.executor.pool().stats()
    }

    /// Stop accepting work and drain the worker pool
    pub async fn shutdown(&self) {
        tracing::info!("shutting down orchestrator");
        self.executor.shutdown().await;
    }
}

impl CapabilityDirectory for Orchestrator {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.registry.lookup(name)
    }
}

#[async_trait]
impl Coordinator for Orchestrator {
    async fn execute_with_plan(
        &self,
        cancel: &CancellationToken,
        plan: &ExecutionPlan,
        context: &Arc<ExecutionContext>,
    ) -> Result<Vec<TaskResult>, MaestroError> {
        self.executor.execute_plan(cancel, plan, context).await
    }
}

/// Fold task results into one result; success is the AND of all tasks
fn aggregate(
    plan: &ExecutionPlan,
    results: &[TaskResult],
    context: &ExecutionContext,
    started_at: DateTime<Utc>,
) -> CapabilityResult {
    let successful = results.iter().filter(|r| r.is_success()).count();
    let failed = results.len() - successful;
    let summary = format!(
        "Executed {} tasks ({successful} successful, {failed} failed)",
        results.len()
    );
    let details = results
        .iter()
        .map(|r| format!("[{}]: {}", r.task.capability, r.result.details))
        .collect::<Vec<_>>()
        .join("\n\n");

    let state = context.snapshot();
    let files: Vec<String> = state.files.iter().map(|f| f.path.clone()).collect();
    let tools: Vec<String> = results
        .iter()
        .flat_map(|r| r.result.metadata.tools_used.iter().cloned())
        .collect();

    let base = if failed == 0 {
        CapabilityResult::success(COMPONENT, summary)
    } else {
        CapabilityResult::failure(COMPONENT, summary, String::new())
    };
    base.with_details(details)
        .with_artifact("plan_id", serde_json::Value::String(plan.id.to_string()))
        .with_artifact(
            "shared_data",
            serde_json::Value::Object(state.shared_data.into_iter().collect()),
        )
        .with_artifact("files", serde_json::Value::from(files.clone()))
        .with_files(files)
        .with_tools(tools)
        .timed(started_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProgressStatus;
    use crate::error::CapabilityError;
    use crate::feedback::{FeedbackPayload, FeedbackType};
    use crate::hierarchy::ProjectStatus;
    use crate::types::{CapabilityRequest, TaskId};
    use pretty_assertions::assert_eq;

    struct Stub {
        name: &'static str,
        succeed: bool,
    }

    #[async_trait]
    impl Capability for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn can_handle(&self, _text: &str) -> (bool, f64) {
            (true, 0.5)
        }

        async fn execute(
            &self,
            _cancel: &CancellationToken,
            request: CapabilityRequest,
        ) -> Result<CapabilityResult, CapabilityError> {
            if self.succeed {
                Ok(CapabilityResult::success(self.name, "done")
                    .with_details(format!("handled {}", request.prompt))
                    .with_files(["src/lib.rs"]))
            } else {
                Ok(CapabilityResult::failure(self.name, "failed", "could not handle"))
            }
        }
    }

    fn orchestrator(failing: &[&'static str]) -> Arc<Orchestrator> {
        let orchestrator = Orchestrator::new(MaestroConfig::default()).unwrap();
        for name in [
            "file_operations",
            "code_analysis",
            "code_review",
            "search",
            "dispatcher",
        ] {
            orchestrator
                .register_capability(Arc::new(Stub {
                    name,
                    succeed: !failing.contains(&name),
                }))
                .unwrap();
        }
        orchestrator
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let orchestrator = orchestrator(&[]);
        let err = orchestrator
            .register_capability(Arc::new(Stub {
                name: "search",
                succeed: true,
            }))
            .unwrap_err();

        assert_eq!(err.to_string(), "capability search already registered");
        assert_eq!(orchestrator.capabilities().len(), 5);
        assert!(orchestrator.capability("search").is_some());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Orchestrator::new(MaestroConfig::default().with_max_workers(0)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[tokio::test]
    async fn components_reach_back_through_weak_links() {
        let orchestrator = orchestrator(&[]);
        let result = orchestrator
            .execute(&CancellationToken::new(), "review src/auth.rs", Bag::new())
            .await
            .unwrap();
        assert!(result.success);

        let weak: Weak<Orchestrator> = Arc::downgrade(&orchestrator);
        assert_eq!(Arc::strong_count(&orchestrator), 1);
        drop(orchestrator);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn aggregates_code_review_plan() {
        let orchestrator = orchestrator(&[]);
        let result = orchestrator
            .execute(&CancellationToken::new(), "review src/auth.rs", Bag::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.summary, "Executed 3 tasks (3 successful, 0 failed)");
        assert!(result.details.starts_with("[file_operations]: handled"));
        assert_eq!(result.details.matches("\n\n").count(), 2);
        assert_eq!(result.artifacts["files"], serde_json::json!(["src/lib.rs"]));
        assert!(result.artifacts["shared_data"].is_object());

        let plan_id: PlanId = PlanId(
            result.artifacts["plan_id"]
                .as_str()
                .unwrap()
                .parse()
                .unwrap(),
        );
        let progress = orchestrator.progress(plan_id).unwrap();
        assert!(progress.completed);
        assert_eq!(progress.completed_tasks, 3);
    }

    #[tokio::test]
    async fn one_failed_task_fails_the_request() {
        let orchestrator = orchestrator(&["code_analysis"]);
        let result = orchestrator
            .execute(&CancellationToken::new(), "review src/auth.rs", Bag::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.summary, "Executed 3 tasks (2 successful, 1 failed)");
    }

    #[tokio::test]
    async fn progress_updates_reach_the_sink() {
        let orchestrator = orchestrator(&[]);
        let (tx, mut rx) = orchestrator.progress_channel();

        orchestrator
            .execute_with_progress(&CancellationToken::new(), "search for TODO", Bag::new(), tx)
            .await
            .unwrap();

        let mut statuses = Vec::new();
        while let Ok(update) = rx.try_recv() {
            statuses.push(update.status);
        }
        assert_eq!(statuses, vec![ProgressStatus::Started, ProgressStatus::Completed]);
    }

    #[tokio::test]
    async fn project_requests_go_to_the_hierarchy() {
        let orchestrator = orchestrator(&[]);
        let result = orchestrator
            .execute(
                &CancellationToken::new(),
                "Build the backend service for the billing project",
                Bag::new(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.metadata.capability, crate::hierarchy::COMPONENT);
        let id = ProjectId(
            result.artifacts["project_id"]
                .as_str()
                .unwrap()
                .parse()
                .unwrap(),
        );
        let history = orchestrator.project_history(id).unwrap();
        assert_eq!(history.project.status, ProjectStatus::Completed);
        assert!(orchestrator.active_projects().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let orchestrator = orchestrator(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .execute(&cancel, "search for TODO", Bag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MaestroError::Cancelled));
    }

    #[tokio::test]
    async fn empty_request_is_fatal() {
        let orchestrator = orchestrator(&[]);
        let err = orchestrator
            .execute(&CancellationToken::new(), "  ", Bag::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn unknown_feedback_is_an_error() {
        let orchestrator = orchestrator(&[]);
        let request = FeedbackRequest::new(
            TaskId::new(),
            TaskId::new(),
            FeedbackType::Unrecognized("escalate".into()),
            FeedbackPayload::None,
            Arc::new(ExecutionContext::new("x")),
        );

        let err = orchestrator
            .process_feedback(&CancellationToken::new(), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, MaestroError::Feedback(_)));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let orchestrator = orchestrator(&[]);
        orchestrator.shutdown().await;

        let result = orchestrator
            .execute(&CancellationToken::new(), "search for TODO", Bag::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.details.contains("no worker available"));
    }
}
