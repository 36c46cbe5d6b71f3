//! Feedback loop
//!
//! Every call to [`FeedbackLoop::process_feedback`] performs at most one
//! corrective action. Sub-plans run in a child context seeded from the
//! originating one; only their final outcome is written back, and nothing is
//! written when the action fails.

pub mod corrector;
pub mod learner;
pub mod validator;

pub use corrector::{AutoCorrector, Correction, CorrectionAction, CorrectionStrategy};
pub use learner::{Pattern, PatternLearner};
pub use validator::{ResultValidator, RuleVerdict, Suggestion, ValidationReport, ValidationRule};

use crate::config::MaestroConfig;
use crate::context::{ContextPropagator, ExecutionContext};
use crate::coordinator::{Coordinator, CoordinatorLink};
use crate::error::{FeedbackError, RegistryError, TaskExecutionError};
use crate::types::{
    Bag, CapabilityRequest, CapabilityResult, ExecutionPlan, FeedbackId, RetryMarker, Task, TaskId,
    TaskResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Priority given to tasks created by feedback handling
const FEEDBACK_PRIORITY: i32 = 10;

/// Feedback type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedbackType {
    NeedMoreContext,
    ValidationError,
    Retry,
    Refine,
    Correction,
    /// Any other tag; always rejected
    Unrecognized(String),
}

impl FeedbackType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NeedMoreContext => "need-more-context",
            Self::ValidationError => "validation-error",
            Self::Retry => "retry",
            Self::Refine => "refine",
            Self::Correction => "correction",
            Self::Unrecognized(tag) => tag,
        }
    }
}

impl FromStr for FeedbackType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "need-more-context" => Self::NeedMoreContext,
            "validation-error" => Self::ValidationError,
            "retry" => Self::Retry,
            "refine" => Self::Refine,
            "correction" => Self::Correction,
            other => Self::Unrecognized(other.to_string()),
        })
    }
}

impl fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What extra context is wanted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRequest {
    pub context_type: String,
    pub target: String,
}

/// A reported validation problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub message: String,
    pub errors: Vec<String>,
    /// The result being complained about, if any
    pub result: Option<CapabilityResult>,
    /// The task error being complained about, if any
    pub error: Option<TaskExecutionError>,
    /// Deadline the task ran under, if known
    pub timeout: Option<Duration>,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
            result: None,
            error: None,
            timeout: None,
        }
    }

    /// Issue describing a finished task
    #[must_use]
    pub fn from_task_result(result: &TaskResult) -> Self {
        Self {
            message: result.result.summary.clone(),
            errors: result.error.iter().map(ToString::to_string).collect(),
            result: Some(result.result.clone()),
            error: result.error.clone(),
            timeout: result.task.timeout,
        }
    }

    #[must_use]
    pub fn with_errors<I, S>(mut self, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.errors.extend(errors.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_result(mut self, result: CapabilityResult) -> Self {
        self.result = Some(result);
        self
    }
}

/// Retry parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryParams {
    /// Capability that ran the original task
    pub capability: String,
    /// Retry instructions, sent as "Retry: {content}"
    pub content: String,
    pub params: Bag,
}

/// One task of a refinement sub-plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefineStep {
    pub capability: String,
    pub prompt: String,
}

/// Refinement parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefineParams {
    pub steps: Vec<RefineStep>,
    /// Chain the steps instead of running them side by side
    pub sequential: bool,
}

/// Correction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionParams {
    pub message: String,
    /// Issue to try auto-correcting before falling back to a correction task
    pub issue: Option<ValidationIssue>,
    pub params: Bag,
}

/// Typed payload, one variant per feedback type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum FeedbackPayload {
    ContextRequest(ContextRequest),
    ValidationIssue(ValidationIssue),
    Retry(RetryParams),
    Refine(RefineParams),
    Correction(CorrectionParams),
    None,
}

impl FeedbackPayload {
    /// The validation issue carried by this payload, if any
    #[must_use]
    pub fn issue(&self) -> Option<&ValidationIssue> {
        match self {
            Self::ValidationIssue(issue) => Some(issue),
            Self::Correction(params) => params.issue.as_ref(),
            _ => None,
        }
    }
}

/// A request for one corrective step
#[derive(Debug, Clone)]
pub struct FeedbackRequest {
    pub id: FeedbackId,
    /// Task that raised the feedback
    pub source_task: TaskId,
    /// Task the feedback is about
    pub target_task: TaskId,
    pub kind: FeedbackType,
    pub payload: FeedbackPayload,
    /// Context the outcome is merged into
    pub context: Arc<ExecutionContext>,
}

impl FeedbackRequest {
    pub fn new(
        source_task: TaskId,
        target_task: TaskId,
        kind: FeedbackType,
        payload: FeedbackPayload,
        context: Arc<ExecutionContext>,
    ) -> Self {
        Self {
            id: FeedbackId::new(),
            source_task,
            target_task,
            kind,
            payload,
            context,
        }
    }
}

/// What a feedback call did
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    /// Extra context stored under `additional_context`
    ContextGathered { success: bool },
    /// An automatic correction was applied and recorded
    Corrected(Correction),
    /// Not correctable; the occurrence was recorded
    PatternRecorded(Pattern),
    /// Retry result stored under `retry_{task}_result`
    Retried { success: bool },
    /// Successful refinements stored under `refined_results`
    Refined { succeeded: usize, failed: usize },
    /// Correction task results stored under `correction_{task}_result`
    CorrectionExecuted { success: bool },
}

/// Feedback dispatcher
#[derive(Debug)]
pub struct FeedbackLoop {
    validator: ResultValidator,
    corrector: AutoCorrector,
    learner: PatternLearner,
    propagator: ContextPropagator,
    coordinator: CoordinatorLink,
    context_capability: String,
    correction_capability: String,
}

impl FeedbackLoop {
    #[must_use]
    pub fn new(config: &MaestroConfig) -> Self {
        Self {
            validator: ResultValidator::default(),
            corrector: AutoCorrector::default(),
            learner: PatternLearner::new(),
            propagator: ContextPropagator::default(),
            coordinator: CoordinatorLink::new(),
            context_capability: config.context_capability.clone(),
            correction_capability: config.correction_capability.clone(),
        }
    }

    pub fn set_coordinator(&self, coordinator: Weak<dyn Coordinator>) {
        if !self.coordinator.wire(coordinator) {
            tracing::warn!("feedback loop coordinator already wired");
        }
    }

    #[must_use]
    pub fn learner(&self) -> &PatternLearner {
        &self.learner
    }

    #[must_use]
    pub fn validator(&self) -> &ResultValidator {
        &self.validator
    }

    /// Perform the single corrective action `request` asks for
    ///
    /// # Errors
    /// - `FeedbackError::UnknownType` for unrecognized tags (context untouched)
    /// - `FeedbackError::InvalidPayload` when the payload does not match the type
    /// - `FeedbackError::Planning`/`Registry`/`Execution` when the action fails
    pub async fn process_feedback(
        &self,
        cancel: &CancellationToken,
        request: &FeedbackRequest,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        tracing::info!(
            feedback_id = %request.id,
            kind = %request.kind,
            task_id = %request.target_task,
            "processing feedback"
        );

        match &request.kind {
            FeedbackType::NeedMoreContext => self.need_more_context(cancel, request).await,
            FeedbackType::ValidationError => self.validation_error(request),
            FeedbackType::Retry => self.retry(cancel, request).await,
            FeedbackType::Refine => self.refine(cancel, request).await,
            FeedbackType::Correction => self.correction(cancel, request).await,
            FeedbackType::Unrecognized(tag) => Err(FeedbackError::UnknownType(tag.clone())),
        }
    }

    async fn need_more_context(
        &self,
        cancel: &CancellationToken,
        request: &FeedbackRequest,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        let FeedbackPayload::ContextRequest(wanted) = &request.payload else {
            return Err(invalid(request, "a context request"));
        };

        let mut task_request = CapabilityRequest::new(format!(
            "Gather additional context about {} for {}",
            wanted.target, wanted.context_type
        ));
        extend(&mut task_request, "original_task", request.target_task.to_string());
        extend(&mut task_request, "context_type", wanted.context_type.clone());
        let task = Task::new(&self.context_capability, task_request).with_priority(FEEDBACK_PRIORITY);

        let results = self.run_sub_plan(cancel, request, vec![task]).await?;
        let first = results
            .first()
            .ok_or_else(|| FeedbackError::Execution("context gathering produced no result".into()))?;

        request
            .context
            .set("additional_context", serde_json::to_value(&first.result)?);
        Ok(FeedbackOutcome::ContextGathered {
            success: first.is_success(),
        })
    }

    fn validation_error(&self, request: &FeedbackRequest) -> Result<FeedbackOutcome, FeedbackError> {
        if !matches!(request.payload, FeedbackPayload::ValidationIssue(_)) {
            return Err(invalid(request, "a validation issue"));
        }

        let report = self.validator.analyze(request);
        if let Some(correction) = self.auto_correction(&report) {
            self.apply_correction(request, &correction)?;
            return Ok(FeedbackOutcome::Corrected(correction));
        }

        let pattern = self.learner.record(request, &report);
        Ok(FeedbackOutcome::PatternRecorded(pattern))
    }

    async fn retry(
        &self,
        cancel: &CancellationToken,
        request: &FeedbackRequest,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        let FeedbackPayload::Retry(params) = &request.payload else {
            return Err(invalid(request, "retry parameters"));
        };

        let coordinator = self.coordinator.get()?;
        if coordinator.lookup(&params.capability).is_none() {
            return Err(RegistryError::NotFound(params.capability.clone()).into());
        }

        let base = CapabilityRequest::new(format!("Retry: {}", params.content));
        let context = request.context.request_context_for(&base.context);
        let retry_request = base.with_context(context).with_retry(RetryMarker {
            original_task: request.target_task,
            params: params.params.clone(),
        });

        // admitted by the worker pool like any planned task
        let task = Task::new(&params.capability, retry_request).with_priority(FEEDBACK_PRIORITY);
        let plan = ExecutionPlan::from_tasks(vec![task])?;
        let child = Arc::new(
            request
                .context
                .child(format!("retry for task {}", request.target_task)),
        );
        let outcome = coordinator
            .execute_with_plan(cancel, &plan, &child)
            .await
            .map_err(|err| FeedbackError::Execution(err.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| FeedbackError::Execution("retry produced no result".into()))?;
        if let Some(err) = outcome.error {
            return Err(FeedbackError::Execution(format!("retry execution failed: {err}")));
        }
        let result = outcome.result;

        request.context.set(
            format!("retry_{}_result", request.target_task),
            serde_json::to_value(&result)?,
        );
        Ok(FeedbackOutcome::Retried {
            success: result.success,
        })
    }

    async fn refine(
        &self,
        cancel: &CancellationToken,
        request: &FeedbackRequest,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        let FeedbackPayload::Refine(params) = &request.payload else {
            return Err(invalid(request, "refinement parameters"));
        };
        if params.steps.is_empty() {
            return Err(invalid(request, "at least one refinement step"));
        }

        let mut tasks: Vec<Task> = Vec::with_capacity(params.steps.len());
        for step in &params.steps {
            let mut task = Task::new(&step.capability, CapabilityRequest::new(&step.prompt))
                .with_priority(FEEDBACK_PRIORITY);
            if params.sequential {
                if let Some(previous) = tasks.last() {
                    task = task.depends_on(previous.id);
                }
            }
            tasks.push(task);
        }

        let results = self.run_sub_plan(cancel, request, tasks).await?;
        let mut refined = serde_json::Map::new();
        for result in results.iter().filter(|r| r.is_success()) {
            refined.insert(result.task.id.to_string(), serde_json::to_value(&result.result)?);
        }
        let succeeded = refined.len();
        request
            .context
            .set("refined_results", serde_json::Value::Object(refined));

        Ok(FeedbackOutcome::Refined {
            succeeded,
            failed: results.len() - succeeded,
        })
    }

    async fn correction(
        &self,
        cancel: &CancellationToken,
        request: &FeedbackRequest,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        let (message, params) = match &request.payload {
            FeedbackPayload::Correction(params) => (params.message.clone(), params.params.clone()),
            FeedbackPayload::None => (String::new(), Bag::new()),
            _ => return Err(invalid(request, "correction parameters")),
        };

        let report = self.validator.analyze(request);
        if let Some(correction) = self.auto_correction(&report) {
            self.apply_correction(request, &correction)?;
            return Ok(FeedbackOutcome::Corrected(correction));
        }

        let mut task_request = CapabilityRequest::new(format!(
            "Apply correction for task {}: {message}",
            request.target_task
        ));
        extend(&mut task_request, "original_task", request.target_task.to_string());
        extend(&mut task_request, "feedback_message", message);
        task_request
            .context
            .extensions
            .insert("correction_params".into(), serde_json::to_value(params)?);
        let task =
            Task::new(&self.correction_capability, task_request).with_priority(FEEDBACK_PRIORITY);

        let results = self.run_sub_plan(cancel, request, vec![task]).await?;
        let success = results.iter().all(TaskResult::is_success);
        let stored: Vec<&CapabilityResult> = results.iter().map(|r| &r.result).collect();
        request.context.set(
            format!("correction_{}_result", request.target_task),
            serde_json::to_value(stored)?,
        );
        Ok(FeedbackOutcome::CorrectionExecuted { success })
    }

    fn auto_correction(&self, report: &ValidationReport) -> Option<Correction> {
        if !report.can_auto_correct {
            return None;
        }
        self.corrector.generate(report)
    }

    /// Record the correction and the state each action changes
    fn apply_correction(
        &self,
        request: &FeedbackRequest,
        correction: &Correction,
    ) -> Result<(), FeedbackError> {
        let encoded = serde_json::to_value(correction)?;
        let context = &request.context;
        for action in &correction.actions {
            match action {
                CorrectionAction::SetTimeout { task, timeout } => {
                    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    context.set(format!("task_{task}_timeout_ms"), millis.into());
                }
                CorrectionAction::AmendPrompt { task, addition } => {
                    context.set(format!("task_{task}_prompt_addition"), addition.clone().into());
                }
            }
        }
        context.push("corrections", encoded);
        tracing::info!(
            strategy = %correction.strategy,
            task_id = %correction.task,
            "applied automatic correction"
        );
        Ok(())
    }

    async fn run_sub_plan(
        &self,
        cancel: &CancellationToken,
        request: &FeedbackRequest,
        tasks: Vec<Task>,
    ) -> Result<Vec<TaskResult>, FeedbackError> {
        let coordinator = self.coordinator.get()?;

        let targets: BTreeSet<&str> = tasks.iter().map(|t| t.capability.as_str()).collect();
        let child = Arc::new(
            request
                .context
                .child(format!("feedback {} for task {}", request.kind, request.target_task)),
        );
        for target in targets {
            self.propagator.propagate(&request.context, &child, target);
        }

        let plan = ExecutionPlan::from_tasks(tasks)?;
        tracing::debug!(feedback_id = %request.id, plan_id = %plan.id, tasks = plan.len(), "running feedback sub-plan");
        coordinator
            .execute_with_plan(cancel, &plan, &child)
            .await
            .map_err(|err| FeedbackError::Execution(err.to_string()))
    }
}

fn invalid(request: &FeedbackRequest, expected: &'static str) -> FeedbackError {
    FeedbackError::InvalidPayload {
        kind: request.kind.to_string(),
        expected,
    }
}

fn extend(request: &mut CapabilityRequest, key: &str, value: String) {
    request
        .context
        .extensions
        .insert(key.to_string(), serde_json::Value::String(value));
}
