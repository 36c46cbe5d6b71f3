//! Testing utilities for the Maestro workspace
//!
//! Scripted capabilities, plan fixtures and a ready-made orchestrator.

#![allow(missing_docs)]

use async_trait::async_trait;
use maestro_core::{
    names, Capability, CapabilityError, CapabilityRequest, CapabilityResult, ExecutionPlan,
    MaestroConfig, Orchestrator, Task,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What a [`MockCapability`] does when executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Successful result echoing the prompt
    Succeed,
    /// `Ok` result with `success = false`
    Fail,
    /// `Err(CapabilityError::Failed)`
    Error,
    /// Sleep, then succeed; returns `Cancelled` if cancelled first
    Delay(Duration),
    /// Block until cancelled
    WaitForCancel,
}

/// One recorded call
#[derive(Debug, Clone)]
pub struct Invocation {
    pub capability: String,
    pub prompt: String,
    pub request: CapabilityRequest,
    pub started_at: Instant,
    pub ended_at: Instant,
}

/// Shared call log; several mocks may write to the same log
pub type InvocationLog = Arc<Mutex<Vec<Invocation>>>;

#[must_use]
pub fn new_log() -> InvocationLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Debug, Clone)]
pub struct MockCapability {
    name: String,
    behavior: Behavior,
    keywords: Vec<String>,
    log: InvocationLog,
}

impl MockCapability {
    pub fn new(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            keywords: Vec::new(),
            log: new_log(),
        }
    }

    pub fn succeed(name: impl Into<String>) -> Self {
        Self::new(name, Behavior::Succeed)
    }

    pub fn fail(name: impl Into<String>) -> Self {
        Self::new(name, Behavior::Fail)
    }

    pub fn error(name: impl Into<String>) -> Self {
        Self::new(name, Behavior::Error)
    }

    pub fn delay(name: impl Into<String>, delay: Duration) -> Self {
        Self::new(name, Behavior::Delay(delay))
    }

    pub fn waits_for_cancel(name: impl Into<String>) -> Self {
        Self::new(name, Behavior::WaitForCancel)
    }

    /// Record calls into `log` instead of a private log
    #[must_use]
    pub fn with_log(mut self, log: InvocationLog) -> Self {
        self.log = log;
        self
    }

    /// `can_handle` answers yes only for text containing one of `keywords`;
    /// without keywords it accepts everything
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn log(&self) -> InvocationLog {
        Arc::clone(&self.log)
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.log.lock().len()
    }

    #[must_use]
    pub fn into_arc(self) -> Arc<dyn Capability> {
        Arc::new(self)
    }

    fn record(&self, request: &CapabilityRequest, started_at: Instant) {
        self.log.lock().push(Invocation {
            capability: self.name.clone(),
            prompt: request.prompt.clone(),
            request: request.clone(),
            started_at,
            ended_at: Instant::now(),
        });
    }
}

#[async_trait]
impl Capability for MockCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test capability"
    }

    fn can_handle(&self, text: &str) -> (bool, f64) {
        if self.keywords.is_empty() {
            return (true, 0.5);
        }
        let lower = text.to_lowercase();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            (true, 0.9)
        } else {
            (false, 0.0)
        }
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: CapabilityRequest,
    ) -> Result<CapabilityResult, CapabilityError> {
        let started_at = Instant::now();
        let outcome = match self.behavior {
            Behavior::Succeed => Ok(CapabilityResult::success(&self.name, &request.prompt)
                .with_details(format!("{} handled: {}", self.name, request.prompt))),
            Behavior::Fail => Ok(CapabilityResult::failure(
                &self.name,
                "scripted failure",
                format!("{} could not handle: {}", self.name, request.prompt),
            )),
            Behavior::Error => Err(CapabilityError::Failed(format!(
                "{} raised an error",
                self.name
            ))),
            Behavior::Delay(delay) => {
                tokio::select! {
                    () = cancel.cancelled() => Err(CapabilityError::Cancelled),
                    () = tokio::time::sleep(delay) => Ok(CapabilityResult::success(&self.name, &request.prompt)),
                }
            }
            Behavior::WaitForCancel => {
                cancel.cancelled().await;
                Err(CapabilityError::Cancelled)
            }
        };
        self.record(&request, started_at);
        outcome
    }
}

/// Linear chain: each task depends on the previous one, one stage per task
///
/// # Panics
/// Never for a non-empty list of capability names
#[must_use]
pub fn create_test_plan(capabilities: &[&str]) -> ExecutionPlan {
    let mut tasks: Vec<Task> = Vec::with_capacity(capabilities.len());
    for (i, name) in capabilities.iter().enumerate() {
        let mut task = Task::new(*name, CapabilityRequest::new(format!("step {i} on {name}")));
        if let Some(previous) = tasks.last() {
            task = task.depends_on(previous.id);
        }
        tasks.push(task);
    }
    ExecutionPlan::from_tasks(tasks).expect("a linear chain always levels")
}

/// Independent tasks in a single stage
///
/// # Panics
/// Never for a non-empty list of capability names
#[must_use]
pub fn create_parallel_plan(capabilities: &[&str]) -> ExecutionPlan {
    let tasks = capabilities
        .iter()
        .enumerate()
        .map(|(i, name)| Task::new(*name, CapabilityRequest::new(format!("task {i} on {name}"))))
        .collect();
    ExecutionPlan::from_tasks(tasks).expect("independent tasks always level")
}

/// Orchestrator with succeeding mocks under every canonical capability name,
/// all recording into the returned log
///
/// # Panics
/// If the default configuration is rejected
#[must_use]
pub fn setup_test_orchestrator() -> (Arc<Orchestrator>, InvocationLog) {
    let log = new_log();
    let capabilities = [
        names::FILE_OPERATIONS,
        names::CODE_ANALYSIS,
        names::CODE_REVIEW,
        names::SEARCH,
        names::DISPATCHER,
    ]
    .into_iter()
    .map(|name| MockCapability::succeed(name).with_log(Arc::clone(&log)).into_arc())
    .collect();
    (
        setup_test_orchestrator_with(MaestroConfig::default(), capabilities),
        log,
    )
}

/// Orchestrator over `config` with exactly `capabilities` registered
///
/// # Panics
/// If `config` is invalid or two capabilities share a name
#[must_use]
pub fn setup_test_orchestrator_with(
    config: MaestroConfig,
    capabilities: Vec<Arc<dyn Capability>>,
) -> Arc<Orchestrator> {
    let orchestrator = Orchestrator::new(config).expect("valid test configuration");
    for capability in capabilities {
        orchestrator
            .register_capability(capability)
            .expect("unique capability names");
    }
    orchestrator
}
