//! Error types for Maestro Core
//!
//! The taxonomy mirrors how far a failure is allowed to travel:
//! - `PlanningError` aborts the current request before anything runs
//! - `TaskExecutionError` is captured per task and never propagates
//! - `FeedbackError` is surfaced to the feedback caller only
//! - `CapabilityError` is what capabilities hand back to the engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main Maestro error type
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    /// Planning failed; nothing was executed
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    /// Feedback handling failed
    #[error("feedback failed: {0}")]
    Feedback(#[from] FeedbackError),

    /// Capability registration or lookup failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Worker pool refused work
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cancelled before work started
    #[error("operation cancelled")]
    Cancelled,
}

impl MaestroError {
    /// Planning errors are fatal for the request that raised them
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Planning(_) | Self::Config(_))
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Pool(PoolError::JobDropped) | Self::Feedback(FeedbackError::Execution(_))
        )
    }
}

/// Errors that stop a request before any task runs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    #[error("empty request")]
    EmptyRequest,

    #[error("no template for intent {0}")]
    NoTemplate(String),

    /// Every template entry named a capability that is not registered
    #[error("no registered capability can serve intent {0}")]
    NoAvailableCapabilities(String),

    /// Tasks left over by the level-order sort (cycle or dangling dependency)
    #[error("{count} task(s) could not be placed into any stage: {ids}")]
    UnplaceableTasks { count: usize, ids: String },

    /// A sprint date fell outside the representable calendar
    #[error("sprint {sprint} cannot be scheduled from the project start date")]
    ScheduleOutOfRange { sprint: usize },

    /// The back-reference to the orchestrator was never wired, or the
    /// orchestrator has been dropped
    #[error("coordination reference is not wired")]
    MissingCoordinator,
}

/// Per-task failure captured in a `TaskResult`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TaskExecutionError {
    #[error("capability {0} not found")]
    CapabilityNotFound(String),

    #[error("capability {capability} failed: {message}")]
    CapabilityFailed { capability: String, message: String },

    #[error("capability {capability} observed cancellation")]
    Cancelled { capability: String },

    #[error("capability {capability} exceeded its {timeout:?} deadline")]
    TimedOut {
        capability: String,
        timeout: Duration,
    },

    /// The dependency tracker refused the task
    #[error("dependencies not satisfied: {0}")]
    UnsatisfiedDependencies(String),

    #[error("no worker available: {0}")]
    WorkerUnavailable(String),
}

impl TaskExecutionError {
    /// Failures a feedback retry could plausibly fix
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CapabilityFailed { .. } | Self::TimedOut { .. } | Self::WorkerUnavailable(_)
        )
    }
}

/// Errors raised while handling a feedback request
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("unknown feedback type: {0}")]
    UnknownType(String),

    #[error("invalid {kind} payload: expected {expected}")]
    InvalidPayload {
        kind: String,
        expected: &'static str,
    },

    /// The derived sub-plan could not be built
    #[error("feedback planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("feedback lookup failed: {0}")]
    Registry(#[from] RegistryError),

    /// The derived sub-plan or retry failed to execute
    #[error("feedback execution failed: {0}")]
    Execution(String),

    #[error("feedback result could not be stored: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Capability registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("capability {0} already registered")]
    Duplicate(String),

    #[error("capability {0} not found")]
    NotFound(String),
}

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    ShutDown,

    /// The job was accepted but never reported back (it panicked or the
    /// pool stopped before running it)
    #[error("worker dropped the job before completion")]
    JobDropped,
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Error returned by a capability's `execute`
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The capability observed its cancellation token
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(PlanningError::EmptyRequest.to_string(), "empty request");
        assert_eq!(
            RegistryError::Duplicate("search".into()).to_string(),
            "capability search already registered"
        );
        assert_eq!(
            FeedbackError::UnknownType("escalate".into()).to_string(),
            "unknown feedback type: escalate"
        );
    }

    #[test]
    fn planning_errors_are_fatal() {
        let err = MaestroError::from(PlanningError::NoTemplate("generic".into()));
        assert!(err.is_fatal());
        assert!(!MaestroError::Cancelled.is_fatal());
    }

    #[test]
    fn task_error_retryability() {
        assert!(TaskExecutionError::TimedOut {
            capability: "search".into(),
            timeout: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!TaskExecutionError::CapabilityNotFound("x".into()).is_retryable());
    }

    #[test]
    fn capability_error_wraps_anyhow() {
        let err: CapabilityError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.to_string(), "disk full");
    }
}
