//! Maestro Core - capability orchestration
//!
//! Turns a free-form request into a staged plan of capability invocations
//! and runs it:
//! - Classifies intent and expands it through plan templates
//! - Levels the task graph into dependency-ordered stages
//! - Executes stages through a bounded worker pool with partial-failure
//!   tolerance and cooperative cancellation
//! - Applies feedback (more context, validation, retry, refine, correction)
//! - Decomposes project-scale requests into epics, stories and sprints
//!
//! # Example
//!
//! ```rust,ignore
//! use maestro_core::prelude::*;
//!
//! # async fn example(search: Arc<dyn Capability>) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(MaestroConfig::new())?;
//! orchestrator.register_capability(search)?;
//!
//! let result = orchestrator
//!     .execute(&CancellationToken::new(), "search for TODO comments", Bag::new())
//!     .await?;
//!
//! println!("{}", result.summary);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod capability;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod hierarchy;
pub mod orchestrator;
pub mod planner;
pub mod types;

// Re-exports for convenience
pub use capability::{names, Capability, CapabilityDirectory, CapabilityRegistry};
pub use config::{MaestroConfig, PlanningConfig, ProjectConfig};
pub use context::{
    ContextPropagator, ContextState, ExecutionContext, ProgressStatus, ProgressUpdate,
};
pub use coordinator::{Coordinator, CoordinatorLink};
pub use error::{
    CapabilityError, ConfigError, FeedbackError, MaestroError, PlanningError, PoolError,
    RegistryError, TaskExecutionError,
};
pub use executor::{DependencyTracker, Executor, PlanProgress, PoolStats, ProgressTracker, WorkerPool};
pub use feedback::{
    ContextRequest, CorrectionParams, FeedbackLoop, FeedbackOutcome, FeedbackPayload,
    FeedbackRequest, FeedbackType, RefineParams, RefineStep, RetryParams, ValidationIssue,
};
pub use hierarchy::{HierarchicalPlanner, Project, ProjectHistory, SprintResult};
pub use orchestrator::Orchestrator;
pub use planner::{Intent, IntentAnalyzer, IntentCategory, Planner};
pub use types::{
    Bag, CapabilityRequest, CapabilityResult, ExecutionPlan, PlanId, ProjectId, RequestContext,
    Stage, StageId, Task, TaskId, TaskResult,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Maestro Core
    pub use crate::{
        Bag, Capability, CapabilityError, CapabilityRegistry, CapabilityRequest, CapabilityResult,
        ExecutionContext, ExecutionPlan, FeedbackRequest, FeedbackType, MaestroConfig,
        MaestroError, Orchestrator, Task, TaskId, TaskResult,
    };
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::prelude::*;

    struct Echo(&'static str);

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "echo"
        }

        fn can_handle(&self, _text: &str) -> (bool, f64) {
            (true, 1.0)
        }

        async fn execute(
            &self,
            _cancel: &CancellationToken,
            request: CapabilityRequest,
        ) -> Result<CapabilityResult, CapabilityError> {
            Ok(CapabilityResult::success(self.0, request.prompt))
        }
    }

    #[tokio::test]
    async fn full_flow_through_prelude() {
        let orchestrator = Orchestrator::new(MaestroConfig::new().with_max_workers(2)).unwrap();
        orchestrator.register_capability(Arc::new(Echo(names::SEARCH))).unwrap();

        let result = orchestrator
            .execute(&CancellationToken::new(), "search for TODO comments", Bag::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.summary, "Executed 1 tasks (1 successful, 0 failed)");
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
