//! Back-reference from engine components to the orchestrator
//!
//! The planner, executor, feedback loop and hierarchical planner all need to
//! call back into the orchestrator that owns them. Each holds a
//! [`CoordinatorLink`], wired once by the orchestrator right after
//! construction. The link is weak, so the ownership graph stays acyclic.

use crate::capability::CapabilityDirectory;
use crate::context::ExecutionContext;
use crate::error::{MaestroError, PlanningError};
use crate::types::{ExecutionPlan, TaskResult};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// What engine components may ask of the orchestrator
#[async_trait]
pub trait Coordinator: CapabilityDirectory {
    /// Run an already built plan through the executor
    async fn execute_with_plan(
        &self,
        cancel: &CancellationToken,
        plan: &ExecutionPlan,
        context: &Arc<ExecutionContext>,
    ) -> Result<Vec<TaskResult>, MaestroError>;
}

/// Write-once weak reference to the owning coordinator
#[derive(Default)]
pub struct CoordinatorLink {
    inner: OnceCell<Weak<dyn Coordinator>>,
}

impl CoordinatorLink {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the link. Returns `false` if it was already wired; the first
    /// coordinator wins.
    pub fn wire(&self, coordinator: Weak<dyn Coordinator>) -> bool {
        self.inner.set(coordinator).is_ok()
    }

    /// Upgrade to a strong reference for the duration of one call
    ///
    /// # Errors
    /// `PlanningError::MissingCoordinator` if never wired or already dropped
    pub fn get(&self) -> Result<Arc<dyn Coordinator>, PlanningError> {
        self.inner
            .get()
            .and_then(Weak::upgrade)
            .ok_or(PlanningError::MissingCoordinator)
    }

    #[inline]
    #[must_use]
    pub fn is_wired(&self) -> bool {
        self.inner.get().is_some()
    }
}

impl fmt::Debug for CoordinatorLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorLink")
            .field("wired", &self.is_wired())
            .finish()
    }
}
