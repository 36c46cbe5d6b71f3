//! Capability interface and registry
//!
//! A capability is an externally implemented task performer. The engine only
//! asks whether it is willing to take a request and tells it to execute one.

use crate::error::{CapabilityError, RegistryError};
use crate::types::{CapabilityRequest, CapabilityResult};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Canonical capability names used by the plan templates
pub mod names {
    pub const FILE_OPERATIONS: &str = "file_operations";
    pub const CODE_ANALYSIS: &str = "code_analysis";
    pub const CODE_REVIEW: &str = "code_review";
    pub const SEARCH: &str = "search";
    pub const DISPATCHER: &str = "dispatcher";
}

/// A named unit of work-performing logic.
///
/// Cancellation is cooperative: the engine never aborts an in-flight
/// `execute`, so implementations must watch `cancel` (which also fires when
/// the task's timeout elapses) and return promptly once it is cancelled.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Willingness to attempt `text`, with a confidence in `0.0..=1.0`
    fn can_handle(&self, text: &str) -> (bool, f64);

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: CapabilityRequest,
    ) -> Result<CapabilityResult, CapabilityError>;
}

/// Read-only lookup from capability name to instance
pub trait CapabilityDirectory: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Capability>>;
}

/// Explicit capability registry.
///
/// Constructed by the process entry point and handed to the orchestrator;
/// there is no process-wide default instance.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<IndexMap<String, Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its own name
    ///
    /// # Errors
    /// `RegistryError::Duplicate` if the name is already taken
    pub fn register(&self, capability: Arc<dyn Capability>) -> Result<(), RegistryError> {
        let name = capability.name().to_string();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        tracing::info!(
            capability = %name,
            description = capability.description(),
            "registered capability"
        );
        entries.insert(name, capability);
        Ok(())
    }

    /// Get a capability by name
    ///
    /// # Errors
    /// `RegistryError::NotFound` if no capability has that name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Capability>, RegistryError> {
        self.entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Registered names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// All registered capabilities in registration order
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn Capability>> {
        self.entries.read().values().cloned().collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The willing capability with the highest confidence for `text`.
    /// Ties go to the earliest registered.
    #[must_use]
    pub fn best_match(&self, text: &str) -> Option<(Arc<dyn Capability>, f64)> {
        let entries = self.entries.read();
        let mut best: Option<(Arc<dyn Capability>, f64)> = None;
        for capability in entries.values() {
            let (willing, confidence) = capability.can_handle(text);
            if !willing {
                continue;
            }
            if best.as_ref().map_or(true, |(_, c)| confidence > *c) {
                best = Some((Arc::clone(capability), confidence));
            }
        }
        best
    }
}

impl CapabilityDirectory for CapabilityRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.read().get(name).cloned()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}
