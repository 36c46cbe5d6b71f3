//! Execution context shared by the task units of one request
//!
//! All mutable state sits behind a single read/write lock. Callers copy out
//! or merge in and release; the lock is never held across a capability call.

use crate::capability::names;
use crate::types::{
    Bag, CapabilityResult, FileRecord, PlanId, RequestContext, RequestId, SessionId, Task, TaskId,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Mutable portion of an execution context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextState {
    /// Shared key/value data
    pub shared_data: Bag,
    /// Touched files, unique by path
    pub files: Vec<FileRecord>,
    /// Artifacts keyed `{capability}_{key}`
    pub artifacts: Bag,
}

impl ContextState {
    fn record_file(&mut self, path: &str) -> bool {
        if self.files.iter().any(|f| f.path == path) {
            return false;
        }
        self.files.push(FileRecord::new(path));
        true
    }
}

/// Lifecycle point reported to a progress sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Started,
    Completed,
    Failed,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Best-effort progress notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub plan_id: PlanId,
    pub task_id: TaskId,
    pub capability: String,
    pub status: ProgressStatus,
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(plan_id: PlanId, task: &Task, status: ProgressStatus) -> Self {
        Self {
            plan_id,
            task_id: task.id,
            capability: task.capability.clone(),
            status,
            timestamp: Utc::now(),
        }
    }
}

/// State scoped to one top-level request or one feedback cycle
#[derive(Debug)]
pub struct ExecutionContext {
    session_id: SessionId,
    request_id: RequestId,
    original_prompt: String,
    options: Bag,
    state: RwLock<ContextState>,
    progress: Option<mpsc::Sender<ProgressUpdate>>,
}

impl ExecutionContext {
    /// Fresh context in a new session
    pub fn new(prompt: impl Into<String>) -> Self {
        Self::with_ids(SessionId::new(), RequestId::new(), prompt)
    }

    /// Context with explicit ids
    pub fn with_ids(session_id: SessionId, request_id: RequestId, prompt: impl Into<String>) -> Self {
        Self {
            session_id,
            request_id,
            original_prompt: prompt.into(),
            options: Bag::new(),
            state: RwLock::new(ContextState::default()),
            progress: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_options(mut self, options: Bag) -> Self {
        self.options = options;
        self
    }

    /// Attach a progress sink
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, sink: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Attach a new bounded progress sink and hand back its receiver
    #[must_use]
    pub fn with_progress_channel(self, capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.with_progress(tx), rx)
    }

    /// Context for a feedback cycle: same session and progress sink, new
    /// request id, empty state
    #[must_use]
    pub fn child(&self, prompt: impl Into<String>) -> Self {
        Self {
            session_id: self.session_id,
            request_id: RequestId::new(),
            original_prompt: prompt.into(),
            options: self.options.clone(),
            state: RwLock::new(ContextState::default()),
            progress: self.progress.clone(),
        }
    }

    #[inline]
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[inline]
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[inline]
    #[must_use]
    pub fn original_prompt(&self) -> &str {
        &self.original_prompt
    }

    #[inline]
    #[must_use]
    pub fn options(&self) -> &Bag {
        &self.options
    }

    /// Read one shared value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.state.read().shared_data.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.read().shared_data.contains_key(key)
    }

    /// Write one shared value
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.state.write().shared_data.insert(key.into(), value);
    }

    /// Append to a shared array, creating it if needed. A non-array value
    /// under `key` is replaced.
    pub fn push(&self, key: &str, value: serde_json::Value) {
        let mut state = self.state.write();
        let entry = state
            .shared_data
            .entry(key.to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        match entry {
            serde_json::Value::Array(items) => items.push(value),
            other => *other = serde_json::Value::Array(vec![value]),
        }
    }

    /// Copy of the whole mutable state
    #[must_use]
    pub fn snapshot(&self) -> ContextState {
        self.state.read().clone()
    }

    #[must_use]
    pub fn files(&self) -> Vec<FileRecord> {
        self.state.read().files.clone()
    }

    /// Record touched files; returns how many were new
    pub fn record_files<I, S>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.write();
        paths
            .into_iter()
            .filter(|p| state.record_file(p.as_ref()))
            .count()
    }

    /// Build the context delivered to a capability: the task's own entries
    /// win over shared entries with the same key.
    #[must_use]
    pub fn request_context_for(&self, base: &RequestContext) -> RequestContext {
        let state = self.state.read();
        let mut merged = base.clone();
        for (key, value) in &state.shared_data {
            merged
                .shared_data
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for (key, value) in &state.artifacts {
            merged
                .artifacts
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for file in &state.files {
            if !merged.files.iter().any(|f| f.path == file.path) {
                merged.files.push(file.clone());
            }
        }
        merged
    }

    /// Merge a finished task's result back in: the result itself under
    /// `task_{id}_result`, touched files deduplicated by path, and artifacts
    /// under `{capability}_{key}`.
    pub fn absorb_result(&self, task: &Task, result: &CapabilityResult) {
        let encoded = match serde_json::to_value(result) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "task result is not serializable");
                None
            }
        };

        let mut state = self.state.write();
        if let Some(value) = encoded {
            state
                .shared_data
                .insert(format!("task_{}_result", task.id), value);
        }
        for path in &result.metadata.files_processed {
            state.record_file(path);
        }
        for (key, value) in &result.artifacts {
            state
                .artifacts
                .insert(format!("{}_{key}", task.capability), value.clone());
        }
    }

    /// Non-blocking progress notification. Returns `false` when there is no
    /// sink or the update was dropped because the sink is full or closed.
    pub fn emit_progress(&self, update: ProgressUpdate) -> bool {
        let Some(sink) = &self.progress else {
            return false;
        };
        match sink.try_send(update) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(update)) => {
                tracing::debug!(task_id = %update.task_id, "progress sink full, update dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Decides what part of one context is copied into another
pub trait PropagationRule: fmt::Debug + Send + Sync {
    fn applies_to(&self, target_capability: &str) -> bool;

    fn apply(&self, from: &ContextState, to: &mut ContextState, target_capability: &str);
}

/// Copies touched files, deduplicated by path
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRule;

impl PropagationRule for FileRule {
    fn applies_to(&self, _target_capability: &str) -> bool {
        true
    }

    fn apply(&self, from: &ContextState, to: &mut ContextState, _target_capability: &str) {
        for file in &from.files {
            if !to.files.iter().any(|f| f.path == file.path) {
                to.files.push(file.clone());
            }
        }
    }
}

/// Copies the shared data a target capability is likely to use
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedDataRule;

impl SharedDataRule {
    fn wants(key: &str, target_capability: &str) -> bool {
        match target_capability {
            names::CODE_REVIEW => key.contains("analysis") || key.contains("ast"),
            names::FILE_OPERATIONS => key.contains("file") || key.contains("path"),
            _ => !key.contains("internal"),
        }
    }
}

impl PropagationRule for SharedDataRule {
    fn applies_to(&self, _target_capability: &str) -> bool {
        true
    }

    fn apply(&self, from: &ContextState, to: &mut ContextState, target_capability: &str) {
        for (key, value) in &from.shared_data {
            if Self::wants(key, target_capability) {
                to.shared_data.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Copies artifacts, except to the general-purpose dispatcher
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactRule;

impl PropagationRule for ArtifactRule {
    fn applies_to(&self, target_capability: &str) -> bool {
        target_capability != names::DISPATCHER
    }

    fn apply(&self, from: &ContextState, to: &mut ContextState, _target_capability: &str) {
        to.artifacts
            .extend(from.artifacts.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Seeds a feedback sub-context from its originating context
#[derive(Debug)]
pub struct ContextPropagator {
    rules: Vec<Box<dyn PropagationRule>>,
}

impl ContextPropagator {
    #[must_use]
    pub fn new(rules: Vec<Box<dyn PropagationRule>>) -> Self {
        Self { rules }
    }

    /// Copy what the rules allow from `from` into `to`, for work that will
    /// be handled by `target_capability`
    pub fn propagate(&self, from: &ExecutionContext, to: &ExecutionContext, target_capability: &str) {
        let source = from.snapshot();
        let mut dest = to.state.write();
        for rule in &self.rules {
            if rule.applies_to(target_capability) {
                rule.apply(&source, &mut dest, target_capability);
            }
        }
    }
}

impl Default for ContextPropagator {
    fn default() -> Self {
        Self::new(vec![
            Box::new(FileRule),
            Box::new(SharedDataRule),
            Box::new(ArtifactRule),
        ])
    }
}
