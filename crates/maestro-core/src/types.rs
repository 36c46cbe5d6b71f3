//! Core types for Maestro
//!
//! Identifiers, the capability request/result payloads, and the task,
//! stage and plan structures that flow between planner and executor.

use crate::error::TaskExecutionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use ulid::Ulid;

/// Extension bag for capability-specific data.
///
/// The engine never branches on the contents of a bag; everything it needs
/// for control flow lives in typed fields.
pub type Bag = BTreeMap<String, serde_json::Value>;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new unique id
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(
    /// Unique task identifier
    TaskId
);
ulid_id!(
    /// Unique execution plan identifier
    PlanId
);
ulid_id!(
    /// Session identifier shared by nested contexts
    SessionId
);
ulid_id!(
    /// Identifier of one top-level request or feedback cycle
    RequestId
);
ulid_id!(
    /// Feedback request identifier
    FeedbackId
);
ulid_id!(
    /// Project identifier
    ProjectId
);
ulid_id!(
    /// Epic identifier
    EpicId
);
ulid_id!(
    /// User story identifier
    StoryId
);
ulid_id!(
    /// Sprint identifier
    SprintId
);

/// Stage identifier; the index of the stage within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(pub usize);

impl StageId {
    /// Position of the stage in plan order
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage-{}", self.0)
    }
}

/// A file touched during execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path as reported by the capability
    pub path: String,
    /// When the engine recorded the touch
    pub last_modified: DateTime<Utc>,
}

impl FileRecord {
    /// Record a file touched now
    #[inline]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            last_modified: Utc::now(),
        }
    }
}

/// Marks a request as a feedback-driven retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryMarker {
    /// Task whose execution is being retried
    pub original_task: TaskId,
    /// Retry parameters supplied with the feedback
    pub params: Bag,
}

/// Ties a task back to the user story it was decomposed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryRef {
    /// Owning project
    pub project: ProjectId,
    /// Story id
    pub story: StoryId,
    /// Story title
    pub title: String,
}

/// Context delivered to a capability alongside its prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Snapshot of the shared execution data
    pub shared_data: Bag,
    /// Files touched so far in this request
    pub files: Vec<FileRecord>,
    /// Artifacts produced so far in this request
    pub artifacts: Bag,
    /// Present when this request is a retry
    pub retry: Option<RetryMarker>,
    /// Present when this request was decomposed from a user story
    pub story: Option<StoryRef>,
    /// Capability-specific extensions
    pub extensions: Bag,
}

/// A request handed to a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// Prompt text
    pub prompt: String,
    /// Structured context
    pub context: RequestContext,
    /// Capability-specific options
    pub options: Bag,
    /// Directory the capability should operate in
    pub working_directory: Option<PathBuf>,
}

impl CapabilityRequest {
    /// Create a request with an empty context
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: RequestContext::default(),
            options: Bag::new(),
            working_directory: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_options(mut self, options: Bag) -> Self {
        self.options = options;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_story(mut self, story: StoryRef) -> Self {
        self.context.story = Some(story);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryMarker) -> Self {
        self.context.retry = Some(retry);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Whether this request is a feedback-driven retry
    #[inline]
    #[must_use]
    pub fn is_retry(&self) -> bool {
        self.context.retry.is_some()
    }
}

/// Execution metadata attached to every result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Capability (or engine component) that produced the result
    pub capability: String,
    /// Start of execution
    pub started_at: DateTime<Utc>,
    /// End of execution
    pub ended_at: DateTime<Utc>,
    /// Wall-clock duration
    pub duration: Duration,
    /// Tools the capability used
    pub tools_used: Vec<String>,
    /// Files the capability read or wrote
    pub files_processed: Vec<String>,
}

impl ResultMetadata {
    /// Metadata for a result starting and ending now
    pub fn new(capability: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            capability: capability.into(),
            started_at: now,
            ended_at: now,
            duration: Duration::ZERO,
            tools_used: Vec::new(),
            files_processed: Vec::new(),
        }
    }
}

/// Structured outcome of a capability invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    /// Whether the capability considers the request satisfied
    pub success: bool,
    /// One-line summary
    pub summary: String,
    /// Detailed report
    pub details: String,
    /// Produced artifacts
    pub artifacts: Bag,
    /// Execution metadata
    pub metadata: ResultMetadata,
}

impl CapabilityResult {
    /// Successful result
    pub fn success(capability: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            details: String::new(),
            artifacts: Bag::new(),
            metadata: ResultMetadata::new(capability),
        }
    }

    /// Failed result
    pub fn failure(
        capability: impl Into<String>,
        summary: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            details: details.into(),
            artifacts: Bag::new(),
            metadata: ResultMetadata::new(capability),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_artifact(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata
            .files_processed
            .extend(files.into_iter().map(Into::into));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata
            .tools_used
            .extend(tools.into_iter().map(Into::into));
        self
    }

    /// Stamp start/end times, measuring from `started_at` to now
    #[must_use]
    pub fn timed(mut self, started_at: DateTime<Utc>) -> Self {
        let ended_at = Utc::now();
        self.metadata.started_at = started_at;
        self.metadata.ended_at = ended_at;
        self.metadata.duration = (ended_at - started_at).to_std().unwrap_or_default();
        self
    }
}

/// One scheduled invocation of a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task ID
    pub id: TaskId,
    /// Target capability name
    pub capability: String,
    /// Request handed to the capability
    pub request: CapabilityRequest,
    /// Higher runs earlier among peers (informational)
    pub priority: i32,
    /// Tasks that must finish first
    pub dependencies: Vec<TaskId>,
    /// Owning stage, assigned by the optimizer
    pub stage: Option<StageId>,
    /// Optional per-task deadline, honored cooperatively
    pub timeout: Option<Duration>,
}

impl Task {
    /// Create new task
    pub fn new(capability: impl Into<String>, request: CapabilityRequest) -> Self {
        Self {
            id: TaskId::new(),
            capability: capability.into(),
            request,
            priority: 0,
            dependencies: Vec::new(),
            stage: None,
            timeout: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add dependency
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, task_id: TaskId) -> Self {
        if !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
        self
    }
}

/// A batch of mutually independent tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage ID
    pub id: StageId,
    /// Tasks in discovery order
    pub tasks: Vec<TaskId>,
}

/// Ordered stages of tasks produced for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Plan ID
    pub id: PlanId,
    /// Flat task list
    pub tasks: Vec<Task>,
    /// Stages in execution order
    pub stages: Vec<Stage>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Coarse estimate; never used for control decisions
    pub estimated_duration: Duration,
}

impl ExecutionPlan {
    /// Look up a task by id
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Stage index holding the given task
    #[must_use]
    pub fn stage_of(&self, id: TaskId) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.tasks.contains(&id))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Outcome of one executed (or refused) task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task as planned
    pub task: Task,
    /// Capability result, or a synthesized failure
    pub result: CapabilityResult,
    /// Set when the task could not run or its capability errored
    pub error: Option<TaskExecutionError>,
    /// Start of the task unit
    pub started_at: DateTime<Utc>,
    /// End of the task unit
    pub ended_at: DateTime<Utc>,
}

impl TaskResult {
    /// Result for a task that never reached its capability, or whose
    /// capability returned an error
    pub fn failed(task: Task, error: TaskExecutionError) -> Self {
        let now = Utc::now();
        let result = CapabilityResult::failure(
            task.capability.clone(),
            format!("Task {} failed", task.id),
            error.to_string(),
        );
        Self {
            task,
            result,
            error: Some(error),
            started_at: now,
            ended_at: now,
        }
    }

    /// No error and the capability reported success
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_builder_deduplicates_dependencies() {
        let dep = TaskId::new();
        let task = Task::new("search", CapabilityRequest::new("find x"))
            .depends_on(dep)
            .depends_on(dep)
            .with_priority(3);

        assert_eq!(task.dependencies, vec![dep]);
        assert_eq!(task.priority, 3);
        assert!(task.stage.is_none());
    }

    #[test]
    fn stage_id_display() {
        assert_eq!(StageId(2).to_string(), "stage-2");
    }

    #[test]
    fn failed_task_result_is_not_success() {
        let task = Task::new("missing", CapabilityRequest::new("x"));
        let result =
            TaskResult::failed(task, TaskExecutionError::CapabilityNotFound("missing".into()));

        assert!(!result.is_success());
        assert!(!result.result.success);
        assert!(result.result.details.contains("missing"));
    }

    #[test]
    fn capability_result_serializes() {
        let result = CapabilityResult::success("search", "found 2 matches")
            .with_artifact("count", serde_json::json!(2))
            .with_files(["src/lib.rs"]);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], serde_json::json!(true));
        assert_eq!(value["artifacts"]["count"], serde_json::json!(2));
        assert_eq!(
            value["metadata"]["files_processed"],
            serde_json::json!(["src/lib.rs"])
        );
    }
}
