//! Project, epic, sprint and story entities

use crate::context::ExecutionContext;
use crate::types::{
    Bag, CapabilityResult, EpicId, ExecutionPlan, ProjectId, SprintId, StoryId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Story and epic priority; also used as the priority of derived tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOW: Self = Self(0);
    pub const MEDIUM: Self = Self(5);
    pub const HIGH: Self = Self(10);

    /// Scope-reduction step applied after a failed sprint
    #[must_use]
    pub fn demote(self) -> Self {
        if self == Self::HIGH {
            Self::MEDIUM
        } else {
            self
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LOW => f.write_str("low"),
            Self::MEDIUM => f.write_str("medium"),
            Self::HIGH => f.write_str("high"),
            Self(other) => write!(f, "{other}"),
        }
    }
}

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $text),+
                })
            }
        }
    };
}

status_enum!(
    /// Project lifecycle
    ProjectStatus {
        Planning => "planning",
        InProgress => "in_progress",
        Completed => "completed",
        Failed => "failed",
    }
);

status_enum!(
    /// Sprint lifecycle
    SprintStatus {
        Planning => "planning",
        Active => "active",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

status_enum!(
    EpicStatus {
        Todo => "todo",
        InProgress => "in_progress",
        Done => "done",
    }
);

status_enum!(
    StoryStatus {
        Todo => "todo",
        InProgress => "in_progress",
        Done => "done",
        Blocked => "blocked",
    }
);

status_enum!(
    /// Word-count bucket of a project request
    Scope {
        Small => "small",
        Medium => "medium",
        Large => "large",
    }
);

/// A single deliverable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStory {
    pub id: StoryId,
    pub title: String,
    pub description: String,
    pub points: u32,
    pub priority: Priority,
    pub status: StoryStatus,
}

impl UserStory {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        points: u32,
        priority: Priority,
    ) -> Self {
        Self {
            id: StoryId::new(),
            title: title.into(),
            description: description.into(),
            points,
            priority,
            status: StoryStatus::Todo,
        }
    }
}

/// A large feature or component, owning its stories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: EpicId,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: EpicStatus,
    pub stories: Vec<UserStory>,
}

impl Epic {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        stories: Vec<UserStory>,
    ) -> Self {
        Self {
            id: EpicId::new(),
            title: title.into(),
            description: description.into(),
            priority,
            status: EpicStatus::Todo,
            stories,
        }
    }

    #[must_use]
    pub fn points(&self) -> u32 {
        self.stories.iter().map(|s| s.points).sum()
    }
}

/// Execution plan derived from one story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryPlan {
    pub story: StoryId,
    pub plan: ExecutionPlan,
}

/// A time-boxed, capacity-bounded batch of stories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: SprintId,
    /// 1-based
    pub number: usize,
    pub name: String,
    pub goal: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SprintStatus,
    /// Stories live in their epics; sprints reference them by id
    pub story_ids: Vec<StoryId>,
    pub plans: Vec<StoryPlan>,
    /// Capacity in story points
    pub capacity: u32,
    /// Points assigned at planning time
    pub planned_points: u32,
    /// Points of stories completed
    pub velocity: u32,
}

/// Limits carried from the request options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConstraints {
    pub timeout: Option<serde_json::Value>,
    pub budget: Option<serde_json::Value>,
    pub max_concurrent_tasks: usize,
    pub max_retries: u32,
}

impl ProjectConstraints {
    /// Constraints taken from request options
    #[must_use]
    pub fn from_options(options: &Bag) -> Self {
        Self {
            timeout: options.get("timeout").cloned(),
            budget: options.get("budget").cloned(),
            ..Self::default()
        }
    }
}

impl Default for ProjectConstraints {
    fn default() -> Self {
        Self {
            timeout: None,
            budget: None,
            max_concurrent_tasks: 5,
            max_retries: 3,
        }
    }
}

/// Project-level state wrapped around the request's execution context
#[derive(Debug, Clone)]
pub struct ProjectContext {
    /// Shared by every sprint plan of the project
    pub execution: Arc<ExecutionContext>,
    pub started_at: DateTime<Utc>,
    pub goals: Vec<String>,
    pub constraints: ProjectConstraints,
}

/// A multi-sprint project
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub epics: Vec<Epic>,
    pub sprints: Vec<Sprint>,
    #[serde(skip)]
    pub context: ProjectContext,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Project {
    #[must_use]
    pub fn story(&self, id: StoryId) -> Option<&UserStory> {
        self.epics
            .iter()
            .flat_map(|e| e.stories.iter())
            .find(|s| s.id == id)
    }

    pub fn story_mut(&mut self, id: StoryId) -> Option<&mut UserStory> {
        self.epics
            .iter_mut()
            .flat_map(|e| e.stories.iter_mut())
            .find(|s| s.id == id)
    }

    /// Points across every story of every epic
    #[must_use]
    pub fn total_points(&self) -> u32 {
        self.epics.iter().map(Epic::points).sum()
    }

    /// Points across every story assigned to a sprint
    #[must_use]
    pub fn sprint_points(&self) -> u32 {
        self.sprints
            .iter()
            .flat_map(|s| s.story_ids.iter())
            .filter_map(|id| self.story(*id))
            .map(|s| s.points)
            .sum()
    }

    #[must_use]
    pub fn goals(&self) -> &[String] {
        &self.context.goals
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// What the analyzer extracted from a project request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAnalysis {
    pub raw_request: String,
    pub project_name: String,
    pub scope: Scope,
    /// `0.3..=1.0`
    pub complexity: f64,
    pub components: Vec<String>,
    pub requirements: Vec<String>,
}

/// Outcome of one sprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprintResult {
    pub sprint: SprintId,
    pub number: usize,
    pub success: bool,
    pub completed_stories: Vec<StoryId>,
    pub failed_stories: Vec<StoryId>,
    pub planned_points: u32,
    pub completed_points: u32,
    pub velocity: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Archived project
#[derive(Debug, Clone, Serialize)]
pub struct ProjectHistory {
    pub project: Project,
    pub result: CapabilityResult,
    pub sprint_results: Vec<SprintResult>,
    pub archived_at: DateTime<Utc>,
    pub lessons_learned: Vec<String>,
}

/// Lightweight view of a project that is currently executing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveProject {
    pub id: ProjectId,
    pub name: String,
    pub sprints: usize,
    pub started_at: DateTime<Utc>,
}
