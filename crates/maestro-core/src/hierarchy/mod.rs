//! Hierarchical project planning and execution
//!
//! Project-scale requests are decomposed into epics, user stories and
//! capacity-bounded sprints. Every story becomes its own execution plan,
//! and sprints run strictly one after another through the coordinator.
//! A failed sprint never throws: it is recorded, triggers a priority
//! demotion of the sprints still in planning, and counts toward the
//! failure ratio that halts the remaining sprints.

pub mod analyzer;
pub mod decomposer;
pub mod epics;
pub mod model;
pub mod sprints;

pub use analyzer::ProjectAnalyzer;
pub use decomposer::TaskDecomposer;
pub use epics::EpicPlanner;
pub use model::{
    ActiveProject, Epic, EpicStatus, Priority, Project, ProjectAnalysis, ProjectConstraints,
    ProjectContext, ProjectHistory, ProjectStatus, Scope, Sprint, SprintResult, SprintStatus,
    StoryPlan, StoryStatus, UserStory,
};
pub use sprints::SprintPlanner;

use crate::config::MaestroConfig;
use crate::context::ExecutionContext;
use crate::coordinator::{Coordinator, CoordinatorLink};
use crate::error::PlanningError;
use crate::types::{CapabilityResult, ProjectId, StoryId, TaskResult};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Name results of project runs are attributed to
pub const COMPONENT: &str = "hierarchical_planner";

/// Plans and drives multi-sprint projects
#[derive(Debug)]
pub struct HierarchicalPlanner {
    analyzer: ProjectAnalyzer,
    epics: EpicPlanner,
    sprints: SprintPlanner,
    decomposer: TaskDecomposer,
    coordinator: CoordinatorLink,
    halt_failure_ratio: f64,
    active: DashMap<ProjectId, ActiveProject>,
    history: DashMap<ProjectId, ProjectHistory>,
}

impl HierarchicalPlanner {
    #[must_use]
    pub fn new(config: &MaestroConfig) -> Self {
        Self {
            analyzer: ProjectAnalyzer::new(),
            epics: EpicPlanner::new(),
            sprints: SprintPlanner::new(&config.project),
            decomposer: TaskDecomposer::new(),
            coordinator: CoordinatorLink::new(),
            halt_failure_ratio: config.project.halt_failure_ratio,
            active: DashMap::new(),
            history: DashMap::new(),
        }
    }

    /// Wire the back-reference sprints are executed through
    pub fn set_coordinator(&self, coordinator: Weak<dyn Coordinator>) {
        if !self.coordinator.wire(coordinator) {
            tracing::warn!("hierarchical planner coordinator already wired");
        }
    }

    #[must_use]
    pub fn analyzer(&self) -> &ProjectAnalyzer {
        &self.analyzer
    }

    /// Project-scale willingness score for `text`
    #[must_use]
    pub fn project_score(&self, text: &str) -> (bool, f64) {
        self.analyzer.score(text)
    }

    /// Goals and constraints for `request`, wrapped around `execution`
    #[must_use]
    pub fn project_context(&self, request: &str, execution: Arc<ExecutionContext>) -> ProjectContext {
        let constraints = ProjectConstraints::from_options(execution.options());
        ProjectContext {
            started_at: Utc::now(),
            goals: self.analyzer.goals(request),
            constraints,
            execution,
        }
    }

    /// Analyze `request` and build the full epic, sprint and story-plan
    /// hierarchy. Nothing is executed.
    ///
    /// # Errors
    /// `PlanningError::EmptyRequest` for blank text, or a leveling error
    /// from a story plan
    pub fn plan_project(
        &self,
        request: &str,
        context: ProjectContext,
    ) -> Result<Project, PlanningError> {
        if request.trim().is_empty() {
            return Err(PlanningError::EmptyRequest);
        }

        let analysis = self.analyzer.analyze(request);
        let epics = self.epics.plan(&analysis);
        let mut sprints = self
            .sprints
            .plan(&epics, analysis.complexity, context.started_at)?;

        let id = ProjectId::new();
        let stories: HashMap<StoryId, &UserStory> = epics
            .iter()
            .flat_map(|e| e.stories.iter())
            .map(|s| (s.id, s))
            .collect();
        for sprint in &mut sprints {
            for story_id in &sprint.story_ids {
                if let Some(story) = stories.get(story_id) {
                    sprint.plans.push(self.decomposer.plan_story(id, story)?);
                }
            }
        }

        let now = Utc::now();
        let project = Project {
            id,
            name: analysis.project_name,
            description: request.to_string(),
            epics,
            sprints,
            context,
            status: ProjectStatus::Planning,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        tracing::info!(
            project_id = %project.id,
            epics = project.epics.len(),
            sprints = project.sprints.len(),
            points = project.total_points(),
            complexity = analysis.complexity,
            scope = %analysis.scope,
            "created hierarchical project plan"
        );
        Ok(project)
    }

    /// Plan, execute and archive a project for `request`
    ///
    /// # Errors
    /// Planning errors, or `PlanningError::MissingCoordinator` when
    /// unwired. Failed sprints are reported in the result, not as errors.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        request: &str,
        execution: Arc<ExecutionContext>,
    ) -> Result<CapabilityResult, PlanningError> {
        let context = self.project_context(request, execution);
        let mut project = self.plan_project(request, context)?;

        self.active.insert(
            project.id,
            ActiveProject {
                id: project.id,
                name: project.name.clone(),
                sprints: project.sprints.len(),
                started_at: Utc::now(),
            },
        );

        match self.execute_project(cancel, &mut project).await {
            Ok((result, sprint_results)) => {
                let history = self.archive(project, result, sprint_results);
                Ok(history.result)
            }
            Err(err) => {
                self.active.remove(&project.id);
                Err(err)
            }
        }
    }

    /// Run every sprint of `project` in order
    ///
    /// # Errors
    /// `PlanningError::MissingCoordinator` when unwired; nothing runs
    pub async fn execute_project(
        &self,
        cancel: &CancellationToken,
        project: &mut Project,
    ) -> Result<(CapabilityResult, Vec<SprintResult>), PlanningError> {
        let coordinator = self.coordinator.get()?;
        let started_at = Utc::now();
        project.status = ProjectStatus::InProgress;
        project.touch();

        tracing::info!(project_id = %project.id, sprints = project.sprints.len(), "starting project");

        let mut results: Vec<SprintResult> = Vec::with_capacity(project.sprints.len());
        let mut halted = false;
        for index in 0..project.sprints.len() {
            if cancel.is_cancelled() || !self.should_continue(&results) {
                halted = true;
                for sprint in &mut project.sprints[index..] {
                    sprint.status = SprintStatus::Cancelled;
                }
                tracing::warn!(
                    project_id = %project.id,
                    sprint = index + 1,
                    cancelled = cancel.is_cancelled(),
                    "halting remaining sprints"
                );
                break;
            }

            let result = self
                .execute_sprint(cancel, &*coordinator, project, index)
                .await;
            if !result.success {
                self.adapt(project);
            }
            results.push(result);
        }

        let success = !halted && results.iter().all(|r| r.success);
        project.status = if success {
            ProjectStatus::Completed
        } else {
            ProjectStatus::Failed
        };
        project.completed_at = Some(Utc::now());
        project.touch();

        tracing::info!(
            project_id = %project.id,
            status = %project.status,
            sprints_run = results.len(),
            "project finished"
        );
        Ok((self.report(project, &results, started_at), results))
    }

    async fn execute_sprint(
        &self,
        cancel: &CancellationToken,
        coordinator: &dyn Coordinator,
        project: &mut Project,
        index: usize,
    ) -> SprintResult {
        let started_at = Utc::now();
        let execution = Arc::clone(&project.context.execution);
        let sprint = &mut project.sprints[index];
        sprint.status = SprintStatus::Active;
        let (sprint_id, number, planned_points) = (sprint.id, sprint.number, sprint.planned_points);
        let plans = sprint.plans.clone();

        tracing::info!(project_id = %project.id, sprint = number, stories = plans.len(), "starting sprint");

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut errors = Vec::new();
        let mut completed_points = 0;

        for story_plan in &plans {
            if let Some(story) = project.story_mut(story_plan.story) {
                story.status = StoryStatus::InProgress;
            }
            let ok = match coordinator
                .execute_with_plan(cancel, &story_plan.plan, &execution)
                .await
            {
                Ok(results) => results.iter().all(TaskResult::is_success),
                Err(err) => {
                    tracing::warn!(
                        project_id = %project.id,
                        sprint = number,
                        story_id = %story_plan.story,
                        error = %err,
                        "story plan failed to execute"
                    );
                    errors.push(err.to_string());
                    false
                }
            };

            if let Some(story) = project.story_mut(story_plan.story) {
                if ok {
                    story.status = StoryStatus::Done;
                    completed_points += story.points;
                } else {
                    story.status = StoryStatus::Blocked;
                }
            }
            if ok {
                completed.push(story_plan.story);
            } else {
                failed.push(story_plan.story);
            }
        }

        let sprint = &mut project.sprints[index];
        sprint.status = SprintStatus::Completed;
        sprint.velocity = completed_points;
        refresh_epics(project);
        project.touch();

        let success = failed.is_empty() && errors.is_empty();
        if !success {
            tracing::warn!(
                project_id = %project.id,
                sprint = number,
                failed_stories = failed.len(),
                "sprint failed"
            );
        }

        SprintResult {
            sprint: sprint_id,
            number,
            success,
            completed_stories: completed,
            failed_stories: failed,
            planned_points,
            completed_points,
            velocity: completed_points,
            started_at,
            ended_at: Utc::now(),
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        }
    }

    /// Whether to start the next sprint given the sprints run so far
    #[must_use]
    pub fn should_continue(&self, previous: &[SprintResult]) -> bool {
        if previous.is_empty() {
            return true;
        }
        let failed = previous.iter().filter(|r| !r.success).count();
        ratio(failed, previous.len()) <= self.halt_failure_ratio
    }

    /// Demote high-priority stories of sprints still in planning
    pub fn adapt(&self, project: &mut Project) {
        let pending: Vec<StoryId> = project
            .sprints
            .iter()
            .filter(|s| s.status == SprintStatus::Planning)
            .flat_map(|s| s.story_ids.iter().copied())
            .collect();

        let mut demoted = 0;
        for id in &pending {
            if let Some(story) = project.story_mut(*id) {
                let priority = story.priority.demote();
                if priority != story.priority {
                    story.priority = priority;
                    demoted += 1;
                }
            }
        }

        let priorities: HashMap<StoryId, Priority> = pending
            .iter()
            .filter_map(|id| project.story(*id).map(|s| (*id, s.priority)))
            .collect();
        for sprint in project
            .sprints
            .iter_mut()
            .filter(|s| s.status == SprintStatus::Planning)
        {
            for story_plan in &mut sprint.plans {
                if let Some(priority) = priorities.get(&story_plan.story) {
                    for task in &mut story_plan.plan.tasks {
                        task.priority = priority.0;
                    }
                }
            }
        }

        project.touch();
        tracing::info!(project_id = %project.id, demoted, "adapted remaining sprints");
    }

    /// Move a finished project from the active set into history
    pub fn archive(
        &self,
        project: Project,
        result: CapabilityResult,
        sprint_results: Vec<SprintResult>,
    ) -> ProjectHistory {
        let mut lessons = Vec::new();
        if !result.success {
            lessons.push("Project encountered challenges that need addressing".to_string());
        }
        for sprint in &sprint_results {
            if !sprint.success {
                lessons.push(format!(
                    "Sprint {} failed: {}",
                    sprint.number,
                    sprint
                        .error
                        .as_deref()
                        .unwrap_or("one or more stories did not complete")
                ));
            }
        }
        for sprint in project
            .sprints
            .iter()
            .filter(|s| s.status == SprintStatus::Cancelled)
        {
            lessons.push(format!("Sprint {} was halted before it started", sprint.number));
        }

        let id = project.id;
        let history = ProjectHistory {
            project,
            result,
            sprint_results,
            archived_at: Utc::now(),
            lessons_learned: lessons,
        };
        self.active.remove(&id);
        self.history.insert(id, history.clone());
        tracing::debug!(project_id = %id, "archived project");
        history
    }

    #[must_use]
    pub fn history(&self, id: ProjectId) -> Option<ProjectHistory> {
        self.history.get(&id).map(|h| h.clone())
    }

    #[must_use]
    pub fn active_projects(&self) -> Vec<ActiveProject> {
        self.active.iter().map(|p| p.value().clone()).collect()
    }

    fn report(
        &self,
        project: &Project,
        results: &[SprintResult],
        started_at: chrono::DateTime<Utc>,
    ) -> CapabilityResult {
        let successful = results.iter().filter(|r| r.success).count();
        let summary = format!(
            "Project '{}' completed: {}/{} sprints successful",
            project.name,
            successful,
            results.len()
        );

        let mut details = String::new();
        let _ = writeln!(details, "Project: {}", project.name);
        let _ = writeln!(details, "ID: {}", project.id);
        let _ = writeln!(details, "Status: {}", project.status);
        let _ = writeln!(details, "Duration: {}s", (Utc::now() - started_at).num_seconds());
        let _ = writeln!(details, "\nSprint Results:");
        for result in results {
            let _ = writeln!(details, "\nSprint {}:", result.number);
            let _ = writeln!(details, "  Success: {}", result.success);
            let _ = writeln!(
                details,
                "  Velocity: {}/{} points",
                result.velocity, result.planned_points
            );
            let _ = writeln!(
                details,
                "  Duration: {}ms",
                (result.ended_at - result.started_at).num_milliseconds()
            );
            if let Some(error) = &result.error {
                let _ = writeln!(details, "  Error: {error}");
            }
        }
        let _ = writeln!(details, "\nGoals Achievement:");
        for goal in project.goals() {
            let _ = writeln!(details, "- {goal}");
        }

        let base = if project.status == ProjectStatus::Completed {
            CapabilityResult::success(COMPONENT, summary)
        } else {
            CapabilityResult::failure(COMPONENT, summary, String::new())
        };
        base.with_details(details)
            .with_artifact("project_id", serde_json::Value::String(project.id.to_string()))
            .with_artifact("project", encode(project))
            .with_artifact("sprint_results", encode(results))
            .with_artifact(
                "velocity",
                serde_json::Value::from(results.iter().map(|r| r.velocity).sum::<u32>()),
            )
            .timed(started_at)
    }
}

fn refresh_epics(project: &mut Project) {
    for epic in &mut project.epics {
        let done = epic.stories.iter().filter(|s| s.status == StoryStatus::Done).count();
        let touched = epic
            .stories
            .iter()
            .filter(|s| s.status != StoryStatus::Todo)
            .count();
        epic.status = if done == epic.stories.len() {
            EpicStatus::Done
        } else if touched > 0 {
            EpicStatus::InProgress
        } else {
            EpicStatus::Todo
        };
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    let part = u32::try_from(part).unwrap_or(u32::MAX);
    let whole = u32::try_from(whole).unwrap_or(u32::MAX);
    f64::from(part) / f64::from(whole)
}

fn encode<T: Serialize + ?Sized>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "failed to encode project artifact");
        serde_json::Value::Null
    })
}
