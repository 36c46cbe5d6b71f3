//! Story decomposition
//!
//! Turns a user story into executable tasks by keyword match on its title.
//! When several kinds match, design precedes implementation and
//! implementation precedes testing.

use crate::capability::names;
use crate::error::PlanningError;
use crate::hierarchy::model::{StoryPlan, UserStory};
use crate::types::{CapabilityRequest, ExecutionPlan, ProjectId, StoryRef, Task};
use std::time::Duration;

const MINUTE: u64 = 60;

/// Task decomposer for user stories
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskDecomposer;

impl TaskDecomposer {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Decompose one story into tasks; always at least one
    #[must_use]
    pub fn decompose(&self, project: ProjectId, story: &UserStory) -> Vec<Task> {
        let title = story.title.to_lowercase();
        let mut tasks: Vec<Task> = Vec::new();

        if title.contains("design") {
            tasks.push(self.task(
                project,
                story,
                names::CODE_ANALYSIS,
                format!("Design and analyze architecture for: {}", story.description),
                30,
            ));
        }
        if title.contains("implement") {
            tasks.push(self.task(
                project,
                story,
                names::DISPATCHER,
                story.description.clone(),
                60,
            ));
        }
        if title.contains("test") {
            tasks.push(self.task(
                project,
                story,
                names::DISPATCHER,
                format!("Create comprehensive tests for: {}", story.description),
                30,
            ));
        }
        if tasks.is_empty() {
            tasks.push(self.task(
                project,
                story,
                names::DISPATCHER,
                story.description.clone(),
                45,
            ));
        }

        // Chain in push order
        for i in 1..tasks.len() {
            let previous = tasks[i - 1].id;
            tasks[i].dependencies.push(previous);
        }
        tasks
    }

    /// Decompose and level one story into its own plan
    ///
    /// # Errors
    /// Propagates leveling errors; a decomposed story has no cycles, so
    /// this does not fail in practice
    pub fn plan_story(
        &self,
        project: ProjectId,
        story: &UserStory,
    ) -> Result<StoryPlan, PlanningError> {
        let plan = ExecutionPlan::from_tasks(self.decompose(project, story))?;
        Ok(StoryPlan {
            story: story.id,
            plan,
        })
    }

    fn task(
        &self,
        project: ProjectId,
        story: &UserStory,
        capability: &str,
        prompt: String,
        minutes: u64,
    ) -> Task {
        let request = CapabilityRequest::new(prompt).with_story(StoryRef {
            project,
            story: story.id,
            title: story.title.clone(),
        });
        Task::new(capability, request)
            .with_priority(story.priority.0)
            .with_timeout(Duration::from_secs(minutes * MINUTE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::model::Priority;

    fn story(title: &str) -> UserStory {
        UserStory::new(title, "the widget", 5, Priority::HIGH)
    }

    #[test]
    fn design_story_goes_to_analysis() {
        let tasks = TaskDecomposer::new().decompose(ProjectId::new(), &story("Design widget architecture"));

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].capability, names::CODE_ANALYSIS);
        assert_eq!(
            tasks[0].request.prompt,
            "Design and analyze architecture for: the widget"
        );
        assert_eq!(tasks[0].timeout, Some(Duration::from_secs(30 * 60)));
        assert_eq!(tasks[0].priority, 10);
    }

    #[test]
    fn tasks_carry_story_reference() {
        let project = ProjectId::new();
        let story = story("Test widget");
        let tasks = TaskDecomposer::new().decompose(project, &story);

        let reference = tasks[0].request.context.story.as_ref().unwrap();
        assert_eq!(reference.project, project);
        assert_eq!(reference.story, story.id);
        assert_eq!(tasks[0].request.prompt, "Create comprehensive tests for: the widget");
    }

    #[test]
    fn unmatched_title_gets_default_task() {
        let tasks = TaskDecomposer::new().decompose(ProjectId::new(), &story("Polish widget"));

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].capability, names::DISPATCHER);
        assert_eq!(tasks[0].timeout, Some(Duration::from_secs(45 * 60)));
    }

    #[test]
    fn multiple_matches_are_chained_into_stages() {
        let plan = TaskDecomposer::new()
            .plan_story(ProjectId::new(), &story("Implement and test widget"))
            .unwrap();

        assert_eq!(plan.plan.tasks.len(), 2);
        assert_eq!(plan.plan.stages.len(), 2);
        assert_eq!(plan.plan.tasks[0].timeout, Some(Duration::from_secs(60 * 60)));
    }
}
