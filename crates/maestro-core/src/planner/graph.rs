//! Execution graph construction
//!
//! Nodes are kept in insertion order, so the optimizer's stages list tasks
//! in the order templates declared them.

use crate::capability::CapabilityDirectory;
use crate::error::PlanningError;
use crate::planner::intent::Intent;
use crate::planner::templates::TemplateLibrary;
use crate::types::{CapabilityRequest, Task, TaskId};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Placement state of a node during leveling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Staged,
}

/// One task in the graph
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub task: Task,
    pub status: NodeStatus,
    /// Tasks this one waits for
    pub dependencies: Vec<TaskId>,
    /// Tasks waiting for this one
    pub dependents: Vec<TaskId>,
}

/// Dependency graph, built once and consumed by the optimizer
#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    nodes: IndexMap<TaskId, GraphNode>,
    /// task id to the ids of tasks that depend on it
    edges: IndexMap<TaskId, Vec<TaskId>>,
}

impl ExecutionGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph over `tasks`, with edges taken from each task's declared
    /// dependencies. Dependencies on ids outside the set are kept on the
    /// node, so the optimizer can report them.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task);
        }
        graph.link();
        graph
    }

    /// Add a node; edges are built by [`ExecutionGraph::link`]
    pub fn add_task(&mut self, task: Task) {
        let dependencies = task.dependencies.clone();
        self.nodes.insert(
            task.id,
            GraphNode {
                task,
                status: NodeStatus::Pending,
                dependencies,
                dependents: Vec::new(),
            },
        );
    }

    /// Rebuild edges and dependent lists from the nodes' dependencies
    pub fn link(&mut self) {
        self.edges.clear();
        for node in self.nodes.values_mut() {
            node.dependents.clear();
        }

        let pairs: Vec<(TaskId, TaskId)> = self
            .nodes
            .values()
            .flat_map(|node| node.dependencies.iter().map(move |dep| (*dep, node.task.id)))
            .collect();

        for (dependency, dependent) in pairs {
            self.edges.entry(dependency).or_default().push(dependent);
            if let Some(node) = self.nodes.get_mut(&dependency) {
                node.dependents.push(dependent);
            }
        }
    }

    #[must_use]
    pub fn node(&self, id: TaskId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: TaskId) -> Option<&mut GraphNode> {
        self.nodes.get_mut(&id)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// Ids of tasks depending on `id`
    #[must_use]
    pub fn dependents(&self, id: TaskId) -> &[TaskId] {
        self.edges.get(&id).map_or(&[], Vec::as_slice)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn into_tasks(self) -> Vec<Task> {
        self.nodes.into_values().map(|node| node.task).collect()
    }
}

/// Turns an intent into a graph using the template library
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    templates: TemplateLibrary,
}

impl GraphBuilder {
    #[must_use]
    pub fn new(templates: TemplateLibrary) -> Self {
        Self { templates }
    }

    #[must_use]
    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    /// Build the graph for `intent`.
    ///
    /// Template steps naming an unregistered capability are skipped, and
    /// dependencies on skipped steps are dropped from their dependents.
    ///
    /// # Errors
    /// - `PlanningError::NoTemplate` if the category has no template
    /// - `PlanningError::NoAvailableCapabilities` if every step was skipped
    pub fn build<D>(&self, intent: &Intent, directory: &D) -> Result<ExecutionGraph, PlanningError>
    where
        D: CapabilityDirectory + ?Sized,
    {
        let template = self
            .templates
            .get(intent.primary)
            .ok_or_else(|| PlanningError::NoTemplate(intent.primary.to_string()))?;

        let mut slots: HashMap<&str, TaskId> = HashMap::new();
        let mut tasks = Vec::with_capacity(template.steps.len());

        for step in &template.steps {
            if directory.lookup(&step.capability).is_none() {
                tracing::warn!(
                    capability = %step.capability,
                    step = %step.key,
                    intent = %intent.primary,
                    "capability not registered, skipping template step"
                );
                continue;
            }

            let mut task = Task::new(&step.capability, CapabilityRequest::new(step.render(intent)))
                .with_priority(step.priority);
            for key in &step.after {
                match slots.get(key.as_str()) {
                    Some(dep) => task = task.depends_on(*dep),
                    None => tracing::warn!(
                        step = %step.key,
                        dependency = %key,
                        "dependency was skipped, dropping edge"
                    ),
                }
            }
            slots.insert(step.key.as_str(), task.id);
            tasks.push(task);
        }

        if tasks.is_empty() {
            return Err(PlanningError::NoAvailableCapabilities(
                intent.primary.to_string(),
            ));
        }
        Ok(ExecutionGraph::from_tasks(tasks))
    }
}
