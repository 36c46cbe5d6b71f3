//! Flat request planning
//!
//! Intent analysis, template lookup, graph construction and stage leveling,
//! plus the heuristic deciding when a request is project-scale instead.

pub mod graph;
pub mod intent;
pub mod optimizer;
pub mod templates;

pub use graph::{ExecutionGraph, GraphBuilder, GraphNode, NodeStatus};
pub use intent::{EntityKind, Intent, IntentAnalyzer, IntentCategory, SecondaryIntent};
pub use optimizer::PlanOptimizer;
pub use templates::{PlanTemplate, TemplateLibrary, TemplateStep};

use crate::config::MaestroConfig;
use crate::context::ExecutionContext;
use crate::coordinator::{Coordinator, CoordinatorLink};
use crate::error::PlanningError;
use crate::types::ExecutionPlan;
use std::sync::Weak;

const PROJECT_INDICATORS: &[&str] = &[
    "project",
    "system",
    "application",
    "feature set",
    "multiple components",
    "architecture",
    "full implementation",
];

/// Builds flat execution plans
#[derive(Debug)]
pub struct Planner {
    analyzer: IntentAnalyzer,
    builder: GraphBuilder,
    optimizer: PlanOptimizer,
    coordinator: CoordinatorLink,
    project_word_threshold: usize,
}

impl Planner {
    #[must_use]
    pub fn new(config: &MaestroConfig) -> Self {
        Self::with_templates(config, TemplateLibrary::standard())
    }

    #[must_use]
    pub fn with_templates(config: &MaestroConfig, templates: TemplateLibrary) -> Self {
        Self {
            analyzer: IntentAnalyzer::new(),
            builder: GraphBuilder::new(templates),
            optimizer: PlanOptimizer::from_config(&config.planning),
            coordinator: CoordinatorLink::new(),
            project_word_threshold: config.planning.project_word_threshold,
        }
    }

    /// Wire the back-reference used to reach the capability directory
    pub fn set_coordinator(&self, coordinator: Weak<dyn Coordinator>) {
        if !self.coordinator.wire(coordinator) {
            tracing::warn!("planner coordinator already wired");
        }
    }

    #[must_use]
    pub fn analyzer(&self) -> &IntentAnalyzer {
        &self.analyzer
    }

    /// Analyze, build and level a plan for `request`
    ///
    /// # Errors
    /// Any `PlanningError`; nothing from a failed plan is executed
    pub fn create_execution_plan(
        &self,
        request: &str,
        context: &ExecutionContext,
    ) -> Result<ExecutionPlan, PlanningError> {
        let intent = self.analyzer.analyze(request)?;
        let coordinator = self.coordinator.get()?;
        let graph = self.builder.build(&intent, &*coordinator)?;
        let plan = self.optimizer.optimize(graph, context)?;

        tracing::info!(
            plan_id = %plan.id,
            intent = %intent.primary,
            confidence = intent.confidence,
            tasks = plan.tasks.len(),
            stages = plan.stages.len(),
            "created execution plan"
        );
        Ok(plan)
    }

    /// Whether `text` should go to the hierarchical planner
    #[must_use]
    pub fn is_project_level_request(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        PROJECT_INDICATORS.iter().any(|i| lower.contains(i))
            || text.split_whitespace().count() > self.project_word_threshold
    }
}
