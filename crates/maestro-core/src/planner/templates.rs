//! Plan templates: intent category to capability invocations

use crate::capability::names;
use crate::planner::intent::{EntityKind, Intent, IntentCategory};
use std::collections::HashMap;

/// One capability invocation within a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateStep {
    /// Template-local name other steps depend on
    pub key: String,
    pub capability: String,
    /// Prompt with `{raw_prompt}`, `{target}` and `{path}` placeholders
    pub prompt: String,
    pub priority: i32,
    /// Keys of steps that must run first
    pub after: Vec<String>,
}

impl TemplateStep {
    pub fn new(key: impl Into<String>, capability: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            capability: capability.into(),
            prompt: prompt.into(),
            priority: 1,
            after: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn after(mut self, keys: &[&str]) -> Self {
        self.after.extend(keys.iter().map(|k| (*k).to_string()));
        self
    }

    /// Substitute placeholders. An unresolved `{target}` falls back to the
    /// extracted path and then to the raw prompt; `{path}` falls back to the
    /// raw prompt.
    #[must_use]
    pub fn render(&self, intent: &Intent) -> String {
        let target = intent
            .entity(EntityKind::Target)
            .or_else(|| intent.entity(EntityKind::Path))
            .unwrap_or(intent.raw.as_str());
        let path = intent.entity(EntityKind::Path).unwrap_or(intent.raw.as_str());

        self.prompt
            .replace("{raw_prompt}", &intent.raw)
            .replace(EntityKind::Target.placeholder(), target)
            .replace(EntityKind::Path.placeholder(), path)
    }
}

/// Ordered steps for one intent category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTemplate {
    pub category: IntentCategory,
    pub steps: Vec<TemplateStep>,
}

/// Static mapping from intent category to plan template
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: HashMap<IntentCategory, PlanTemplate>,
}

impl TemplateLibrary {
    /// Empty library
    #[must_use]
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// The built-in templates
    #[must_use]
    pub fn standard() -> Self {
        let mut library = Self::empty();

        library.insert(PlanTemplate {
            category: IntentCategory::CodeReview,
            steps: vec![
                TemplateStep::new(
                    "read",
                    names::FILE_OPERATIONS,
                    "List and read all files in {target}",
                ),
                TemplateStep::new(
                    "analyze",
                    names::CODE_ANALYSIS,
                    "Analyze code structure and patterns in {target}",
                )
                .with_priority(2)
                .after(&["read"]),
                TemplateStep::new(
                    "review",
                    names::CODE_REVIEW,
                    "Perform comprehensive code review of {target}",
                )
                .with_priority(3)
                .after(&["read", "analyze"]),
            ],
        });

        for (category, capability) in [
            (IntentCategory::FileOperation, names::FILE_OPERATIONS),
            (IntentCategory::Search, names::SEARCH),
            (IntentCategory::Analysis, names::CODE_ANALYSIS),
            (IntentCategory::Test, names::DISPATCHER),
            (IntentCategory::Generic, names::DISPATCHER),
        ] {
            library.insert(PlanTemplate {
                category,
                steps: vec![TemplateStep::new("run", capability, "{raw_prompt}")],
            });
        }

        library.insert(PlanTemplate {
            category: IntentCategory::Refactor,
            steps: vec![
                TemplateStep::new(
                    "analyze",
                    names::CODE_ANALYSIS,
                    "Analyze code for refactoring: {raw_prompt}",
                ),
                TemplateStep::new("apply", names::FILE_OPERATIONS, "Apply refactoring changes")
                    .with_priority(2)
                    .after(&["analyze"]),
            ],
        });

        library
    }

    /// Add or replace the template for its category
    pub fn insert(&mut self, template: PlanTemplate) {
        self.templates.insert(template.category, template);
    }

    #[must_use]
    pub fn get(&self, category: IntentCategory) -> Option<&PlanTemplate> {
        self.templates.get(&category)
    }
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::intent::IntentAnalyzer;

    #[test]
    fn every_category_has_a_template() {
        let library = TemplateLibrary::standard();
        for category in [
            IntentCategory::CodeReview,
            IntentCategory::FileOperation,
            IntentCategory::Search,
            IntentCategory::Analysis,
            IntentCategory::Refactor,
            IntentCategory::Test,
            IntentCategory::Generic,
        ] {
            assert!(library.get(category).is_some(), "missing {category}");
        }
    }

    #[test]
    fn render_substitutes_entities() {
        let intent = IntentAnalyzer::new()
            .analyze("code review of billing in services/billing")
            .unwrap();
        let library = TemplateLibrary::standard();
        let review = &library.get(IntentCategory::CodeReview).unwrap().steps[2];

        assert_eq!(
            review.render(&intent),
            "Perform comprehensive code review of billing"
        );
    }

    #[test]
    fn render_falls_back_to_raw_prompt() {
        let intent = IntentAnalyzer::new().analyze("review everything").unwrap();
        let step = TemplateStep::new("x", "code_review", "Review {target} at {path}");
        assert_eq!(
            step.render(&intent),
            "Review review everything at review everything"
        );
    }
}
