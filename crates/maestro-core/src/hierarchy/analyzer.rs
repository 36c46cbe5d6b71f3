//! Keyword analysis of project-scale requests

use crate::hierarchy::model::{ProjectAnalysis, Scope};

const COMPLEXITY_KEYWORDS: &[&str] = &[
    "integrate",
    "multiple",
    "complex",
    "distributed",
    "architecture",
    "system",
];

const COMPONENT_KEYWORDS: &[&str] = &[
    "frontend",
    "backend",
    "database",
    "api",
    "service",
    "module",
    "component",
];

const SCALE_KEYWORDS: &[&str] = &[
    "project",
    "implement",
    "build",
    "create system",
    "develop",
    "multiple",
    "phases",
    "sprints",
    "epic",
    "feature set",
    "coordinate",
    "manage",
    "orchestrate",
    "plan and execute",
    "application",
    "complete",
    "full",
];

const SYSTEM_KEYWORDS: &[&str] = &[
    "system",
    "architecture",
    "distributed",
    "microservices",
    "frontend",
    "backend",
    "database",
    "infrastructure",
];

const NAME_WORDS: usize = 3;

/// Extracts name, scope, complexity, components and requirements
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectAnalyzer;

impl ProjectAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn analyze(&self, request: &str) -> ProjectAnalysis {
        let lower = request.to_lowercase();
        ProjectAnalysis {
            raw_request: request.to_string(),
            project_name: project_name(request),
            scope: scope(request),
            complexity: complexity(&lower),
            components: COMPONENT_KEYWORDS
                .iter()
                .filter(|k| lower.contains(*k))
                .map(|k| (*k).to_string())
                .collect(),
            requirements: requirements(&lower),
        }
    }

    /// Goals stated or implied by the request
    #[must_use]
    pub fn goals(&self, request: &str) -> Vec<String> {
        let lower = request.to_lowercase();
        let mut goals = Vec::new();
        if lower.contains("implement") {
            goals.push("Complete implementation".to_string());
        }
        if lower.contains("test") {
            goals.push("Ensure quality through testing".to_string());
        }
        if lower.contains("document") {
            goals.push("Provide comprehensive documentation".to_string());
        }
        if goals.is_empty() {
            goals.push("Successfully complete the requested task".to_string());
        }
        goals
    }

    /// Willingness and confidence to treat `text` as a project, in the
    /// same shape as `Capability::can_handle`
    #[must_use]
    pub fn score(&self, text: &str) -> (bool, f64) {
        let lower = text.to_lowercase();
        let mut score = 0.0;

        for keyword in SCALE_KEYWORDS.iter().chain(SYSTEM_KEYWORDS) {
            if lower.contains(keyword) {
                score += 0.15;
            }
        }
        if lower.contains("large") || lower.contains("complex") {
            score += 0.2;
        }
        let components = ["frontend", "backend", "database", "api", "service", "module"]
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        if components >= 2 {
            score += 0.3;
        }
        if lower.matches("and").count() >= 2 {
            score += 0.1;
        }

        let score = f64::min(score, 1.0);
        (score > 0.3, score)
    }
}

fn project_name(request: &str) -> String {
    let words: Vec<&str> = request.split_whitespace().collect();
    if words.len() > NAME_WORDS {
        words[..NAME_WORDS].join(" ")
    } else {
        "Project".to_string()
    }
}

fn scope(request: &str) -> Scope {
    match request.split_whitespace().count() {
        n if n > 100 => Scope::Large,
        n if n > 50 => Scope::Medium,
        _ => Scope::Small,
    }
}

/// Base 0.3 plus 0.1 per keyword, counted in tenths so the capacity formula
/// sees exact values
fn complexity(lower: &str) -> f64 {
    let hits = COMPLEXITY_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count();
    let tenths = (3 + hits).min(10);
    f64::from(u32::try_from(tenths).unwrap_or(10)) / 10.0
}

fn requirements(lower: &str) -> Vec<String> {
    let mut found = Vec::new();
    if lower.contains("test") {
        found.push("testing".to_string());
    }
    if lower.contains("document") {
        found.push("documentation".to_string());
    }
    if lower.contains("secure") || lower.contains("security") {
        found.push("security".to_string());
    }
    found
}
