//! Rule-based intent classification
//!
//! Best-effort category and entity extraction. This is substring matching
//! against an ordered rule table, not language understanding.

use crate::error::PlanningError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Primary intent category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    CodeReview,
    FileOperation,
    Search,
    Analysis,
    Refactor,
    Test,
    Generic,
}

impl IntentCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeReview => "code_review",
            Self::FileOperation => "file_operation",
            Self::Search => "search",
            Self::Analysis => "analysis",
            Self::Refactor => "refactor",
            Self::Test => "test",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories that may co-occur with the primary one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryIntent {
    Test,
    Document,
    Optimize,
    Fix,
    Analyze,
}

/// Entities a rule may ask the analyzer to extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A path-shaped token
    Path,
    /// The text following " of "
    Target,
}

impl EntityKind {
    /// Placeholder used in prompt templates
    #[must_use]
    pub fn placeholder(self) -> &'static str {
        match self {
            Self::Path => "{path}",
            Self::Target => "{target}",
        }
    }
}

/// Classified request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub primary: IntentCategory,
    pub secondary: Vec<SecondaryIntent>,
    pub entities: BTreeMap<EntityKind, String>,
    pub confidence: f64,
    /// The request text as received
    pub raw: String,
}

impl Intent {
    #[must_use]
    pub fn entity(&self, kind: EntityKind) -> Option<&str> {
        self.entities.get(&kind).map(String::as_str)
    }

    #[must_use]
    pub fn has_secondary(&self, secondary: SecondaryIntent) -> bool {
        self.secondary.contains(&secondary)
    }
}

/// One row of the rule table
#[derive(Debug, Clone, Copy)]
pub struct IntentRule {
    pub pattern: &'static str,
    pub category: IntentCategory,
    pub hints: &'static [EntityKind],
}

const RULES: &[IntentRule] = &[
    IntentRule {
        pattern: "code review",
        category: IntentCategory::CodeReview,
        hints: &[EntityKind::Target, EntityKind::Path],
    },
    IntentRule {
        pattern: "review",
        category: IntentCategory::CodeReview,
        hints: &[EntityKind::Target, EntityKind::Path],
    },
    IntentRule {
        pattern: "analyze",
        category: IntentCategory::Analysis,
        hints: &[EntityKind::Target, EntityKind::Path],
    },
    IntentRule {
        pattern: "create file",
        category: IntentCategory::FileOperation,
        hints: &[EntityKind::Path],
    },
    IntentRule {
        pattern: "read file",
        category: IntentCategory::FileOperation,
        hints: &[EntityKind::Path],
    },
    IntentRule {
        pattern: "search for",
        category: IntentCategory::Search,
        hints: &[EntityKind::Target],
    },
    IntentRule {
        pattern: "find",
        category: IntentCategory::Search,
        hints: &[EntityKind::Target],
    },
    IntentRule {
        pattern: "refactor",
        category: IntentCategory::Refactor,
        hints: &[EntityKind::Target, EntityKind::Path],
    },
    IntentRule {
        pattern: "test",
        category: IntentCategory::Test,
        hints: &[EntityKind::Target, EntityKind::Path],
    },
];

const SECONDARY_RULES: &[(&[&str], SecondaryIntent)] = &[
    (&["and test", "with tests"], SecondaryIntent::Test),
    (&["document", "with docs"], SecondaryIntent::Document),
    (&["optimize", "performance"], SecondaryIntent::Optimize),
    (&["fix", "repair", "and correct"], SecondaryIntent::Fix),
    (&["analyze"], SecondaryIntent::Analyze),
];

const MATCHED_CONFIDENCE: f64 = 0.8;
const GENERIC_CONFIDENCE: f64 = 0.5;

static PATH_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:/?(?:[\w.~-]+/)+[\w.-]*|[\w.-]+\.(?:rs|go|py|ts|tsx|js|jsx|toml|json|ya?ml|md|txt|c|h|cpp|hpp|java|kt|rb|sh))$",
    )
    .expect("path pattern is a valid regex")
});

/// Classifies free text against the rule table
#[derive(Debug, Clone, Copy)]
pub struct IntentAnalyzer {
    rules: &'static [IntentRule],
}

impl Default for IntentAnalyzer {
    fn default() -> Self {
        Self { rules: RULES }
    }
}

impl IntentAnalyzer {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `text`
    ///
    /// # Errors
    /// `PlanningError::EmptyRequest` for blank input
    pub fn analyze(&self, text: &str) -> Result<Intent, PlanningError> {
        let raw = text.trim();
        if raw.is_empty() {
            return Err(PlanningError::EmptyRequest);
        }
        let lower = raw.to_lowercase();

        let mut intent = Intent {
            primary: IntentCategory::Generic,
            secondary: Vec::new(),
            entities: BTreeMap::new(),
            confidence: GENERIC_CONFIDENCE,
            raw: raw.to_string(),
        };

        if let Some(rule) = self.rules.iter().find(|r| lower.contains(r.pattern)) {
            intent.primary = rule.category;
            intent.confidence = MATCHED_CONFIDENCE;
            for hint in rule.hints {
                let value = match hint {
                    EntityKind::Path => extract_path(raw),
                    EntityKind::Target => extract_target(raw),
                };
                if let Some(value) = value {
                    intent.entities.insert(*hint, value);
                }
            }
        }

        for (patterns, secondary) in SECONDARY_RULES {
            if patterns.iter().any(|p| lower.contains(p)) {
                intent.secondary.push(*secondary);
            }
        }

        tracing::debug!(
            primary = %intent.primary,
            confidence = intent.confidence,
            entities = intent.entities.len(),
            "analyzed intent"
        );
        Ok(intent)
    }
}

fn clean_token(token: &str) -> &str {
    token
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | ',' | ';' | ':' | '(' | ')'))
        .trim_end_matches(['.', '?', '!'])
}

/// First whitespace-delimited token with a path-like shape
fn extract_path(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(clean_token)
        .find(|token| !token.is_empty() && PATH_SHAPE.is_match(token))
        .map(str::to_string)
}

/// The word following " of ", matched case-insensitively
fn extract_target(text: &str) -> Option<String> {
    const MARKER: &[u8] = b" of ";
    let start = text
        .as_bytes()
        .windows(MARKER.len())
        .position(|window| window.eq_ignore_ascii_case(MARKER))?
        + MARKER.len();
    // an all-ASCII match always ends on a char boundary
    let word = text[start..]
        .split(|c: char| c == ' ' || c == ',' || c == ';')
        .find(|w| !w.is_empty())?;
    let word = clean_token(word);
    (!word.is_empty()).then(|| word.to_string())
}
