//! Occurrence counting for feedback that could not be auto-corrected

use crate::feedback::validator::ValidationReport;
use crate::feedback::FeedbackRequest;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A recurring feedback pattern, keyed `{type}_{task}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub key: String,
    pub kind: String,
    pub occurrences: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Errors from the most recent occurrence
    pub last_errors: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PatternLearner {
    patterns: DashMap<String, Pattern>,
}

impl PatternLearner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence and return the updated pattern
    pub fn record(&self, request: &FeedbackRequest, report: &ValidationReport) -> Pattern {
        let key = format!("{}_{}", request.kind, request.target_task);
        let now = Utc::now();
        let mut entry = self.patterns.entry(key.clone()).or_insert_with(|| Pattern {
            key,
            kind: request.kind.to_string(),
            occurrences: 0,
            first_seen: now,
            last_seen: now,
            last_errors: Vec::new(),
        });
        entry.occurrences += 1;
        entry.last_seen = now;
        entry.last_errors.clone_from(&report.errors);
        tracing::debug!(pattern = %entry.key, occurrences = entry.occurrences, "recorded feedback pattern");
        entry.clone()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Pattern> {
        self.patterns.get(key).map(|p| p.clone())
    }

    /// All patterns, most frequent first
    #[must_use]
    pub fn patterns(&self) -> Vec<Pattern> {
        let mut all: Vec<Pattern> = self.patterns.iter().map(|p| p.value().clone()).collect();
        all.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then_with(|| a.key.cmp(&b.key)));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
