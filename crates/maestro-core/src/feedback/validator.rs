//! Rule-based validation of feedback reports

use crate::error::TaskExecutionError;
use crate::feedback::{FeedbackRequest, ValidationIssue};
use crate::types::TaskId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What a rule thinks would fix the reported problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suggestion {
    /// Give the task more time; carries the deadline it failed under, if known
    ExtendTimeout { current: Option<Duration> },
    /// Ask the capability for a detailed report
    RequestDetail,
}

/// Combined verdict of every applicable rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Task the report is about
    pub task: TaskId,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub can_auto_correct: bool,
    pub suggestions: Vec<Suggestion>,
}

impl ValidationReport {
    fn valid(task: TaskId) -> Self {
        Self {
            task,
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            can_auto_correct: false,
            suggestions: Vec::new(),
        }
    }

    fn merge(&mut self, verdict: RuleVerdict) {
        if !verdict.errors.is_empty() {
            self.is_valid = false;
            self.errors.extend(verdict.errors);
        }
        self.warnings.extend(verdict.warnings);
        if let Some(suggestion) = verdict.suggestion {
            self.can_auto_correct = true;
            self.suggestions.push(suggestion);
        }
    }
}

/// One rule's contribution to a report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleVerdict {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Present when the rule knows an automatic fix
    pub suggestion: Option<Suggestion>,
}

/// A single validation rule over the issue attached to a feedback request
pub trait ValidationRule: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn applies(&self, issue: &ValidationIssue) -> bool;

    fn validate(&self, issue: &ValidationIssue) -> RuleVerdict;
}

/// Errors the reporter listed explicitly
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportedErrorsRule;

impl ValidationRule for ReportedErrorsRule {
    fn name(&self) -> &'static str {
        "reported_errors"
    }

    fn applies(&self, issue: &ValidationIssue) -> bool {
        !issue.errors.is_empty()
    }

    fn validate(&self, issue: &ValidationIssue) -> RuleVerdict {
        RuleVerdict {
            errors: issue.errors.clone(),
            ..RuleVerdict::default()
        }
    }
}

/// Deadline overruns, detected from the typed error or from the text
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutRule;

impl TimeoutRule {
    fn mentions_timeout(text: &str) -> bool {
        let lower = text.to_lowercase();
        lower.contains("timeout") || lower.contains("timed out")
    }
}

impl ValidationRule for TimeoutRule {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn applies(&self, issue: &ValidationIssue) -> bool {
        matches!(issue.error, Some(TaskExecutionError::TimedOut { .. }))
            || Self::mentions_timeout(&issue.message)
            || issue.errors.iter().any(|e| Self::mentions_timeout(e))
    }

    fn validate(&self, issue: &ValidationIssue) -> RuleVerdict {
        let current = match &issue.error {
            Some(TaskExecutionError::TimedOut { timeout, .. }) => Some(*timeout),
            _ => issue.timeout,
        };
        RuleVerdict {
            errors: vec!["task exceeded its deadline".to_string()],
            warnings: Vec::new(),
            suggestion: Some(Suggestion::ExtendTimeout { current }),
        }
    }
}

/// A result that claims success but carries no output
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyOutputRule;

impl ValidationRule for EmptyOutputRule {
    fn name(&self) -> &'static str {
        "empty_output"
    }

    fn applies(&self, issue: &ValidationIssue) -> bool {
        issue.result.as_ref().map_or(false, |r| {
            r.success && r.summary.trim().is_empty() && r.details.trim().is_empty()
        })
    }

    fn validate(&self, _issue: &ValidationIssue) -> RuleVerdict {
        RuleVerdict {
            errors: vec!["capability reported success without output".to_string()],
            warnings: Vec::new(),
            suggestion: Some(Suggestion::RequestDetail),
        }
    }
}

/// Runs every applicable rule and merges their verdicts
#[derive(Debug)]
pub struct ResultValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ResultValidator {
    #[must_use]
    pub fn new(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    /// Analyze the issue attached to `request`. A request without an issue
    /// produces a valid, non-correctable report.
    #[must_use]
    pub fn analyze(&self, request: &FeedbackRequest) -> ValidationReport {
        let mut report = ValidationReport::valid(request.target_task);
        let Some(issue) = request.payload.issue() else {
            return report;
        };

        for rule in &self.rules {
            if rule.applies(issue) {
                tracing::debug!(rule = rule.name(), task_id = %request.target_task, "validation rule applies");
                report.merge(rule.validate(issue));
            }
        }
        report
    }
}

impl Default for ResultValidator {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ReportedErrorsRule),
            Box::new(TimeoutRule),
            Box::new(EmptyOutputRule),
        ])
    }
}
