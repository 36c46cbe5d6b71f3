//! Automatic corrections for auto-correctable validation reports

use crate::feedback::validator::{Suggestion, ValidationReport};
use crate::types::TaskId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Deadline assumed when a timed-out task did not report one
pub const ASSUMED_TIMEOUT: Duration = Duration::from_secs(30);

/// One concrete change a correction makes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CorrectionAction {
    /// Record a new deadline for the task
    SetTimeout { task: TaskId, timeout: Duration },
    /// Append an instruction to the task's next prompt
    AmendPrompt { task: TaskId, addition: String },
}

/// A generated correction, recorded in the context once applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    /// Strategy that produced it
    pub strategy: String,
    pub description: String,
    pub task: TaskId,
    pub actions: Vec<CorrectionAction>,
}

pub trait CorrectionStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, report: &ValidationReport) -> bool;

    fn generate(&self, report: &ValidationReport) -> Option<Correction>;
}

/// Doubles the task's deadline
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendTimeout;

impl ExtendTimeout {
    fn current(report: &ValidationReport) -> Option<Option<Duration>> {
        report.suggestions.iter().find_map(|s| match s {
            Suggestion::ExtendTimeout { current } => Some(*current),
            Suggestion::RequestDetail => None,
        })
    }
}

impl CorrectionStrategy for ExtendTimeout {
    fn name(&self) -> &'static str {
        "extend_timeout"
    }

    fn can_handle(&self, report: &ValidationReport) -> bool {
        Self::current(report).is_some()
    }

    fn generate(&self, report: &ValidationReport) -> Option<Correction> {
        let current = Self::current(report)?.unwrap_or(ASSUMED_TIMEOUT);
        let timeout = current.saturating_mul(2);
        Some(Correction {
            strategy: self.name().to_string(),
            description: format!("extend deadline from {current:?} to {timeout:?}"),
            task: report.task,
            actions: vec![CorrectionAction::SetTimeout {
                task: report.task,
                timeout,
            }],
        })
    }
}

/// Asks the capability for a detailed report next time
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestDetail;

impl CorrectionStrategy for RequestDetail {
    fn name(&self) -> &'static str {
        "request_detail"
    }

    fn can_handle(&self, report: &ValidationReport) -> bool {
        report.suggestions.contains(&Suggestion::RequestDetail)
    }

    fn generate(&self, report: &ValidationReport) -> Option<Correction> {
        Some(Correction {
            strategy: self.name().to_string(),
            description: "request a detailed report".to_string(),
            task: report.task,
            actions: vec![CorrectionAction::AmendPrompt {
                task: report.task,
                addition: "Provide a detailed report of the work performed.".to_string(),
            }],
        })
    }
}

/// First matching strategy wins
#[derive(Debug)]
pub struct AutoCorrector {
    strategies: Vec<Box<dyn CorrectionStrategy>>,
}

impl AutoCorrector {
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn CorrectionStrategy>>) -> Self {
        Self { strategies }
    }

    #[must_use]
    pub fn generate(&self, report: &ValidationReport) -> Option<Correction> {
        self.strategies
            .iter()
            .find(|s| s.can_handle(report))
            .and_then(|s| s.generate(report))
    }
}

impl Default for AutoCorrector {
    fn default() -> Self {
        Self::new(vec![Box::new(ExtendTimeout), Box::new(RequestDetail)])
    }
}
