//! Engine configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration.

use crate::capability::names;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Maestro configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaestroConfig {
    /// Worker count; the hard ceiling on concurrently running task units
    pub max_workers: usize,
    /// Bounded queue depth in front of the workers (default: 2 x workers)
    pub queue_depth: Option<usize>,
    /// Capacity of the progress sink attached by callers that observe progress
    pub progress_buffer: usize,
    /// Deadline in milliseconds applied to tasks that do not carry their own
    pub default_task_timeout_ms: Option<u64>,
    /// Capability used by need-more-context feedback
    pub context_capability: String,
    /// Capability used by correction feedback when auto-correction is impossible
    pub correction_capability: String,
    /// Planner heuristics
    pub planning: PlanningConfig,
    /// Hierarchical project settings
    pub project: ProjectConfig,
}

/// Planner heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Estimated seconds per task
    pub task_estimate_secs: u64,
    /// Estimated seconds per stage
    pub stage_estimate_secs: u64,
    /// Requests longer than this many words are treated as projects
    pub project_word_threshold: usize,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            task_estimate_secs: 2,
            stage_estimate_secs: 1,
            project_word_threshold: 50,
        }
    }
}

/// Hierarchical project settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Story points per sprint before complexity discount
    pub base_sprint_capacity: u32,
    /// Sprint length in days
    pub sprint_length_days: i64,
    /// Halt remaining sprints when the failed share of completed sprints
    /// exceeds this ratio
    pub halt_failure_ratio: f64,
}

impl ProjectConfig {
    /// Longest accepted sprint
    pub const MAX_SPRINT_LENGTH_DAYS: i64 = 365;
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            base_sprint_capacity: 40,
            sprint_length_days: 14,
            halt_failure_ratio: 0.5,
        }
    }
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            queue_depth: None,
            progress_buffer: 100,
            default_task_timeout_ms: None,
            context_capability: names::FILE_OPERATIONS.to_string(),
            correction_capability: names::CODE_REVIEW.to_string(),
            planning: PlanningConfig::default(),
            project: ProjectConfig::default(),
        }
    }
}

impl MaestroConfig {
    /// Create default config
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.default_task_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_progress_buffer(mut self, capacity: usize) -> Self {
        self.progress_buffer = capacity;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_context_capability(mut self, name: impl Into<String>) -> Self {
        self.context_capability = name.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_correction_capability(mut self, name: impl Into<String>) -> Self {
        self.correction_capability = name.into();
        self
    }

    /// Queue depth actually used by the worker pool
    #[must_use]
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth
            .unwrap_or(self.max_workers.saturating_mul(2))
            .max(1)
    }

    #[must_use]
    pub fn default_task_timeout(&self) -> Option<Duration> {
        self.default_task_timeout_ms.map(Duration::from_millis)
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML
    /// - `ConfigError::Invalid` when a setting is out of range
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - see [`MaestroConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.progress_buffer == 0 {
            return Err(ConfigError::Invalid(
                "progress_buffer must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.project.halt_failure_ratio) {
            return Err(ConfigError::Invalid(
                "project.halt_failure_ratio must be within 0.0..=1.0".into(),
            ));
        }
        if self.project.base_sprint_capacity == 0 {
            return Err(ConfigError::Invalid(
                "project.base_sprint_capacity must be at least 1".into(),
            ));
        }
        if self.default_task_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "default_task_timeout_ms must be at least 1".into(),
            ));
        }
        if !(1..=ProjectConfig::MAX_SPRINT_LENGTH_DAYS).contains(&self.project.sprint_length_days) {
            return Err(ConfigError::Invalid(format!(
                "project.sprint_length_days must be within 1..={}",
                ProjectConfig::MAX_SPRINT_LENGTH_DAYS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = MaestroConfig::from_toml_str("").unwrap();
        assert_eq!(config, MaestroConfig::default());
        assert_eq!(config.effective_queue_depth(), 20);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = MaestroConfig::from_toml_str(
            r#"
            max_workers = 4
            context_capability = "search"

            [project]
            halt_failure_ratio = 0.25
            "#,
        )
        .unwrap();

        assert_eq!(config.max_workers, 4);
        assert_eq!(config.effective_queue_depth(), 8);
        assert_eq!(config.context_capability, "search");
        assert!((config.project.halt_failure_ratio - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.project.base_sprint_capacity, 40);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = MaestroConfig::from_toml_str("max_workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn task_timeout_keeps_sub_second_precision() {
        let config = MaestroConfig::new().with_task_timeout(Duration::from_millis(500));
        assert_eq!(config.default_task_timeout_ms, Some(500));
        assert_eq!(config.default_task_timeout(), Some(Duration::from_millis(500)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_task_timeout() {
        let err = MaestroConfig::from_toml_str("default_task_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(MaestroConfig::new()
            .with_task_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn sprint_length_is_bounded() {
        for days in ["0", "-3", "366", "100000000"] {
            let source = format!("[project]\nsprint_length_days = {days}");
            let err = MaestroConfig::from_toml_str(&source).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{days} accepted");
        }
        let config = MaestroConfig::from_toml_str("[project]\nsprint_length_days = 365").unwrap();
        assert_eq!(config.project.sprint_length_days, 365);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_workers = 3\ndefault_task_timeout_ms = 30000").unwrap();

        let config = MaestroConfig::load(file.path()).unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.default_task_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = MaestroConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
