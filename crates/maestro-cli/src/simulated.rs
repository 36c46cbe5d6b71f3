//! Simulated capabilities
//!
//! Stand-ins registered under the canonical names so plans can be run end
//! to end from the command line. Each echoes its prompt back as a
//! successful result.

use async_trait::async_trait;
use maestro_core::{names, Capability, CapabilityError, CapabilityRequest, CapabilityResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub(crate) struct SimulatedCapability {
    name: &'static str,
    description: &'static str,
    keywords: &'static [&'static str],
}

impl SimulatedCapability {
    const fn new(
        name: &'static str,
        description: &'static str,
        keywords: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            description,
            keywords,
        }
    }
}

/// One simulated capability per canonical name
pub(crate) fn catalog() -> Vec<Arc<dyn Capability>> {
    [
        SimulatedCapability::new(
            names::FILE_OPERATIONS,
            "Reads, lists and writes files",
            &["file", "read", "write", "list"],
        ),
        SimulatedCapability::new(
            names::CODE_ANALYSIS,
            "Analyzes code structure and patterns",
            &["analyze", "analysis", "structure", "refactor"],
        ),
        SimulatedCapability::new(
            names::CODE_REVIEW,
            "Reviews code for defects and style",
            &["review", "correct"],
        ),
        SimulatedCapability::new(
            names::SEARCH,
            "Searches the workspace",
            &["search", "find", "grep"],
        ),
        SimulatedCapability::new(
            names::DISPATCHER,
            "Handles anything the specialists do not",
            &[],
        ),
    ]
    .into_iter()
    .map(|capability| Arc::new(capability) as Arc<dyn Capability>)
    .collect()
}

#[async_trait]
impl Capability for SimulatedCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn can_handle(&self, text: &str) -> (bool, f64) {
        if self.keywords.is_empty() {
            return (true, 0.1);
        }
        let lower = text.to_lowercase();
        let hits = self.keywords.iter().filter(|k| lower.contains(*k)).count();
        if hits == 0 {
            (false, 0.0)
        } else {
            (true, (0.6 + 0.1 * hits as f64).min(1.0))
        }
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: CapabilityRequest,
    ) -> Result<CapabilityResult, CapabilityError> {
        if cancel.is_cancelled() {
            return Err(CapabilityError::Cancelled);
        }
        tracing::debug!(capability = self.name, prompt = %request.prompt, "simulated execution");

        let files: Vec<String> = request
            .context
            .files
            .iter()
            .map(|record| record.path.clone())
            .collect();
        Ok(CapabilityResult::success(self.name, format!("{}: {}", self.name, request.prompt))
            .with_details(format!("simulated {} handled the request", self.name))
            .with_files(files)
            .with_tools([self.name]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_canonical_names() {
        let registered: Vec<String> = catalog().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(
            registered,
            vec![
                names::FILE_OPERATIONS,
                names::CODE_ANALYSIS,
                names::CODE_REVIEW,
                names::SEARCH,
                names::DISPATCHER,
            ]
        );
    }

    #[test]
    fn keywords_drive_confidence() {
        let search = SimulatedCapability::new(names::SEARCH, "", &["search", "find"]);
        assert_eq!(search.can_handle("paint the fence"), (false, 0.0));
        let (willing, confidence) = search.can_handle("search and find things");
        assert!(willing);
        assert!((confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn echoes_prompt() {
        let capability = SimulatedCapability::new(names::SEARCH, "", &[]);
        let result = capability
            .execute(&CancellationToken::new(), CapabilityRequest::new("find TODOs"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.summary, "search: find TODOs");
        assert_eq!(result.metadata.tools_used, vec!["search".to_string()]);
    }

    #[tokio::test]
    async fn observes_cancellation() {
        let capability = SimulatedCapability::new(names::SEARCH, "", &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = capability.execute(&cancel, CapabilityRequest::new("x")).await;
        assert!(matches!(result, Err(CapabilityError::Cancelled)));
    }
}
