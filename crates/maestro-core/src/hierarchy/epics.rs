//! Epic and story templates

use crate::hierarchy::model::{Epic, Priority, ProjectAnalysis, UserStory};

#[derive(Debug, Clone, Copy, Default)]
pub struct EpicPlanner;

impl EpicPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// One epic per component, then one per requirement. Never empty.
    #[must_use]
    pub fn plan(&self, analysis: &ProjectAnalysis) -> Vec<Epic> {
        let mut epics: Vec<Epic> = analysis
            .components
            .iter()
            .zip(0..)
            .map(|(component, i)| {
                Epic::new(
                    format!("Implement {component}"),
                    format!("Implementation of {component} component"),
                    Priority(10 - i),
                    component_stories(component),
                )
            })
            .collect();

        epics.extend(analysis.requirements.iter().map(|requirement| {
            Epic::new(
                format!("Ensure {requirement}"),
                format!("Implementation of {requirement} requirements"),
                Priority::MEDIUM,
                vec![UserStory::new(
                    format!("Implement {requirement}"),
                    format!("Ensure {requirement} requirements are met"),
                    5,
                    Priority::MEDIUM,
                )],
            )
        }));

        if epics.is_empty() {
            epics.push(Epic::new(
                "Core Implementation",
                analysis.raw_request.clone(),
                Priority::HIGH,
                vec![UserStory::new(
                    "Initial implementation",
                    "Implement core functionality",
                    8,
                    Priority::HIGH,
                )],
            ));
        }

        tracing::debug!(epics = epics.len(), "planned epics");
        epics
    }
}

fn component_stories(component: &str) -> Vec<UserStory> {
    vec![
        UserStory::new(
            format!("Design {component} architecture"),
            format!("Design and plan the {component} component architecture"),
            5,
            Priority::HIGH,
        ),
        UserStory::new(
            format!("Implement {component} core"),
            format!("Implement core functionality for {component}"),
            8,
            Priority::HIGH,
        ),
        UserStory::new(
            format!("Test {component}"),
            format!("Create tests for {component} component"),
            3,
            Priority::MEDIUM,
        ),
    ]
}
