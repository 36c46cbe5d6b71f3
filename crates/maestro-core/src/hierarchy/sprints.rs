//! Capacity-bounded sprint packing

use crate::config::ProjectConfig;
use crate::error::PlanningError;
use crate::hierarchy::model::{Epic, Sprint, SprintStatus};
use crate::types::SprintId;
use chrono::{DateTime, Duration, Utc};

/// Share of capacity lost at complexity 1.0
const COMPLEXITY_DISCOUNT: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct SprintPlanner {
    base_capacity: u32,
    sprint_length: Duration,
}

impl SprintPlanner {
    #[must_use]
    pub fn new(config: &ProjectConfig) -> Self {
        Self {
            base_capacity: config.base_sprint_capacity,
            sprint_length: Duration::try_days(config.sprint_length_days)
                .unwrap_or_else(|| Duration::days(ProjectConfig::MAX_SPRINT_LENGTH_DAYS)),
        }
    }

    /// Story points per sprint for a project of the given complexity
    #[must_use]
    pub fn capacity(&self, complexity: f64) -> u32 {
        let factor = 1.0 - complexity.clamp(0.0, 1.0) * COMPLEXITY_DISCOUNT;
        // factor stays within 0.7..=1.0, so the result fits below base_capacity
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let points = (f64::from(self.base_capacity) * factor + 1e-9).floor().max(0.0) as u32;
        points.min(self.base_capacity)
    }

    /// Pack every story, in epic order, into sequential sprints starting
    /// at `start`.
    ///
    /// A sprint closes when the next story would overflow it. Stories are
    /// never split and no sprint is ever empty, so a story larger than the
    /// capacity gets a sprint of its own.
    ///
    /// # Errors
    /// `PlanningError::ScheduleOutOfRange` if a sprint would start or end
    /// outside the representable calendar
    pub fn plan(
        &self,
        epics: &[Epic],
        complexity: f64,
        start: DateTime<Utc>,
    ) -> Result<Vec<Sprint>, PlanningError> {
        let capacity = self.capacity(complexity);
        let mut sprints = Vec::new();
        let mut current = self.open(1, capacity, start)?;

        for story in epics.iter().flat_map(|e| e.stories.iter()) {
            if !current.story_ids.is_empty() && current.planned_points + story.points > capacity {
                let next = self.open(sprints.len() + 2, capacity, start)?;
                sprints.push(std::mem::replace(&mut current, next));
            }
            current.story_ids.push(story.id);
            current.planned_points += story.points;
        }
        if !current.story_ids.is_empty() {
            sprints.push(current);
        }

        tracing::debug!(sprints = sprints.len(), capacity, "planned sprints");
        Ok(sprints)
    }

    fn open(
        &self,
        number: usize,
        capacity: u32,
        start: DateTime<Utc>,
    ) -> Result<Sprint, PlanningError> {
        let out_of_range = || PlanningError::ScheduleOutOfRange { sprint: number };
        let offset = i32::try_from(number - 1).map_err(|_| out_of_range())?;
        let start_date = self
            .sprint_length
            .checked_mul(offset)
            .and_then(|elapsed| start.checked_add_signed(elapsed))
            .ok_or_else(out_of_range)?;
        let end_date = start_date
            .checked_add_signed(self.sprint_length)
            .ok_or_else(out_of_range)?;
        Ok(Sprint {
            id: SprintId::new(),
            number,
            name: format!("Sprint {number}"),
            goal: format!("Complete sprint {number} objectives"),
            start_date,
            end_date,
            status: SprintStatus::Planning,
            story_ids: Vec::new(),
            plans: Vec::new(),
            capacity,
            planned_points: 0,
            velocity: 0,
        })
    }
}

impl Default for SprintPlanner {
    fn default() -> Self {
        Self::new(&ProjectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::model::{Priority, UserStory};
    use proptest::prelude::*;

    fn epic(points: &[u32]) -> Epic {
        Epic::new(
            "e",
            "e",
            Priority::MEDIUM,
            points
                .iter()
                .map(|p| UserStory::new("s", "s", *p, Priority::MEDIUM))
                .collect(),
        )
    }

    #[test]
    fn capacity_shrinks_with_complexity() {
        let planner = SprintPlanner::default();
        assert_eq!(planner.capacity(0.0), 40);
        assert_eq!(planner.capacity(0.3), 36);
        assert_eq!(planner.capacity(0.5), 34);
        assert_eq!(planner.capacity(1.0), 28);
    }

    #[test]
    fn greedy_packing_never_splits_stories() {
        let planner = SprintPlanner::default();
        // capacity 36 at complexity 0.3
        let sprints = planner
            .plan(&[epic(&[5, 8, 3]), epic(&[5, 8, 3, 5])], 0.3, Utc::now())
            .unwrap();

        assert_eq!(sprints.len(), 2);
        assert_eq!(sprints[0].planned_points, 32);
        assert_eq!(sprints[1].planned_points, 5);
        assert_eq!(sprints[1].number, 2);
        assert_eq!(sprints[1].name, "Sprint 2");
        assert_eq!(sprints[1].start_date, sprints[0].end_date);
    }

    #[test]
    fn oversized_story_gets_its_own_sprint() {
        let planner = SprintPlanner::default();
        let sprints = planner.plan(&[epic(&[50, 3])], 0.0, Utc::now()).unwrap();

        assert_eq!(sprints.len(), 2);
        assert_eq!(sprints[0].planned_points, 50);
        assert_eq!(sprints[1].planned_points, 3);
    }

    #[test]
    fn no_stories_no_sprints() {
        assert!(SprintPlanner::default()
            .plan(&[], 0.3, Utc::now())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn sprint_dates_past_the_calendar_are_an_error() {
        let planner = SprintPlanner::default();
        let err = planner
            .plan(&[epic(&[40, 40])], 0.0, DateTime::<Utc>::MAX_UTC)
            .unwrap_err();
        assert!(matches!(err, PlanningError::ScheduleOutOfRange { sprint: 1 }));
    }

    #[test]
    fn capacity_never_exceeds_base() {
        let planner = SprintPlanner::default();
        assert_eq!(planner.capacity(-3.0), 40);
        assert_eq!(planner.capacity(f64::NAN), 0);
        assert_eq!(planner.capacity(7.0), 28);
    }

    proptest! {
        #[test]
        fn story_points_are_conserved(
            epics in prop::collection::vec(prop::collection::vec(1u32..=60, 0..6), 0..6),
            tenths in 3u32..=10,
        ) {
            let epics: Vec<Epic> = epics.iter().map(|p| epic(p)).collect();
            let input: u32 = epics.iter().map(Epic::points).sum();
            let stories: usize = epics.iter().map(|e| e.stories.len()).sum();

            let sprints = SprintPlanner::default()
                .plan(&epics, f64::from(tenths) / 10.0, Utc::now())
                .unwrap();

            let packed: u32 = sprints.iter().map(|s| s.planned_points).sum();
            let ids: usize = sprints.iter().map(|s| s.story_ids.len()).sum();
            prop_assert_eq!(packed, input);
            prop_assert_eq!(ids, stories);
            for sprint in &sprints {
                prop_assert!(!sprint.story_ids.is_empty());
                prop_assert!(sprint.planned_points <= sprint.capacity || sprint.story_ids.len() == 1);
            }
        }
    }
}
