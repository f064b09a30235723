use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::UserProgress;
use crate::ProgressError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AchievementMetric {
    TasksCompleted,
    Streak,
    Level,
    PlannersCreated,
}

impl AchievementMetric {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TasksCompleted => "tasks_completed",
            Self::Streak => "streak",
            Self::Level => "level",
            Self::PlannersCreated => "planners_created",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tasks_completed" => Some(Self::TasksCompleted),
            "streak" => Some(Self::Streak),
            "level" => Some(Self::Level),
            "planners_created" => Some(Self::PlannersCreated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct AchievementRequirement {
    pub metric: AchievementMetric,
    pub threshold: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub requirement: AchievementRequirement,
}

impl Achievement {
    fn new(
        id: &str,
        name: &str,
        description: &str,
        icon: &str,
        metric: AchievementMetric,
        threshold: u64,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            requirement: AchievementRequirement { metric, threshold },
        }
    }

    #[must_use]
    pub fn is_satisfied_by(&self, progress: &UserProgress) -> bool {
        progress.metric_value(self.requirement.metric) >= self.requirement.threshold
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AchievementStatus {
    #[serde(flatten)]
    pub achievement: Achievement,
    pub unlocked: bool,
}

/// Catalog entry as it appears in JSON, before the metric tag is resolved.
#[derive(Debug, Deserialize)]
struct RawAchievement {
    id: String,
    name: String,
    description: String,
    icon: String,
    requirement: RawRequirement,
}

#[derive(Debug, Deserialize)]
struct RawRequirement {
    metric: String,
    threshold: u64,
}

/// Immutable, validated achievement table. Declaration order is the
/// evaluation and display order.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct AchievementCatalog {
    achievements: Vec<Achievement>,
}

impl AchievementCatalog {
    #[must_use]
    pub fn v1() -> Self {
        use AchievementMetric::{Level, PlannersCreated, Streak, TasksCompleted};

        Self {
            achievements: vec![
                Achievement::new(
                    "first_task",
                    "First Task",
                    "Complete your first task",
                    "🎯",
                    TasksCompleted,
                    1,
                ),
                Achievement::new(
                    "task_master",
                    "Task Master",
                    "Complete 10 tasks",
                    "👑",
                    TasksCompleted,
                    10,
                ),
                Achievement::new(
                    "centenarian",
                    "Centenarian",
                    "Complete 100 tasks",
                    "💯",
                    TasksCompleted,
                    100,
                ),
                Achievement::new(
                    "week_streak",
                    "7-Day Streak",
                    "Stay active 7 days in a row",
                    "🔥",
                    Streak,
                    7,
                ),
                Achievement::new(
                    "month_streak",
                    "30-Day Streak",
                    "Stay active 30 days in a row",
                    "💪",
                    Streak,
                    30,
                ),
                Achievement::new("level_10", "Level 10", "Reach level 10", "⭐", Level, 10),
                Achievement::new(
                    "planner_pro",
                    "Planner Pro",
                    "Create 5 planners",
                    "📋",
                    PlannersCreated,
                    5,
                ),
            ],
        }
    }

    /// Builds a catalog from already-typed entries.
    ///
    /// # Errors
    /// Returns [`ProgressError::Configuration`] for blank or duplicate ids and
    /// zero thresholds.
    pub fn new(achievements: Vec<Achievement>) -> Result<Self, ProgressError> {
        let catalog = Self { achievements };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Decodes and validates a catalog from a JSON array.
    ///
    /// # Errors
    /// Returns [`ProgressError::Configuration`] when decoding fails, an entry
    /// names an unknown metric, or the decoded table is invalid.
    pub fn from_json(value: &Value) -> Result<Self, ProgressError> {
        let raw: Vec<RawAchievement> = serde_json::from_value(value.clone()).map_err(|err| {
            ProgressError::Configuration(format!("invalid achievement catalog JSON payload: {err}"))
        })?;

        let mut achievements = Vec::with_capacity(raw.len());
        for entry in raw {
            let Some(metric) = AchievementMetric::parse(&entry.requirement.metric) else {
                return Err(ProgressError::Configuration(format!(
                    "achievement {} references unknown metric {}",
                    entry.id, entry.requirement.metric
                )));
            };
            achievements.push(Achievement {
                id: entry.id,
                name: entry.name,
                description: entry.description,
                icon: entry.icon,
                requirement: AchievementRequirement {
                    metric,
                    threshold: entry.requirement.threshold,
                },
            });
        }

        Self::new(achievements)
    }

    /// Validates id uniqueness and threshold bounds.
    ///
    /// # Errors
    /// Returns [`ProgressError::Configuration`] on the first offending entry.
    pub fn validate(&self) -> Result<(), ProgressError> {
        let mut seen = BTreeSet::new();
        for achievement in &self.achievements {
            if achievement.id.trim().is_empty() {
                return Err(ProgressError::Configuration(
                    "achievement id MUST be non-empty".to_string(),
                ));
            }

            if !seen.insert(achievement.id.as_str()) {
                return Err(ProgressError::Configuration(format!(
                    "duplicate achievement id {}",
                    achievement.id
                )));
            }

            if achievement.requirement.threshold == 0 {
                return Err(ProgressError::Configuration(format!(
                    "achievement {} threshold MUST be >= 1",
                    achievement.id
                )));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Achievement> {
        self.achievements.iter().find(|achievement| achievement.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Achievement] {
        &self.achievements
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.achievements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.achievements.is_empty()
    }

    #[must_use]
    pub fn unlocked_for(&self, progress: &UserProgress) -> Vec<Achievement> {
        self.achievements
            .iter()
            .filter(|achievement| progress.has_unlocked(&achievement.id))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn locked_for(&self, progress: &UserProgress) -> Vec<Achievement> {
        self.achievements
            .iter()
            .filter(|achievement| !progress.has_unlocked(&achievement.id))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn statuses_for(&self, progress: &UserProgress) -> Vec<AchievementStatus> {
        self.achievements
            .iter()
            .map(|achievement| AchievementStatus {
                achievement: achievement.clone(),
                unlocked: progress.has_unlocked(&achievement.id),
            })
            .collect()
    }
}

/// Unlocks every catalog entry whose requirement `progress` now meets.
///
/// Entries are visited in catalog order and already-unlocked ids are skipped,
/// so repeated calls return nothing new.
pub fn evaluate_achievements(
    progress: &mut UserProgress,
    catalog: &AchievementCatalog,
) -> Vec<Achievement> {
    let mut newly_unlocked = Vec::new();

    for achievement in catalog.as_slice() {
        if progress.has_unlocked(&achievement.id) {
            continue;
        }

        if achievement.is_satisfied_by(progress) {
            progress
                .unlocked_achievement_ids
                .insert(achievement.id.clone());
            newly_unlocked.push(achievement.clone());
        }
    }

    newly_unlocked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::UserId;
    use serde_json::json;

    fn ids(achievements: &[Achievement]) -> Vec<&str> {
        achievements.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn canonical_catalog_is_valid() {
        let catalog = AchievementCatalog::v1();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.len(), 7);
        assert_eq!(catalog.as_slice()[0].id, "first_task");
    }

    #[test]
    fn threshold_is_exact_and_unlock_happens_once() {
        let catalog = AchievementCatalog::v1();
        let mut progress = UserProgress::new(UserId::new());
        progress.unlocked_achievement_ids.insert("first_task".to_string());

        progress.tasks_completed = 9;
        assert!(evaluate_achievements(&mut progress, &catalog).is_empty());

        progress.tasks_completed = 10;
        let unlocked = evaluate_achievements(&mut progress, &catalog);
        assert_eq!(ids(&unlocked), vec!["task_master"]);

        progress.tasks_completed = 15;
        assert!(evaluate_achievements(&mut progress, &catalog).is_empty());
        assert_eq!(
            progress
                .unlocked_achievement_ids
                .iter()
                .filter(|id| id.as_str() == "task_master")
                .count(),
            1
        );
    }

    #[test]
    fn simultaneous_unlocks_follow_catalog_order() {
        let catalog = AchievementCatalog::v1();
        let mut progress = UserProgress::new(UserId::new());
        progress.tasks_completed = 100;
        progress.streak = 7;
        progress.last_activity_date = Some(crate::today_utc());
        progress.xp = 1_000;
        progress.planners_created = 5;

        let unlocked = evaluate_achievements(&mut progress, &catalog);
        assert_eq!(
            ids(&unlocked),
            vec![
                "first_task",
                "task_master",
                "centenarian",
                "week_streak",
                "level_10",
                "planner_pro"
            ]
        );
    }

    #[test]
    fn unlocks_survive_metric_decrease() {
        let catalog = AchievementCatalog::v1();
        let mut progress = UserProgress::new(UserId::new());
        progress.tasks_completed = 1;
        assert_eq!(ids(&evaluate_achievements(&mut progress, &catalog)), vec!["first_task"]);

        progress.tasks_completed = 0;
        assert!(evaluate_achievements(&mut progress, &catalog).is_empty());
        assert!(progress.has_unlocked("first_task"));
    }

    #[test]
    fn unknown_metric_fails_at_load_time() {
        let payload = json!([
            {
                "id": "early_bird",
                "name": "Early Bird",
                "description": "Complete 10 tasks before 8am",
                "icon": "🌅",
                "requirement": { "metric": "tasks_before_8am", "threshold": 10 }
            }
        ]);

        let err = AchievementCatalog::from_json(&payload);
        assert!(matches!(
            err,
            Err(ProgressError::Configuration(message)) if message.contains("tasks_before_8am")
        ));
    }

    #[test]
    fn duplicate_ids_and_zero_thresholds_are_rejected() {
        let duplicate = AchievementCatalog::new(vec![
            Achievement::new(
                "a",
                "A",
                "",
                "",
                AchievementMetric::Streak,
                1,
            ),
            Achievement::new(
                "a",
                "A again",
                "",
                "",
                AchievementMetric::Level,
                2,
            ),
        ]);
        assert!(matches!(duplicate, Err(ProgressError::Configuration(_))));

        let zero = AchievementCatalog::new(vec![Achievement::new(
            "free",
            "Free",
            "",
            "",
            AchievementMetric::Level,
            0,
        )]);
        assert!(matches!(zero, Err(ProgressError::Configuration(_))));
    }

    #[test]
    fn json_catalog_round_trips_canonical_table() {
        let catalog = AchievementCatalog::v1();
        let value = match serde_json::to_value(&catalog) {
            Ok(value) => value,
            Err(err) => panic!("failed to encode catalog: {err}"),
        };
        assert_eq!(value[0]["requirement"], json!({"metric": "tasks_completed", "threshold": 1}));

        let decoded = match AchievementCatalog::from_json(&value) {
            Ok(value) => value,
            Err(err) => panic!("failed to decode catalog: {err}"),
        };
        assert_eq!(decoded, catalog);
    }

    #[test]
    fn statuses_split_locked_and_unlocked_in_catalog_order() {
        let catalog = AchievementCatalog::v1();
        let mut progress = UserProgress::new(UserId::new());
        progress.unlocked_achievement_ids.insert("planner_pro".to_string());
        progress.unlocked_achievement_ids.insert("first_task".to_string());

        assert_eq!(ids(&catalog.unlocked_for(&progress)), vec!["first_task", "planner_pro"]);
        assert_eq!(catalog.locked_for(&progress).len(), 5);
        let statuses = catalog.statuses_for(&progress);
        assert!(statuses[0].unlocked);
        assert!(!statuses[1].unlocked);
    }
}
