use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::Date;
use ulid::Ulid;

use crate::achievements::AchievementMetric;
use crate::progression::level_for_xp;
use crate::ProgressError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct UserId(pub Ulid);

impl UserId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses a ULID user identifier.
    ///
    /// # Errors
    /// Returns [`ProgressError::Validation`] when `raw` is not a ULID.
    pub fn parse(raw: &str) -> Result<Self, ProgressError> {
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|err| ProgressError::Validation(format!("invalid ULID user_id {raw}: {err}")))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gamification state of one user.
///
/// Level is not stored: it is always derived from `xp` through
/// [`UserProgress::level`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserProgress {
    pub user_id: UserId,
    pub xp: u64,
    pub streak: u32,
    pub last_activity_date: Option<Date>,
    pub tasks_completed: u32,
    pub planners_created: u32,
    pub unlocked_achievement_ids: BTreeSet<String>,
}

impl UserProgress {
    /// Fresh progress for a newly created profile: `xp=0`, `level=1`, `streak=0`.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            xp: 0,
            streak: 0,
            last_activity_date: None,
            tasks_completed: 0,
            planners_created: 0,
            unlocked_achievement_ids: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        level_for_xp(self.xp)
    }

    #[must_use]
    pub fn has_unlocked(&self, achievement_id: &str) -> bool {
        self.unlocked_achievement_ids.contains(achievement_id)
    }

    #[must_use]
    pub fn metric_value(&self, metric: AchievementMetric) -> u64 {
        match metric {
            AchievementMetric::TasksCompleted => u64::from(self.tasks_completed),
            AchievementMetric::Streak => u64::from(self.streak),
            AchievementMetric::Level => u64::from(self.level()),
            AchievementMetric::PlannersCreated => u64::from(self.planners_created),
        }
    }

    /// Checks the structural invariants every operation relies on.
    ///
    /// # Errors
    /// Returns [`ProgressError::InvalidState`] when the streak and last
    /// activity date disagree or an unlocked id is blank.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.streak > 0 && self.last_activity_date.is_none() {
            return Err(ProgressError::InvalidState(format!(
                "user {} has streak {} but no last_activity_date",
                self.user_id, self.streak
            )));
        }

        if self.streak == 0 && self.last_activity_date.is_some() {
            return Err(ProgressError::InvalidState(format!(
                "user {} has last_activity_date but streak 0",
                self.user_id
            )));
        }

        if self
            .unlocked_achievement_ids
            .iter()
            .any(|id| id.trim().is_empty())
        {
            return Err(ProgressError::InvalidState(format!(
                "user {} has a blank unlocked achievement id",
                self.user_id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    fn fixture_user_id() -> UserId {
        match UserId::parse("01J0SQQP7M70P6Y3R4T8D8G8M2") {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture ULID: {err}"),
        }
    }

    fn fixture_date() -> Date {
        match Date::from_calendar_date(2026, Month::February, 7) {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture date: {err}"),
        }
    }

    #[test]
    fn fresh_progress_starts_at_level_one() {
        let progress = UserProgress::new(fixture_user_id());
        assert_eq!(progress.xp, 0);
        assert_eq!(progress.level(), 1);
        assert_eq!(progress.streak, 0);
        assert!(progress.last_activity_date.is_none());
        assert!(progress.validate().is_ok());
    }

    #[test]
    fn streak_without_activity_date_is_invalid() {
        let mut progress = UserProgress::new(fixture_user_id());
        progress.streak = 3;
        assert!(matches!(
            progress.validate(),
            Err(ProgressError::InvalidState(_))
        ));
    }

    #[test]
    fn activity_date_without_streak_is_invalid() {
        let mut progress = UserProgress::new(fixture_user_id());
        progress.last_activity_date = Some(fixture_date());
        assert!(matches!(
            progress.validate(),
            Err(ProgressError::InvalidState(_))
        ));
    }

    #[test]
    fn level_metric_follows_xp() {
        let mut progress = UserProgress::new(fixture_user_id());
        progress.xp = 250;
        assert_eq!(progress.metric_value(AchievementMetric::Level), 3);
    }

    #[test]
    fn user_id_rejects_non_ulid() {
        assert!(UserId::parse("not-a-ulid").is_err());
        assert_eq!(
            fixture_user_id().to_string(),
            "01J0SQQP7M70P6Y3R4T8D8G8M2"
        );
    }
}
