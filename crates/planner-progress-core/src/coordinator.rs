use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use crate::achievements::{evaluate_achievements, Achievement, AchievementCatalog};
use crate::progress::UserProgress;
use crate::progression::{progress_percent, xp_to_next_level};
use crate::streak::{record_activity, StreakChange};
use crate::ProgressError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    TaskCompleted,
    TaskUncompleted,
    PlannerCreated,
    DailyActivity,
}

impl ProgressEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCompleted => "task_completed",
            Self::TaskUncompleted => "task_uncompleted",
            Self::PlannerCreated => "planner_created",
            Self::DailyActivity => "daily_activity",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "task_completed" => Some(Self::TaskCompleted),
            "task_uncompleted" => Some(Self::TaskUncompleted),
            "planner_created" => Some(Self::PlannerCreated),
            "daily_activity" => Some(Self::DailyActivity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProgressEvent {
    pub kind: ProgressEventKind,
    /// Calendar day the event counts toward for streak purposes.
    pub occurred_on: Date,
}

/// XP awards and streak policy applied by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProgressRuleset {
    pub ruleset_version: u32,
    pub task_completion_xp: u64,
    pub planner_creation_xp: u64,
    /// When set, completing a task also counts as the day's qualifying activity.
    pub task_completion_counts_as_activity: bool,
}

impl ProgressRuleset {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            ruleset_version: 1,
            task_completion_xp: 10,
            planner_creation_xp: 50,
            task_completion_counts_as_activity: true,
        }
    }

    /// Validates version and award bounds.
    ///
    /// # Errors
    /// Returns [`ProgressError::Configuration`] when a field is out of bounds.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.ruleset_version == 0 {
            return Err(ProgressError::Configuration(
                "ruleset_version MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("task_completion_xp", self.task_completion_xp),
            ("planner_creation_xp", self.planner_creation_xp),
        ] {
            if value == 0 {
                return Err(ProgressError::Configuration(format!("{name} MUST be >= 1")));
            }
        }

        Ok(())
    }

    /// Decodes and validates a ruleset from JSON.
    ///
    /// # Errors
    /// Returns [`ProgressError::Configuration`] when JSON decoding fails
    /// or decoded values violate ruleset constraints.
    pub fn from_json(value: &Value) -> Result<Self, ProgressError> {
        let ruleset: Self = serde_json::from_value(value.clone()).map_err(|err| {
            ProgressError::Configuration(format!("invalid ruleset JSON payload: {err}"))
        })?;
        ruleset.validate()?;
        Ok(ruleset)
    }
}

/// What an operation did, for the presentation layer to render.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProgressOutcome {
    pub event: ProgressEventKind,
    pub xp_awarded: u64,
    pub xp_revoked: u64,
    pub leveled_up: bool,
    pub new_level: u32,
    pub streak: u32,
    pub streak_change: Option<StreakChange>,
    pub newly_unlocked: Vec<Achievement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Transition {
    pub progress: UserProgress,
    pub outcome: ProgressOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DisplayStats {
    pub level: u32,
    pub xp: u64,
    pub xp_to_next_level: u64,
    pub progress_percent: u8,
    pub streak: u32,
    pub tasks_completed: u32,
    pub planners_created: u32,
    pub unlocked_achievements: Vec<Achievement>,
    pub locked_achievements: Vec<Achievement>,
}

/// Entry point for lifecycle events.
///
/// Operations never mutate the snapshot they are given: they validate it,
/// work on a copy and hand back a [`Transition`]. A failed call therefore
/// leaves the caller's value untouched.
#[derive(Debug, Clone)]
pub struct GamificationCoordinator {
    catalog: AchievementCatalog,
    ruleset: ProgressRuleset,
}

impl GamificationCoordinator {
    /// # Errors
    /// Returns [`ProgressError::Configuration`] when the catalog or ruleset is invalid.
    pub fn new(
        catalog: AchievementCatalog,
        ruleset: ProgressRuleset,
    ) -> Result<Self, ProgressError> {
        catalog.validate()?;
        ruleset.validate()?;
        Ok(Self { catalog, ruleset })
    }

    #[must_use]
    pub fn v1() -> Self {
        Self {
            catalog: AchievementCatalog::v1(),
            ruleset: ProgressRuleset::v1(),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn ruleset(&self) -> &ProgressRuleset {
        &self.ruleset
    }

    /// Awards task XP, bumps the completion counter and evaluates achievements.
    ///
    /// # Errors
    /// Returns [`ProgressError::InvalidState`] when `progress` is malformed.
    pub fn on_task_completed(
        &self,
        progress: &UserProgress,
        today: Date,
    ) -> Result<Transition, ProgressError> {
        let mut next = self.checked_copy(progress)?;
        let prior_level = next.level();

        next.xp = next.xp.saturating_add(self.ruleset.task_completion_xp);
        next.tasks_completed = next.tasks_completed.saturating_add(1);
        let streak_change = if self.ruleset.task_completion_counts_as_activity {
            Some(record_activity(&mut next, today))
        } else {
            None
        };

        Ok(self.finish(
            next,
            ProgressEventKind::TaskCompleted,
            prior_level,
            self.ruleset.task_completion_xp,
            streak_change,
        ))
    }

    /// Reverses a task completion. Both XP and the counter floor at zero and
    /// no achievement is revoked.
    ///
    /// # Errors
    /// Returns [`ProgressError::InvalidState`] when `progress` is malformed.
    pub fn on_task_uncompleted(
        &self,
        progress: &UserProgress,
    ) -> Result<Transition, ProgressError> {
        let mut next = self.checked_copy(progress)?;

        let xp_revoked = next.xp.min(self.ruleset.task_completion_xp);
        next.xp -= xp_revoked;
        next.tasks_completed = next.tasks_completed.saturating_sub(1);

        let outcome = ProgressOutcome {
            event: ProgressEventKind::TaskUncompleted,
            xp_awarded: 0,
            xp_revoked,
            leveled_up: false,
            new_level: next.level(),
            streak: next.streak,
            streak_change: None,
            newly_unlocked: Vec::new(),
        };

        Ok(Transition {
            progress: next,
            outcome,
        })
    }

    /// Awards planner XP, bumps the planner counter and evaluates achievements.
    ///
    /// # Errors
    /// Returns [`ProgressError::InvalidState`] when `progress` is malformed.
    pub fn on_planner_created(&self, progress: &UserProgress) -> Result<Transition, ProgressError> {
        let mut next = self.checked_copy(progress)?;
        let prior_level = next.level();

        next.xp = next.xp.saturating_add(self.ruleset.planner_creation_xp);
        next.planners_created = next.planners_created.saturating_add(1);

        Ok(self.finish(
            next,
            ProgressEventKind::PlannerCreated,
            prior_level,
            self.ruleset.planner_creation_xp,
            None,
        ))
    }

    /// Records a qualifying daily activity and evaluates achievements.
    ///
    /// # Errors
    /// Returns [`ProgressError::InvalidState`] when `progress` is malformed.
    pub fn on_daily_activity(
        &self,
        progress: &UserProgress,
        today: Date,
    ) -> Result<Transition, ProgressError> {
        let mut next = self.checked_copy(progress)?;
        let prior_level = next.level();
        let streak_change = record_activity(&mut next, today);

        Ok(self.finish(
            next,
            ProgressEventKind::DailyActivity,
            prior_level,
            0,
            Some(streak_change),
        ))
    }

    /// Dispatches a recorded event to the matching operation.
    ///
    /// # Errors
    /// Returns [`ProgressError::InvalidState`] when `progress` is malformed.
    pub fn apply(
        &self,
        progress: &UserProgress,
        event: &ProgressEvent,
    ) -> Result<Transition, ProgressError> {
        match event.kind {
            ProgressEventKind::TaskCompleted => self.on_task_completed(progress, event.occurred_on),
            ProgressEventKind::TaskUncompleted => self.on_task_uncompleted(progress),
            ProgressEventKind::PlannerCreated => self.on_planner_created(progress),
            ProgressEventKind::DailyActivity => self.on_daily_activity(progress, event.occurred_on),
        }
    }

    /// Read-only projection for presentation.
    ///
    /// # Errors
    /// Returns [`ProgressError::InvalidState`] when `progress` is malformed.
    pub fn display_stats(&self, progress: &UserProgress) -> Result<DisplayStats, ProgressError> {
        self.check(progress)?;
        let level = progress.level();

        Ok(DisplayStats {
            level,
            xp: progress.xp,
            xp_to_next_level: xp_to_next_level(progress.xp, level),
            progress_percent: progress_percent(progress.xp, level),
            streak: progress.streak,
            tasks_completed: progress.tasks_completed,
            planners_created: progress.planners_created,
            unlocked_achievements: self.catalog.unlocked_for(progress),
            locked_achievements: self.catalog.locked_for(progress),
        })
    }

    fn check(&self, progress: &UserProgress) -> Result<(), ProgressError> {
        progress.validate()?;

        if let Some(unknown) = progress
            .unlocked_achievement_ids
            .iter()
            .find(|id| !self.catalog.contains(id))
        {
            return Err(ProgressError::InvalidState(format!(
                "user {} has unlocked achievement {unknown} missing from the catalog",
                progress.user_id
            )));
        }

        Ok(())
    }

    fn checked_copy(&self, progress: &UserProgress) -> Result<UserProgress, ProgressError> {
        self.check(progress)?;
        Ok(progress.clone())
    }

    fn finish(
        &self,
        mut next: UserProgress,
        event: ProgressEventKind,
        prior_level: u32,
        xp_awarded: u64,
        streak_change: Option<StreakChange>,
    ) -> Transition {
        let new_level = next.level();
        let newly_unlocked = evaluate_achievements(&mut next, &self.catalog);

        let outcome = ProgressOutcome {
            event,
            xp_awarded,
            xp_revoked: 0,
            leveled_up: new_level > prior_level,
            new_level,
            streak: next.streak,
            streak_change,
            newly_unlocked,
        };

        Transition {
            progress: next,
            outcome,
        }
    }
}
