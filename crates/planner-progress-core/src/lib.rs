//! Gamification and progression engine for planner users.
//!
//! The crate is pure: every operation takes a [`UserProgress`] snapshot and
//! returns a new one together with a result descriptor. Persistence and
//! presentation belong to the caller.

mod achievements;
mod coordinator;
mod progress;
mod progression;
mod streak;

use time::{Date, OffsetDateTime, UtcOffset};

pub use achievements::{
    evaluate_achievements, Achievement, AchievementCatalog, AchievementMetric,
    AchievementRequirement, AchievementStatus,
};
pub use coordinator::{
    DisplayStats, GamificationCoordinator, ProgressEvent, ProgressEventKind, ProgressOutcome,
    ProgressRuleset, Transition,
};
pub use progress::{UserId, UserProgress};
pub use progression::{
    level_for_xp, progress_percent, xp_into_current_level, xp_threshold_for_level,
    xp_to_next_level, XP_PER_LEVEL,
};
pub use streak::{next_streak, record_activity, StreakChange, StreakUpdate};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ProgressError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("validation error: {0}")]
    Validation(String),
}

const CALENDAR_DATE_FORMAT: &str = "[year]-[month]-[day]";

/// Parses a `YYYY-MM-DD` calendar date.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when the input is not a valid date.
pub fn parse_calendar_date(value: &str) -> Result<Date, ProgressError> {
    let format = time::format_description::parse(CALENDAR_DATE_FORMAT).map_err(|err| {
        ProgressError::Validation(format!("invalid calendar date format: {err}"))
    })?;
    Date::parse(value, &format)
        .map_err(|err| ProgressError::Validation(format!("invalid calendar date {value}: {err}")))
}

/// Formats a calendar date as `YYYY-MM-DD`.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when formatting fails.
pub fn format_calendar_date(value: Date) -> Result<String, ProgressError> {
    let format = time::format_description::parse(CALENDAR_DATE_FORMAT).map_err(|err| {
        ProgressError::Validation(format!("invalid calendar date format: {err}"))
    })?;
    value
        .format(&format)
        .map_err(|err| ProgressError::Validation(format!("failed to format calendar date: {err}")))
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, ProgressError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            ProgressError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn today_utc() -> Date {
    now_utc().date()
}
