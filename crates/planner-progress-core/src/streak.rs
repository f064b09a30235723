use serde::{Deserialize, Serialize};
use time::Date;

use crate::progress::UserProgress;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    /// First qualifying activity ever.
    Started,
    Continued,
    /// A gap of more than one day broke the chain.
    Reset,
    /// Repeat activity on the same calendar day.
    Unchanged,
    /// `today` precedes the last activity date; ignored.
    Backdated,
}

impl StreakChange {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Continued => "continued",
            Self::Reset => "reset",
            Self::Unchanged => "unchanged",
            Self::Backdated => "backdated",
        }
    }

    #[must_use]
    pub fn moves_activity_date(self) -> bool {
        matches!(self, Self::Started | Self::Continued | Self::Reset)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct StreakUpdate {
    pub streak: u32,
    pub last_activity_date: Option<Date>,
    pub change: StreakChange,
}

/// Computes the streak after a qualifying activity on `today`.
///
/// The gap is measured in whole calendar days between the two dates, so the
/// time of day and the host timezone play no part.
#[must_use]
pub fn next_streak(streak: u32, last_activity_date: Option<Date>, today: Date) -> StreakUpdate {
    let Some(last) = last_activity_date else {
        return StreakUpdate {
            streak: 1,
            last_activity_date: Some(today),
            change: StreakChange::Started,
        };
    };

    let gap_days = (today - last).whole_days();
    let (streak, change) = match gap_days {
        0 => (streak, StreakChange::Unchanged),
        1 => (streak.saturating_add(1), StreakChange::Continued),
        gap if gap > 1 => (1, StreakChange::Reset),
        _ => (streak, StreakChange::Backdated),
    };

    StreakUpdate {
        streak,
        last_activity_date: if change.moves_activity_date() {
            Some(today)
        } else {
            Some(last)
        },
        change,
    }
}

/// Applies [`next_streak`] to `progress` in place.
pub fn record_activity(progress: &mut UserProgress, today: Date) -> StreakChange {
    let update = next_streak(progress.streak, progress.last_activity_date, today);
    progress.streak = update.streak;
    progress.last_activity_date = update.last_activity_date;
    update.change
}
