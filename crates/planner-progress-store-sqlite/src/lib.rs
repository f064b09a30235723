#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use planner_progress_core::{
    format_calendar_date, format_rfc3339, level_for_xp, now_utc, parse_calendar_date,
    AchievementCatalog, GamificationCoordinator, ProgressError, ProgressEvent, ProgressEventKind,
    ProgressOutcome, ProgressRuleset, UserId, UserProgress,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use ulid::Ulid;

const PROGRESS_MIGRATION_VERSION: i64 = 1;

const SCHEMA_PROGRESS_V1: &str = r"
CREATE TABLE IF NOT EXISTS progress_rulesets (
  ruleset_version INTEGER PRIMARY KEY,
  ruleset_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_progress (
  user_id TEXT PRIMARY KEY,
  xp INTEGER NOT NULL CHECK (xp >= 0),
  level INTEGER NOT NULL CHECK (level >= 1),
  streak INTEGER NOT NULL CHECK (streak >= 0),
  last_activity_date TEXT,
  tasks_completed INTEGER NOT NULL CHECK (tasks_completed >= 0),
  planners_created INTEGER NOT NULL CHECK (planners_created >= 0),
  revision INTEGER NOT NULL DEFAULT 0 CHECK (revision >= 0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_user_progress_leaderboard
  ON user_progress(xp DESC, user_id ASC);

CREATE TABLE IF NOT EXISTS achievement_catalogs (
  catalog_id INTEGER PRIMARY KEY AUTOINCREMENT,
  catalog_json TEXT NOT NULL UNIQUE,
  created_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_achievement_catalogs_no_update
BEFORE UPDATE ON achievement_catalogs
BEGIN
  SELECT RAISE(FAIL, 'achievement_catalogs rows are immutable');
END;

CREATE TRIGGER IF NOT EXISTS trg_achievement_catalogs_no_delete
BEFORE DELETE ON achievement_catalogs
BEGIN
  SELECT RAISE(FAIL, 'achievement_catalogs rows are immutable');
END;

CREATE TABLE IF NOT EXISTS progress_events (
  event_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  event_id TEXT NOT NULL UNIQUE,
  user_id TEXT NOT NULL,
  ruleset_version INTEGER NOT NULL,
  catalog_id INTEGER NOT NULL,
  event_type TEXT NOT NULL CHECK (
    event_type IN (
      'task_completed',
      'task_uncompleted',
      'planner_created',
      'daily_activity'
    )
  ),
  occurred_on TEXT NOT NULL,
  recorded_at TEXT NOT NULL,
  outcome_json TEXT NOT NULL,
  FOREIGN KEY (user_id) REFERENCES user_progress(user_id),
  FOREIGN KEY (ruleset_version) REFERENCES progress_rulesets(ruleset_version),
  FOREIGN KEY (catalog_id) REFERENCES achievement_catalogs(catalog_id)
);

CREATE TRIGGER IF NOT EXISTS trg_progress_events_no_update
BEFORE UPDATE ON progress_events
BEGIN
  SELECT RAISE(FAIL, 'progress_events is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_progress_events_no_delete
BEFORE DELETE ON progress_events
BEGIN
  SELECT RAISE(FAIL, 'progress_events is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_progress_events_user_seq
  ON progress_events(user_id, event_seq);

CREATE TRIGGER IF NOT EXISTS trg_progress_rulesets_frozen_when_used
BEFORE UPDATE ON progress_rulesets
WHEN EXISTS (
  SELECT 1 FROM progress_events WHERE ruleset_version = OLD.ruleset_version
)
BEGIN
  SELECT RAISE(FAIL, 'ruleset is referenced by recorded events');
END;

CREATE TABLE IF NOT EXISTS user_achievements (
  user_id TEXT NOT NULL,
  achievement_id TEXT NOT NULL CHECK (length(trim(achievement_id)) > 0),
  unlocked_event_seq INTEGER NOT NULL,
  unlocked_at TEXT NOT NULL,
  PRIMARY KEY (user_id, achievement_id),
  FOREIGN KEY (user_id) REFERENCES user_progress(user_id),
  FOREIGN KEY (unlocked_event_seq) REFERENCES progress_events(event_seq)
);

CREATE TRIGGER IF NOT EXISTS trg_user_achievements_no_update
BEFORE UPDATE ON user_achievements
BEGIN
  SELECT RAISE(FAIL, 'achievement unlocks are permanent');
END;

CREATE TRIGGER IF NOT EXISTS trg_user_achievements_no_delete
BEFORE DELETE ON user_achievements
BEGIN
  SELECT RAISE(FAIL, 'achievement unlocks are permanent');
END;
";

pub struct SqliteProgressStore {
    conn: Connection,
}

/// A persisted snapshot with its optimistic-concurrency revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredProgress {
    pub progress: UserProgress,
    pub revision: u64,
    /// Value of the `level` cache column as written.
    pub cached_level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event_seq: i64,
    pub event_id: Ulid,
    pub user_id: UserId,
    pub ruleset_version: u32,
    /// Row in `achievement_catalogs` holding the catalog the event ran with.
    pub catalog_id: i64,
    pub event: ProgressEvent,
    pub recorded_at: String,
    pub outcome: ProgressOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedEvent {
    pub recorded: RecordedEvent,
    pub progress: UserProgress,
    pub revision: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub xp: u64,
    pub level: u32,
    pub streak: u32,
    pub tasks_completed: u32,
    pub planners_created: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplayReport {
    pub user_id: UserId,
    pub processed_events: usize,
    pub progress: UserProgress,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressIssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressIssue {
    pub code: String,
    pub severity: ProgressIssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressCheck {
    pub contract_version: String,
    pub user_id: UserId,
    pub healthy: bool,
    pub revision: u64,
    pub replayed_events: usize,
    pub stored: UserProgress,
    pub replayed: UserProgress,
    pub issues: Vec<ProgressIssue>,
}

impl SqliteProgressStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_PROGRESS_V1)
            .context("failed to apply progress schema")?;

        let now = format_rfc3339(now_utc()).map_err(core_error)?;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![PROGRESS_MIGRATION_VERSION, now],
            )
            .context("failed to register progress schema migration")?;
        if inserted > 0 {
            info!(version = PROGRESS_MIGRATION_VERSION, "applied progress schema migration");
        }

        self.conn
            .execute(
                "INSERT OR IGNORE INTO progress_rulesets(ruleset_version, ruleset_json, created_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    1_i64,
                    serde_json::to_string(&ProgressRuleset::v1())
                        .context("failed to serialize ruleset")?,
                    now
                ],
            )
            .context("failed to seed default ruleset")?;

        Ok(())
    }

    /// Stores `ruleset` under its version. A version that recorded events
    /// already reference is frozen: re-registering the identical payload is a
    /// no-op and any change is rejected.
    pub fn upsert_ruleset(&self, ruleset: &ProgressRuleset) -> Result<()> {
        ruleset
            .validate()
            .map_err(|err| anyhow!("invalid ruleset configuration: {err}"))?;

        if self.get_ruleset(ruleset.ruleset_version)?.as_ref() == Some(ruleset) {
            debug!(ruleset_version = ruleset.ruleset_version, "ruleset unchanged");
            return Ok(());
        }

        let referenced: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM progress_events WHERE ruleset_version = ?1",
                params![i64::from(ruleset.ruleset_version)],
                |row| row.get(0),
            )
            .context("failed to count events for ruleset")?;
        if referenced > 0 {
            warn!(
                ruleset_version = ruleset.ruleset_version,
                referenced, "rejected change to a ruleset in use"
            );
            return Err(anyhow!(
                "ruleset_version {} is referenced by {referenced} recorded events and cannot be \
                 changed; register a new ruleset_version instead",
                ruleset.ruleset_version
            ));
        }

        let payload = serde_json::to_string(ruleset).context("failed to serialize ruleset")?;
        let now = format_rfc3339(now_utc()).map_err(core_error)?;

        self.conn
            .execute(
                "INSERT INTO progress_rulesets(ruleset_version, ruleset_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(ruleset_version) DO UPDATE SET
                   ruleset_json = excluded.ruleset_json,
                   created_at = excluded.created_at",
                params![i64::from(ruleset.ruleset_version), payload, now],
            )
            .context("failed to upsert ruleset")?;

        info!(ruleset_version = ruleset.ruleset_version, "stored progress ruleset");
        Ok(())
    }

    pub fn get_rulesets(&self) -> Result<BTreeMap<u32, ProgressRuleset>> {
        let mut stmt = self.conn.prepare(
            "SELECT ruleset_version, ruleset_json
             FROM progress_rulesets
             ORDER BY ruleset_version ASC",
        )?;

        let mut rows = stmt.query([])?;
        let mut map = BTreeMap::new();

        while let Some(row) = rows.next()? {
            let version_i64: i64 = row.get(0)?;
            let version = u32::try_from(version_i64)
                .with_context(|| format!("invalid ruleset_version: {version_i64}"))?;
            let json: String = row.get(1)?;
            let value: Value =
                serde_json::from_str(&json).context("invalid stored ruleset JSON")?;
            let ruleset = ProgressRuleset::from_json(&value)
                .map_err(|err| anyhow!("failed to parse ruleset {version}: {err}"))?;
            map.insert(version, ruleset);
        }

        Ok(map)
    }

    pub fn get_ruleset(&self, ruleset_version: u32) -> Result<Option<ProgressRuleset>> {
        Ok(self.get_rulesets()?.remove(&ruleset_version))
    }

    pub fn create_user(&self, user_id: UserId) -> Result<StoredProgress> {
        let progress = UserProgress::new(user_id);
        let now = format_rfc3339(now_utc()).map_err(core_error)?;

        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO user_progress(
                    user_id, xp, level, streak, last_activity_date,
                    tasks_completed, planners_created, revision, created_at, updated_at
                 ) VALUES (?1, 0, ?2, 0, NULL, 0, 0, 0, ?3, ?3)",
                params![user_id.to_string(), i64::from(progress.level()), now],
            )
            .context("failed to insert user progress")?;

        if inserted == 0 {
            return Err(anyhow!("user {user_id} already exists"));
        }

        info!(%user_id, "created user progress");
        Ok(StoredProgress {
            cached_level: progress.level(),
            progress,
            revision: 0,
        })
    }

    pub fn get_progress(&self, user_id: UserId) -> Result<Option<StoredProgress>> {
        load_progress(&self.conn, user_id)
    }

    pub fn list_user_ids(&self) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM user_progress ORDER BY user_id ASC")?;
        let rows = stmt.query_map([], |row| parse_user_id(0, &row.get::<_, String>(0)?))?;
        collect_rows(rows)
    }

    /// Runs `event` through `coordinator` against the stored snapshot and
    /// persists the result in one immediate transaction.
    ///
    /// When `expected_revision` is given it must match the stored revision.
    /// The snapshot row is only rewritten if its revision is unchanged since
    /// it was read; otherwise the whole transaction is rolled back.
    pub fn apply_event(
        &mut self,
        coordinator: &GamificationCoordinator,
        user_id: UserId,
        event: &ProgressEvent,
        expected_revision: Option<u64>,
    ) -> Result<AppliedEvent> {
        let ruleset = coordinator.ruleset();
        match self.get_ruleset(ruleset.ruleset_version)? {
            Some(stored) if stored == *ruleset => {}
            Some(_) => {
                return Err(anyhow!(
                    "ruleset_version {} differs from the stored ruleset",
                    ruleset.ruleset_version
                ))
            }
            None => {
                return Err(anyhow!(
                    "missing ruleset_version {} in progress_rulesets",
                    ruleset.ruleset_version
                ))
            }
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start event transaction")?;

        let stored =
            load_progress(&tx, user_id)?.ok_or_else(|| anyhow!("unknown user_id {user_id}"))?;

        if let Some(expected) = expected_revision {
            if expected != stored.revision {
                warn!(%user_id, expected, actual = stored.revision, "progress revision conflict");
                return Err(anyhow!(
                    "revision conflict for user {user_id}: expected {expected}, found {}",
                    stored.revision
                ));
            }
        }

        let transition = coordinator.apply(&stored.progress, event).map_err(|err| {
            anyhow!(
                "failed to apply {} for user {user_id}: {err}",
                event.kind.as_str()
            )
        })?;

        let event_id = Ulid::new();
        let recorded_at = format_rfc3339(now_utc()).map_err(core_error)?;
        let catalog_id = register_catalog(&tx, coordinator.catalog(), &recorded_at)?;

        tx.execute(
            "INSERT INTO progress_events(
                event_id, user_id, ruleset_version, catalog_id, event_type,
                occurred_on, recorded_at, outcome_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event_id.to_string(),
                user_id.to_string(),
                i64::from(ruleset.ruleset_version),
                catalog_id,
                event.kind.as_str(),
                format_calendar_date(event.occurred_on).map_err(core_error)?,
                recorded_at,
                serde_json::to_string(&transition.outcome)
                    .context("failed to serialize progress outcome")?,
            ],
        )
        .context("failed to append progress event")?;
        let event_seq = tx.last_insert_rowid();

        let updated = write_progress(&tx, &transition.progress, stored.revision, &recorded_at)?;
        if updated == 0 {
            warn!(%user_id, revision = stored.revision, "progress snapshot changed during write");
            return Err(anyhow!(
                "revision conflict for user {user_id}: snapshot changed after revision {}",
                stored.revision
            ));
        }

        for achievement in &transition.outcome.newly_unlocked {
            tx.execute(
                "INSERT INTO user_achievements(
                    user_id, achievement_id, unlocked_event_seq, unlocked_at
                 ) VALUES (?1, ?2, ?3, ?4)",
                params![user_id.to_string(), achievement.id, event_seq, recorded_at],
            )
            .with_context(|| format!("failed to record unlock of {}", achievement.id))?;
        }

        tx.commit().context("failed to commit event transaction")?;

        let revision = stored.revision + 1;
        debug!(
            %user_id,
            event_seq,
            event = event.kind.as_str(),
            xp = transition.progress.xp,
            unlocked = transition.outcome.newly_unlocked.len(),
            revision,
            "applied progress event"
        );

        Ok(AppliedEvent {
            recorded: RecordedEvent {
                event_seq,
                event_id,
                user_id,
                ruleset_version: ruleset.ruleset_version,
                catalog_id,
                event: *event,
                recorded_at,
                outcome: transition.outcome,
            },
            progress: transition.progress,
            revision,
        })
    }

    pub fn list_events(&self, user_id: UserId, limit: Option<usize>) -> Result<Vec<RecordedEvent>> {
        let limit = limit.map_or(-1, |value| i64::try_from(value).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(
            "SELECT
                event_seq, event_id, user_id, ruleset_version, catalog_id,
                event_type, occurred_on, recorded_at, outcome_json
             FROM progress_events
             WHERE user_id = ?1
             ORDER BY event_seq ASC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![user_id.to_string(), limit], parse_event_row)?;
        collect_rows(rows)
    }

    /// Users ordered by XP, ties broken by user id.
    pub fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT user_id, xp, streak, tasks_completed, planners_created
             FROM user_progress
             ORDER BY xp DESC, user_id ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            let xp = column_u64(row, 1)?;
            Ok(LeaderboardEntry {
                rank: 0,
                user_id: parse_user_id(0, &row.get::<_, String>(0)?)?,
                xp,
                level: level_for_xp(xp),
                streak: column_u32(row, 2)?,
                tasks_completed: column_u32(row, 3)?,
                planners_created: column_u32(row, 4)?,
            })
        })?;

        let mut entries = collect_rows(rows)?;
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.rank = index + 1;
        }
        Ok(entries)
    }

    /// Rebuilds a user's progress from scratch by running every recorded
    /// event through a coordinator for the ruleset and catalog it was
    /// recorded under.
    pub fn replay_user(&self, user_id: UserId) -> Result<ReplayReport> {
        let rulesets = self.get_rulesets()?;
        let catalogs = load_catalogs(&self.conn)?;
        let events = self.list_events(user_id, None)?;
        let mut coordinators: BTreeMap<(u32, i64), GamificationCoordinator> = BTreeMap::new();
        let mut progress = UserProgress::new(user_id);

        for recorded in &events {
            let key = (recorded.ruleset_version, recorded.catalog_id);
            if !coordinators.contains_key(&key) {
                let ruleset = rulesets.get(&recorded.ruleset_version).ok_or_else(|| {
                    anyhow!(
                        "event {} references missing ruleset_version {}",
                        recorded.event_seq,
                        recorded.ruleset_version
                    )
                })?;
                let catalog = catalogs.get(&recorded.catalog_id).ok_or_else(|| {
                    anyhow!(
                        "event {} references missing catalog {}",
                        recorded.event_seq,
                        recorded.catalog_id
                    )
                })?;
                let coordinator = GamificationCoordinator::new(catalog.clone(), ruleset.clone())
                    .map_err(|err| anyhow!("invalid replay configuration: {err}"))?;
                coordinators.insert(key, coordinator);
            }

            let coordinator = coordinators.get(&key).ok_or_else(|| {
                anyhow!(
                    "missing coordinator for ruleset {} and catalog {}",
                    recorded.ruleset_version,
                    recorded.catalog_id
                )
            })?;
            progress = coordinator
                .apply(&progress, &recorded.event)
                .map_err(|err| anyhow!("failed replaying event {}: {err}", recorded.event_seq))?
                .progress;
        }

        Ok(ReplayReport {
            user_id,
            processed_events: events.len(),
            progress,
        })
    }

    /// Compares the stored snapshot, its level cache and its unlock ledger
    /// with a full replay of the user's events.
    pub fn check_user(&self, user_id: UserId) -> Result<ProgressCheck> {
        let stored = self
            .get_progress(user_id)?
            .ok_or_else(|| anyhow!("unknown user_id {user_id}"))?;
        let replay = self.replay_user(user_id)?;
        let mut issues = Vec::new();

        if let Err(err) = stored.progress.validate() {
            issues.push(ProgressIssue {
                code: "invalid_state".to_string(),
                severity: ProgressIssueSeverity::Error,
                message: err.to_string(),
            });
        }

        if stored.cached_level != stored.progress.level() {
            issues.push(ProgressIssue {
                code: "level_cache_mismatch".to_string(),
                severity: ProgressIssueSeverity::Warning,
                message: format!(
                    "cached level {} does not match level {} derived from xp {}",
                    stored.cached_level,
                    stored.progress.level(),
                    stored.progress.xp
                ),
            });
        }

        let lhs = &stored.progress;
        let rhs = &replay.progress;
        let field_mismatches = [
            ("xp", lhs.xp != rhs.xp),
            ("streak", lhs.streak != rhs.streak),
            (
                "last_activity_date",
                lhs.last_activity_date != rhs.last_activity_date,
            ),
            ("tasks_completed", lhs.tasks_completed != rhs.tasks_completed),
            ("planners_created", lhs.planners_created != rhs.planners_created),
        ];
        for (field, differs) in field_mismatches {
            if differs {
                issues.push(ProgressIssue {
                    code: "snapshot_mismatch".to_string(),
                    severity: ProgressIssueSeverity::Error,
                    message: format!("stored {field} differs from replayed events"),
                });
            }
        }

        let missing: Vec<&String> = rhs
            .unlocked_achievement_ids
            .difference(&lhs.unlocked_achievement_ids)
            .collect();
        if !missing.is_empty() {
            issues.push(ProgressIssue {
                code: "missing_unlocks".to_string(),
                severity: ProgressIssueSeverity::Error,
                message: format!("replay unlocks achievements not in the ledger: {missing:?}"),
            });
        }

        let unexplained: Vec<&String> = lhs
            .unlocked_achievement_ids
            .difference(&rhs.unlocked_achievement_ids)
            .collect();
        if !unexplained.is_empty() {
            issues.push(ProgressIssue {
                code: "unexplained_unlocks".to_string(),
                severity: ProgressIssueSeverity::Error,
                message: format!(
                    "ledger holds achievements replay does not unlock: {unexplained:?}"
                ),
            });
        }

        for issue in &issues {
            warn!(
                %user_id,
                code = %issue.code,
                message = %issue.message,
                "progress consistency issue"
            );
        }

        Ok(ProgressCheck {
            contract_version: "progress_check.v1".to_string(),
            user_id,
            healthy: !issues
                .iter()
                .any(|issue| issue.severity == ProgressIssueSeverity::Error),
            revision: stored.revision,
            replayed_events: replay.processed_events,
            stored: stored.progress,
            replayed: replay.progress,
            issues,
        })
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn load_progress(conn: &Connection, user_id: UserId) -> Result<Option<StoredProgress>> {
    let row = conn
        .query_row(
            "SELECT
                user_id, xp, level, streak, last_activity_date,
                tasks_completed, planners_created, revision
             FROM user_progress
             WHERE user_id = ?1",
            params![user_id.to_string()],
            parse_progress_row,
        )
        .optional()
        .with_context(|| format!("failed to load progress for {user_id}"))?;

    let Some(mut stored) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT achievement_id
         FROM user_achievements
         WHERE user_id = ?1
         ORDER BY achievement_id ASC",
    )?;
    let rows = stmt.query_map(params![user_id.to_string()], |row| row.get::<_, String>(0))?;
    stored.progress.unlocked_achievement_ids =
        collect_rows(rows)?.into_iter().collect::<BTreeSet<_>>();

    Ok(Some(stored))
}

fn write_progress(
    conn: &Connection,
    progress: &UserProgress,
    expected_revision: u64,
    updated_at: &str,
) -> Result<usize> {
    let last_activity_date = progress
        .last_activity_date
        .map(format_calendar_date)
        .transpose()
        .map_err(core_error)?;

    conn.execute(
        "UPDATE user_progress SET
            xp = ?2,
            level = ?3,
            streak = ?4,
            last_activity_date = ?5,
            tasks_completed = ?6,
            planners_created = ?7,
            revision = revision + 1,
            updated_at = ?8
         WHERE user_id = ?1 AND revision = ?9",
        params![
            progress.user_id.to_string(),
            i64::try_from(progress.xp).context("xp exceeds sqlite integer range")?,
            i64::from(progress.level()),
            i64::from(progress.streak),
            last_activity_date,
            i64::from(progress.tasks_completed),
            i64::from(progress.planners_created),
            updated_at,
            i64::try_from(expected_revision).context("revision exceeds sqlite integer range")?,
        ],
    )
    .context("failed to update user progress")
}

fn parse_progress_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredProgress> {
    let user_id = parse_user_id(0, &row.get::<_, String>(0)?)?;
    let last_activity_date = row
        .get::<_, Option<String>>(4)?
        .as_deref()
        .map(parse_calendar_date)
        .transpose()
        .map_err(|err| to_sql_error(4, &err))?;

    let mut progress = UserProgress::new(user_id);
    progress.xp = column_u64(row, 1)?;
    progress.streak = column_u32(row, 3)?;
    progress.last_activity_date = last_activity_date;
    progress.tasks_completed = column_u32(row, 5)?;
    progress.planners_created = column_u32(row, 6)?;

    Ok(StoredProgress {
        progress,
        revision: column_u64(row, 7)?,
        cached_level: column_u32(row, 2)?,
    })
}

fn parse_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordedEvent> {
    let event_id_raw: String = row.get(1)?;
    let event_type_raw: String = row.get(5)?;
    let outcome_json: String = row.get(8)?;

    let event_id = Ulid::from_string(&event_id_raw).map_err(|_| {
        invalid_column(1, Type::Text, format!("invalid event_id ULID: {event_id_raw}"))
    })?;
    let kind = ProgressEventKind::parse(&event_type_raw).ok_or_else(|| {
        invalid_column(5, Type::Text, format!("invalid event_type: {event_type_raw}"))
    })?;
    let occurred_on =
        parse_calendar_date(&row.get::<_, String>(6)?).map_err(|err| to_sql_error(6, &err))?;
    let outcome: ProgressOutcome = serde_json::from_str(&outcome_json)
        .map_err(|err| invalid_column(8, Type::Text, format!("invalid outcome_json: {err}")))?;

    Ok(RecordedEvent {
        event_seq: row.get(0)?,
        event_id,
        user_id: parse_user_id(2, &row.get::<_, String>(2)?)?,
        ruleset_version: column_u32(row, 3)?,
        catalog_id: row.get(4)?,
        event: ProgressEvent { kind, occurred_on },
        recorded_at: row.get(7)?,
        outcome,
    })
}

/// Returns the `achievement_catalogs` row for `catalog`, inserting it on
/// first use. Identical catalogs share one row.
fn register_catalog(
    conn: &Connection,
    catalog: &AchievementCatalog,
    created_at: &str,
) -> Result<i64> {
    let payload = serde_json::to_string(catalog).context("failed to serialize catalog")?;
    conn.execute(
        "INSERT OR IGNORE INTO achievement_catalogs(catalog_json, created_at) VALUES (?1, ?2)",
        params![payload, created_at],
    )
    .context("failed to register achievement catalog")?;

    conn.query_row(
        "SELECT catalog_id FROM achievement_catalogs WHERE catalog_json = ?1",
        params![payload],
        |row| row.get(0),
    )
    .context("failed to load achievement catalog id")
}

fn load_catalogs(conn: &Connection) -> Result<BTreeMap<i64, AchievementCatalog>> {
    let mut stmt = conn.prepare(
        "SELECT catalog_id, catalog_json FROM achievement_catalogs ORDER BY catalog_id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut map = BTreeMap::new();

    while let Some(row) = rows.next()? {
        let catalog_id: i64 = row.get(0)?;
        let json: String = row.get(1)?;
        let value: Value = serde_json::from_str(&json)
            .with_context(|| format!("invalid stored catalog JSON for catalog {catalog_id}"))?;
        let catalog = AchievementCatalog::from_json(&value)
            .map_err(|err| anyhow!("failed to parse catalog {catalog_id}: {err}"))?;
        map.insert(catalog_id, catalog);
    }

    Ok(map)
}

fn parse_user_id(index: usize, raw: &str) -> rusqlite::Result<UserId> {
    UserId::parse(raw).map_err(|err| to_sql_error(index, &err))
}

fn column_u64(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(index)?;
    u64::try_from(value)
        .map_err(|_| invalid_column(index, Type::Integer, format!("negative value: {value}")))
}

fn column_u32(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(index)?;
    u32::try_from(value)
        .map_err(|_| invalid_column(index, Type::Integer, format!("out of range value: {value}")))
}

fn invalid_column(index: usize, kind: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn to_sql_error(index: usize, err: &ProgressError) -> rusqlite::Error {
    invalid_column(index, Type::Text, err.to_string())
}

#[allow(clippy::needless_pass_by_value)]
fn core_error(err: ProgressError) -> anyhow::Error {
    anyhow!(err.to_string())
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
