//! Command surface for driving the progression engine from host services.
//!
//! Hosts (the task, planner and auth services) embed progress behavior through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_progress_with_db`] for direct [`ProgressCommand`] execution against a DB path.
//! - [`run_progress`] for execution against an existing [`SqliteProgressStore`].

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use planner_progress_core::{
    parse_calendar_date, today_utc, AchievementCatalog, AchievementStatus, DisplayStats,
    GamificationCoordinator, ProgressEvent, ProgressEventKind, ProgressOutcome, ProgressRuleset,
    UserId,
};
use planner_progress_store_sqlite::{
    AppliedEvent, LeaderboardEntry, ProgressCheck, ProgressIssueSeverity, RecordedEvent,
    SqliteProgressStore,
};
use serde_json::Value;
use time::Date;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "pp")]
#[command(about = "Planner progress CLI")]
pub struct Cli {
    #[arg(long, env = "PLANNER_PROGRESS_DB", default_value = "./planner_progress.sqlite3")]
    db: PathBuf,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

/// Selects the achievement catalog and ruleset the coordinator runs with.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// JSON achievement catalog; the built-in v1 catalog when omitted.
    #[arg(long, global = true, env = "PLANNER_PROGRESS_CATALOG")]
    pub catalog: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = 1)]
    pub ruleset_version: u32,
}

impl Default for EngineArgs {
    fn default() -> Self {
        Self {
            catalog: None,
            ruleset_version: 1,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Progress {
        #[command(subcommand)]
        command: Box<ProgressCommand>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ProgressCommand {
    User {
        #[command(subcommand)]
        command: Box<UserCommand>,
    },
    Task {
        #[command(subcommand)]
        command: Box<TaskCommand>,
    },
    Planner {
        #[command(subcommand)]
        command: Box<PlannerCommand>,
    },
    /// Record a qualifying daily activity.
    Activity(EventArgs),
    Stats(UserArgs),
    Achievements {
        #[command(subcommand)]
        command: Box<AchievementsCommand>,
    },
    Events {
        #[command(subcommand)]
        command: Box<EventsCommand>,
    },
    Leaderboard(LeaderboardArgs),
    /// Replay recorded events under the ruleset and catalog each was
    /// recorded with, and compare the result with stored snapshots.
    Check(CheckArgs),
    Rules {
        #[command(subcommand)]
        command: Box<RulesCommand>,
    },
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    Create(UserCreateArgs),
    Show(UserArgs),
}

#[derive(Debug, Args)]
pub struct UserCreateArgs {
    #[arg(long)]
    user_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct UserArgs {
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    Complete(EventArgs),
    Uncomplete(EventArgs),
}

#[derive(Debug, Subcommand)]
pub enum PlannerCommand {
    Create(EventArgs),
}

#[derive(Debug, Args)]
pub struct EventArgs {
    #[arg(long)]
    user_id: String,
    /// Calendar day (`YYYY-MM-DD`) the event counts toward; today (UTC) when omitted.
    #[arg(long)]
    on: Option<String>,
    #[arg(long)]
    expected_revision: Option<u64>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum AchievementsCommand {
    List(AchievementsListArgs),
}

#[derive(Debug, Args)]
pub struct AchievementsListArgs {
    /// Marks each entry as unlocked or locked for this user.
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum EventsCommand {
    List(EventsListArgs),
}

#[derive(Debug, Args)]
pub struct EventsListArgs {
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct LeaderboardArgs {
    #[arg(long, default_value_t = 10)]
    limit: usize,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Checks every stored user when omitted.
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    Set(RulesSetArgs),
    List,
}

#[derive(Debug, Args)]
pub struct RulesSetArgs {
    #[arg(long)]
    file: PathBuf,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Progress { command } => run_progress_with_db(&cli.db, &cli.engine, *command),
    }
}

/// Executes a parsed progress command using the provided `SQLite` DB path.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_progress_with_db(
    db_path: &Path,
    engine: &EngineArgs,
    command: ProgressCommand,
) -> Result<()> {
    let mut store = SqliteProgressStore::open(db_path)?;
    store.migrate()?;
    run_progress(command, engine, &mut store)
}

/// Executes a parsed progress command against an existing store handle.
///
/// # Errors
/// Returns an error when argument validation, engine configuration, or a
/// store operation fails, and when a consistency check reports errors.
pub fn run_progress(
    command: ProgressCommand,
    engine: &EngineArgs,
    store: &mut SqliteProgressStore,
) -> Result<()> {
    match command {
        ProgressCommand::User { command } => run_user(*command, store),
        ProgressCommand::Task { command } => match *command {
            TaskCommand::Complete(args) => {
                run_event(ProgressEventKind::TaskCompleted, &args, engine, store)
            }
            TaskCommand::Uncomplete(args) => {
                run_event(ProgressEventKind::TaskUncompleted, &args, engine, store)
            }
        },
        ProgressCommand::Planner { command } => match *command {
            PlannerCommand::Create(args) => {
                run_event(ProgressEventKind::PlannerCreated, &args, engine, store)
            }
        },
        ProgressCommand::Activity(args) => {
            run_event(ProgressEventKind::DailyActivity, &args, engine, store)
        }
        ProgressCommand::Stats(args) => {
            let coordinator = load_coordinator(engine, store)?;
            let user_id = parse_user_id(&args.user_id)?;
            let stored = store
                .get_progress(user_id)?
                .ok_or_else(|| anyhow!("user not found: {user_id}"))?;
            let stats = coordinator
                .display_stats(&stored.progress)
                .map_err(|err| anyhow!("failed to build stats for {user_id}: {err}"))?;

            if args.json {
                let payload = StatsJsonPayload {
                    contract_version: "display_stats.v1".to_string(),
                    user_id,
                    revision: stored.revision,
                    stats,
                };
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_stats(user_id, &stats);
            }
            Ok(())
        }
        ProgressCommand::Achievements { command } => match *command {
            AchievementsCommand::List(args) => {
                let catalog = load_catalog(engine)?;
                let statuses = match args.user_id.as_deref() {
                    Some(raw) => {
                        let user_id = parse_user_id(raw)?;
                        let stored = store
                            .get_progress(user_id)?
                            .ok_or_else(|| anyhow!("user not found: {user_id}"))?;
                        catalog.statuses_for(&stored.progress)
                    }
                    None => catalog
                        .as_slice()
                        .iter()
                        .map(|achievement| AchievementStatus {
                            achievement: achievement.clone(),
                            unlocked: false,
                        })
                        .collect(),
                };

                if args.json {
                    println!("{}", serde_json::to_string_pretty(&statuses)?);
                } else {
                    print_achievements(&statuses, args.user_id.is_some());
                }
                Ok(())
            }
        },
        ProgressCommand::Events { command } => match *command {
            EventsCommand::List(args) => {
                let user_id = parse_user_id(&args.user_id)?;
                let events = store.list_events(user_id, args.limit)?;
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&events)?);
                } else {
                    print_events(&events);
                }
                Ok(())
            }
        },
        ProgressCommand::Leaderboard(args) => {
            let entries = store.leaderboard(args.limit)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_leaderboard(&entries);
            }
            Ok(())
        }
        ProgressCommand::Check(args) => run_check(&args, store),
        ProgressCommand::Rules { command } => match *command {
            RulesCommand::Set(args) => {
                let value = read_json_file(&args.file)?;
                let ruleset = ProgressRuleset::from_json(&value)
                    .map_err(|err| anyhow!("invalid ruleset file {}: {err}", args.file.display()))?;
                store.upsert_ruleset(&ruleset)?;
                println!("{}", serde_json::to_string_pretty(&ruleset)?);
                Ok(())
            }
            RulesCommand::List => {
                let rulesets = store.get_rulesets()?;
                println!("{}", serde_json::to_string_pretty(&rulesets)?);
                Ok(())
            }
        },
    }
}

fn run_user(command: UserCommand, store: &SqliteProgressStore) -> Result<()> {
    match command {
        UserCommand::Create(args) => {
            let user_id = match args.user_id.as_deref() {
                Some(raw) => parse_user_id(raw)?,
                None => UserId::new(),
            };
            let stored = store.create_user(user_id)?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
            Ok(())
        }
        UserCommand::Show(args) => {
            let user_id = parse_user_id(&args.user_id)?;
            let stored = store
                .get_progress(user_id)?
                .ok_or_else(|| anyhow!("user not found: {user_id}"))?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&stored)?);
            } else {
                let progress = &stored.progress;
                println!(
                    "user={} revision={} xp={} level={} streak={} last_activity={} tasks_completed={} planners_created={}",
                    user_id,
                    stored.revision,
                    progress.xp,
                    progress.level(),
                    progress.streak,
                    format_optional_date(progress.last_activity_date),
                    progress.tasks_completed,
                    progress.planners_created
                );
                let unlocked = progress
                    .unlocked_achievement_ids
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(",");
                println!(
                    "unlocked={}",
                    if unlocked.is_empty() {
                        "none"
                    } else {
                        unlocked.as_str()
                    }
                );
            }
            Ok(())
        }
    }
}

fn run_event(
    kind: ProgressEventKind,
    args: &EventArgs,
    engine: &EngineArgs,
    store: &mut SqliteProgressStore,
) -> Result<()> {
    let coordinator = load_coordinator(engine, store)?;
    let user_id = parse_user_id(&args.user_id)?;
    let event = ProgressEvent {
        kind,
        occurred_on: parse_optional_date(args.on.as_deref())?,
    };

    debug!(%user_id, event = kind.as_str(), "dispatching progress event");
    let applied = store.apply_event(&coordinator, user_id, &event, args.expected_revision)?;

    if args.json {
        let payload = build_event_json_payload(&applied);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_outcome(&applied);
    }
    Ok(())
}

fn run_check(args: &CheckArgs, store: &SqliteProgressStore) -> Result<()> {
    let user_ids = match args.user_id.as_deref() {
        Some(raw) => vec![parse_user_id(raw)?],
        None => store.list_user_ids()?,
    };

    let checks = user_ids
        .into_iter()
        .map(|user_id| store.check_user(user_id))
        .collect::<Result<Vec<_>>>()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&checks)?);
    } else {
        for check in &checks {
            print_check(check);
        }
    }

    let failures = checks
        .iter()
        .filter(|check| !check.healthy)
        .flat_map(|check| {
            check
                .issues
                .iter()
                .filter(|issue| issue.severity == ProgressIssueSeverity::Error)
                .map(move |issue| format!("{}:{}:{}", check.user_id, issue.code, issue.message))
        })
        .collect::<Vec<_>>();

    if !failures.is_empty() {
        return Err(anyhow!(
            "progress consistency check failed: {}",
            failures.join("; ")
        ));
    }

    Ok(())
}

fn load_catalog(engine: &EngineArgs) -> Result<AchievementCatalog> {
    match engine.catalog.as_deref() {
        Some(path) => {
            let value = read_json_file(path)?;
            AchievementCatalog::from_json(&value)
                .map_err(|err| anyhow!("invalid achievement catalog {}: {err}", path.display()))
        }
        None => Ok(AchievementCatalog::v1()),
    }
}

fn load_coordinator(
    engine: &EngineArgs,
    store: &SqliteProgressStore,
) -> Result<GamificationCoordinator> {
    let catalog = load_catalog(engine)?;
    let ruleset = store.get_ruleset(engine.ruleset_version)?.ok_or_else(|| {
        anyhow!(
            "ruleset_version {} not found; register it with `pp progress rules set`",
            engine.ruleset_version
        )
    })?;

    GamificationCoordinator::new(catalog, ruleset)
        .map_err(|err| anyhow!("invalid engine configuration: {err}"))
}

fn read_json_file(path: &Path) -> Result<Value> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("{} must be valid JSON", path.display()))
}

fn parse_user_id(raw: &str) -> Result<UserId> {
    UserId::parse(raw).map_err(|err| anyhow!(err.to_string()))
}

fn parse_optional_date(raw: Option<&str>) -> Result<Date> {
    match raw {
        Some(value) => {
            parse_calendar_date(value).map_err(|err| anyhow!("invalid --on value: {err}"))
        }
        None => Ok(today_utc()),
    }
}

fn format_optional_date(value: Option<Date>) -> String {
    value.map_or_else(|| "none".to_string(), |date| date.to_string())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn print_outcome(applied: &AppliedEvent) {
    let outcome = &applied.recorded.outcome;
    let xp_delta = if outcome.xp_revoked > 0 {
        format!("-{}", outcome.xp_revoked)
    } else {
        format!("+{}", outcome.xp_awarded)
    };
    let streak_change = outcome
        .streak_change
        .map_or("n/a", planner_progress_core::StreakChange::as_str);

    println!(
        "event={} on={} xp={} total_xp={} level={} leveled_up={} streak={} streak_change={} revision={}",
        outcome.event.as_str(),
        applied.recorded.event.occurred_on,
        xp_delta,
        applied.progress.xp,
        outcome.new_level,
        yes_no(outcome.leveled_up),
        outcome.streak,
        streak_change,
        applied.revision
    );
    for achievement in &outcome.newly_unlocked {
        println!(
            "unlocked {} {} - {}",
            achievement.icon, achievement.name, achievement.description
        );
    }
}

fn print_stats(user_id: UserId, stats: &DisplayStats) {
    println!(
        "user={} level={} xp={} xp_to_next_level={} progress={}% streak={} tasks_completed={} planners_created={}",
        user_id,
        stats.level,
        stats.xp,
        stats.xp_to_next_level,
        stats.progress_percent,
        stats.streak,
        stats.tasks_completed,
        stats.planners_created
    );
    println!(
        "achievements={}/{}",
        stats.unlocked_achievements.len(),
        stats.unlocked_achievements.len() + stats.locked_achievements.len()
    );
}

fn print_achievements(statuses: &[AchievementStatus], with_user: bool) {
    println!(
        "{:<16} {:<20} {:<18} {:<9} unlocked",
        "id", "name", "metric", "threshold"
    );
    println!("{}", "-".repeat(76));
    for status in statuses {
        let achievement = &status.achievement;
        println!(
            "{:<16} {:<20} {:<18} {:<9} {}",
            achievement.id,
            achievement.name,
            achievement.requirement.metric.as_str(),
            achievement.requirement.threshold,
            if with_user {
                yes_no(status.unlocked)
            } else {
                "n/a"
            }
        );
    }
}

fn print_events(events: &[RecordedEvent]) {
    println!(
        "{:<6} {:<11} {:<17} {:<7} {:<8} {:<7} unlocked",
        "seq", "on", "event", "xp", "ruleset", "catalog"
    );
    println!("{}", "-".repeat(72));
    for recorded in events {
        let outcome = &recorded.outcome;
        let xp_delta = if outcome.xp_revoked > 0 {
            format!("-{}", outcome.xp_revoked)
        } else {
            format!("+{}", outcome.xp_awarded)
        };
        let unlocked = outcome
            .newly_unlocked
            .iter()
            .map(|achievement| achievement.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<6} {:<11} {:<17} {:<7} {:<8} {:<7} {}",
            recorded.event_seq,
            recorded.event.occurred_on,
            recorded.event.kind.as_str(),
            xp_delta,
            recorded.ruleset_version,
            recorded.catalog_id,
            if unlocked.is_empty() { "-" } else { unlocked.as_str() }
        );
    }
}

fn print_leaderboard(entries: &[LeaderboardEntry]) {
    println!(
        "{:<5} {:<28} {:<8} {:<6} {:<7} tasks",
        "rank", "user_id", "xp", "level", "streak"
    );
    println!("{}", "-".repeat(66));
    for entry in entries {
        println!(
            "{:<5} {:<28} {:<8} {:<6} {:<7} {}",
            entry.rank, entry.user_id, entry.xp, entry.level, entry.streak, entry.tasks_completed
        );
    }
}

fn print_check(check: &ProgressCheck) {
    println!(
        "contract={} user={} revision={} replayed_events={} healthy={}",
        check.contract_version,
        check.user_id,
        check.revision,
        check.replayed_events,
        yes_no(check.healthy)
    );
    if !check.issues.is_empty() {
        let formatted = check
            .issues
            .iter()
            .map(|item| {
                let severity = match item.severity {
                    ProgressIssueSeverity::Warning => "warning",
                    ProgressIssueSeverity::Error => "error",
                };
                format!("{severity}:{}:{}", item.code, item.message)
            })
            .collect::<Vec<_>>()
            .join(" | ");
        println!("issues={formatted}");
        println!(
            "hint=run `pp progress events list --user-id {}` to inspect history",
            check.user_id
        );
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct StatsJsonPayload {
    contract_version: String,
    user_id: UserId,
    revision: u64,
    #[serde(flatten)]
    stats: DisplayStats,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventJsonPayload {
    contract_version: String,
    user_id: UserId,
    event_seq: i64,
    revision: u64,
    ruleset_version: u32,
    occurred_on: Date,
    xp: u64,
    outcome: ProgressOutcome,
}

fn build_event_json_payload(applied: &AppliedEvent) -> EventJsonPayload {
    EventJsonPayload {
        contract_version: "progress_event.v1".to_string(),
        user_id: applied.recorded.user_id,
        event_seq: applied.recorded.event_seq,
        revision: applied.revision,
        ruleset_version: applied.recorded.ruleset_version,
        occurred_on: applied.recorded.event.occurred_on,
        xp: applied.progress.xp,
        outcome: applied.recorded.outcome.clone(),
    }
}
