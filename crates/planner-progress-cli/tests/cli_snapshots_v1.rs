#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};
use ulid::Ulid;

const FIXTURE_USER: &str = "01J0SQQP7M70P6Y3R4T8D8G8M2";

fn pp_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_pp") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/pp");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "planner-progress-cli", "--bin", "pp"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build pp binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn pp_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(pp_binary_path());
    command.env_remove("PLANNER_PROGRESS_CATALOG");
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to execute pp command {:?}: {err}", args),
    }
}

fn parse_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout json: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn ids(value: &Value) -> Vec<String> {
    match value.as_array() {
        Some(items) => items
            .iter()
            .map(|item| item["id"].as_str().unwrap_or_default().to_string())
            .collect(),
        None => panic!("expected achievement array, got {value}"),
    }
}

#[test]
fn snapshot_stats_after_ten_day_run_v1() {
    let db_path =
        std::env::temp_dir().join(format!("progress-snapshot-stats-{}.sqlite3", Ulid::new()));

    let created = pp_output(
        &db_path,
        &["progress", "user", "create", "--user-id", FIXTURE_USER],
    );
    assert!(created.status.success());

    for day in 1..=10 {
        let on = format!("2026-02-{day:02}");
        let output = pp_output(
            &db_path,
            &["progress", "task", "complete", "--user-id", FIXTURE_USER, "--on", &on],
        );
        assert!(
            output.status.success(),
            "task complete failed on {on}: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let output = pp_output(
        &db_path,
        &["progress", "stats", "--user-id", FIXTURE_USER, "--json"],
    );
    assert!(output.status.success());
    let payload = parse_json(&output);

    assert_eq!(payload["contract_version"], json!("display_stats.v1"));
    assert_eq!(payload["user_id"], json!(FIXTURE_USER));
    assert_eq!(payload["revision"], json!(10));
    assert_eq!(payload["level"], json!(2));
    assert_eq!(payload["xp"], json!(100));
    assert_eq!(payload["xp_to_next_level"], json!(100));
    assert_eq!(payload["progress_percent"], json!(0));
    assert_eq!(payload["streak"], json!(10));
    assert_eq!(payload["tasks_completed"], json!(10));
    assert_eq!(payload["planners_created"], json!(0));
    assert_eq!(
        ids(&payload["unlocked_achievements"]),
        vec!["first_task", "task_master", "week_streak"]
    );
    assert_eq!(
        ids(&payload["locked_achievements"]),
        vec!["centenarian", "month_streak", "level_10", "planner_pro"]
    );

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn snapshot_achievement_catalog_listing_v1() {
    let db_path =
        std::env::temp_dir().join(format!("progress-snapshot-catalog-{}.sqlite3", Ulid::new()));

    let output = pp_output(&db_path, &["progress", "achievements", "list", "--json"]);
    assert!(output.status.success());
    let payload = parse_json(&output);

    assert_eq!(
        payload[0],
        json!({
            "id": "first_task",
            "name": "First Task",
            "description": "Complete your first task",
            "icon": "🎯",
            "requirement": { "metric": "tasks_completed", "threshold": 1 },
            "unlocked": false
        })
    );
    assert_eq!(
        ids(&payload),
        vec![
            "first_task",
            "task_master",
            "centenarian",
            "week_streak",
            "month_streak",
            "level_10",
            "planner_pro"
        ]
    );

    let _ = std::fs::remove_file(&db_path);
}
