use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use jsonschema::JSONSchema;
use serde_json::Value;
use ulid::Ulid;

const FIXTURE_USER: &str = "01J0SQQP7M70P6Y3R4T8D8G8M2";

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn read_json(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse {}: {err}", path.display()))
}

fn assert_schema(schema_path: &Path, value: &Value) {
    let schema = read_json(schema_path);
    let compiled = JSONSchema::compile(&schema)
        .unwrap_or_else(|err| panic!("failed to compile {}: {err}", schema_path.display()));
    if let Some(errors) = compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!(
            "schema validation failed for {}:\n{}",
            schema_path.display(),
            errors.join("\n")
        );
    }
}

fn pp_json(db_path: &Path, catalog: Option<&Path>, args: &[&str]) -> Value {
    let binary = std::env::var("CARGO_BIN_EXE_pp")
        .unwrap_or_else(|err| panic!("pp binary path unavailable: {err}"));
    let mut command = Command::new(binary);
    command.env_remove("PLANNER_PROGRESS_CATALOG");
    command.arg("--db").arg(db_path);
    if let Some(path) = catalog {
        command.arg("--catalog").arg(path);
    }
    command.args(args);

    let output = command
        .output()
        .unwrap_or_else(|err| panic!("failed to run pp {args:?}: {err}"));
    assert!(
        output.status.success(),
        "pp {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|err| panic!("pp {args:?} did not print JSON: {err}"))
}

#[test]
fn contract_pack_validates_fixtures() {
    let repo = repo_root();
    let schema_dir = repo.join("contracts/v1/schemas");
    let fixture_dir = repo.join("contracts/v1/fixtures");

    assert_schema(
        &schema_dir.join("achievement-catalog.schema.json"),
        &read_json(&fixture_dir.join("achievement-catalog.sample.json")),
    );

    let ruleset = read_json(&fixture_dir.join("ruleset-v2.sample.json"));
    assert_eq!(ruleset["ruleset_version"], serde_json::json!(2));
}

#[test]
fn cli_payloads_match_contract_schemas() {
    let repo = repo_root();
    let schema_dir = repo.join("contracts/v1/schemas");
    let db_path =
        std::env::temp_dir().join(format!("progress-schema-{}.sqlite3", Ulid::new()));

    let _ = pp_json(
        &db_path,
        None,
        &["progress", "user", "create", "--user-id", FIXTURE_USER],
    );

    let mut events = Vec::new();
    for day in ["2026-02-07", "2026-02-08", "2026-02-10"] {
        events.push(pp_json(
            &db_path,
            None,
            &[
                "progress", "task", "complete", "--user-id", FIXTURE_USER, "--on", day, "--json",
            ],
        ));
    }
    events.push(pp_json(
        &db_path,
        None,
        &[
            "progress", "task", "uncomplete", "--user-id", FIXTURE_USER, "--on", "2026-02-10",
            "--json",
        ],
    ));
    events.push(pp_json(
        &db_path,
        None,
        &["progress", "planner", "create", "--user-id", FIXTURE_USER, "--json"],
    ));

    for payload in &events {
        assert_schema(&schema_dir.join("progress-event.schema.json"), payload);
    }
    assert_eq!(events[2]["outcome"]["streak_change"], serde_json::json!("reset"));
    assert_eq!(events[4]["outcome"]["streak_change"], Value::Null);

    let stats = pp_json(
        &db_path,
        None,
        &["progress", "stats", "--user-id", FIXTURE_USER, "--json"],
    );
    assert_schema(&schema_dir.join("display-stats.schema.json"), &stats);

    let catalog_stats = pp_json(
        &db_path,
        Some(&repo.join("contracts/v1/fixtures/achievement-catalog.sample.json")),
        &["progress", "stats", "--user-id", FIXTURE_USER, "--json"],
    );
    assert_schema(&schema_dir.join("display-stats.schema.json"), &catalog_stats);

    let _ = fs::remove_file(&db_path);
}
