//! Basic CLI E2E tests.
//!
//! Tests invoke the built binary against a throwaway data directory and
//! verify outputs.

use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(data_dir: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_ecotale-cli"))
        .env("ECOTALE_DATA_DIR", data_dir)
        .env_remove("ECOTALE_LOG")
        .args(args)
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

fn run_json(data_dir: &Path, args: &[&str]) -> Value {
    let (code, stdout, stderr) = run_cli(data_dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("stdout is JSON")
}

#[test]
fn test_record_completes_daily_task_and_starts_streak() {
    let dir = TempDir::new().unwrap();
    let out = run_json(dir.path(), &["record", "--material", "glass", "--weight", "2"]);

    assert_eq!(out["entry"]["material_type"], "glass");
    assert_eq!(out["entry"]["co2_saved_kg"].as_f64(), Some(5.0));
    assert_eq!(out["completed_tasks"].as_array().unwrap().len(), 1);
    assert_eq!(out["streak"]["current"], 1);
}

#[test]
fn test_large_entry_announces_milestones_once() {
    let dir = TempDir::new().unwrap();
    let first = run_json(dir.path(), &["record", "--material", "plastic", "--weight", "150"]);
    let titles: Vec<&str> = first["announced"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["title"].as_str())
        .collect();
    assert!(titles.iter().any(|t| t.contains("Green Warrior")));

    let second = run_json(dir.path(), &["record", "--material", "plastic", "--weight", "1"]);
    assert!(second["announced"].as_array().unwrap().is_empty());
}

#[test]
fn test_invalid_weight_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(dir.path(), &["record", "--material", "glass", "--weight", "-1"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));

    let (code, _, _) = run_cli(dir.path(), &["record", "--material", "  ", "--weight", "1"]);
    assert_eq!(code, 1);
}

#[test]
fn test_tasks_generate_and_list() {
    let dir = TempDir::new().unwrap();
    let generated = run_json(dir.path(), &["tasks", "generate"]);
    assert_eq!(generated.as_array().unwrap().len(), 2);

    // A second run finds both tasks still live.
    run_json(dir.path(), &["tasks", "generate"]);
    let listed = run_json(dir.path(), &["tasks", "list"]);
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[test]
fn test_notifications_read_all() {
    let dir = TempDir::new().unwrap();
    run_json(dir.path(), &["tasks", "generate"]);

    let unread = run_json(dir.path(), &["notifications", "list", "--unread"]);
    assert!(!unread.as_array().unwrap().is_empty());

    let (code, _, _) = run_cli(dir.path(), &["notifications", "read-all"]);
    assert_eq!(code, 0);
    let unread = run_json(dir.path(), &["notifications", "list", "--unread"]);
    assert!(unread.as_array().unwrap().is_empty());

    let (code, _, _) = run_cli(dir.path(), &["notifications", "clear"]);
    assert_eq!(code, 0);
    let all = run_json(dir.path(), &["notifications", "list"]);
    assert!(all.as_array().unwrap().is_empty());
}

#[test]
fn test_notifications_read_rejects_bad_id() {
    let dir = TempDir::new().unwrap();
    let (code, _, _) = run_cli(dir.path(), &["notifications", "read", "not-a-uuid"]);
    assert_eq!(code, 1);
}

#[test]
fn test_history_orders_and_summarizes() {
    let dir = TempDir::new().unwrap();
    run_json(dir.path(), &["record", "--material", "glass", "--weight", "2"]);
    run_json(dir.path(), &["record", "--material", "paper", "--weight", "5"]);

    let out = run_json(
        dir.path(),
        &["history", "--order-by", "weight_kg", "--desc", "--limit", "1"],
    );
    let entries = out["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["material_type"], "paper");

    let out = run_json(dir.path(), &["history"]);
    assert_eq!(out["summary"]["entry_count"], 2);
    assert_eq!(out["summary"]["total_kg"].as_f64(), Some(7.0));
}

#[test]
fn test_delete_removes_entry_and_refreshes_history() {
    let dir = TempDir::new().unwrap();
    let kept = run_json(dir.path(), &["record", "--material", "glass", "--weight", "2"]);
    let gone = run_json(dir.path(), &["record", "--material", "paper", "--weight", "5"]);

    // Warm the cached history read before deleting.
    let out = run_json(dir.path(), &["history"]);
    assert_eq!(out["summary"]["entry_count"], 2);

    let id = gone["entry"]["id"].as_str().unwrap();
    let (code, stdout, _) = run_cli(dir.path(), &["delete", id]);
    assert_eq!(code, 0);
    assert!(stdout.contains("entry deleted"));

    let out = run_json(dir.path(), &["history"]);
    let entries = out["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], kept["entry"]["id"]);

    // Deleting again, or a malformed id, fails.
    let (code, _, stderr) = run_cli(dir.path(), &["delete", id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("no entry"));
    let (code, _, _) = run_cli(dir.path(), &["delete", "not-a-uuid"]);
    assert_eq!(code, 1);
}

#[test]
fn test_history_rejects_unknown_order() {
    let dir = TempDir::new().unwrap();
    let (code, _, _) = run_cli(dir.path(), &["history", "--order-by", "colour"]);
    assert_ne!(code, 0);
}

#[test]
fn test_cache_stats_and_clear() {
    let dir = TempDir::new().unwrap();
    run_json(dir.path(), &["history"]);

    let stats = run_json(dir.path(), &["cache", "stats"]);
    assert_eq!(stats["item_count"], 1);

    let (code, stdout, _) = run_cli(dir.path(), &["cache", "clear"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("cache cleared"));
    let stats = run_json(dir.path(), &["cache", "stats"]);
    assert_eq!(stats["item_count"], 0);
}

#[test]
fn test_streak_reports_zero_on_fresh_install() {
    let dir = TempDir::new().unwrap();
    let out = run_json(dir.path(), &["streak"]);
    assert_eq!(out["current_streak"], 0);
    assert_eq!(out["effective_streak"], 0);
}

#[test]
fn test_config_get_set_reset() {
    let dir = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(dir.path(), &["config", "get", "tasks.daily_target_kg"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "1.0");

    let (code, _, _) = run_cli(dir.path(), &["config", "set", "tasks.daily_target_kg", "3"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(dir.path(), &["config", "get", "tasks.daily_target_kg"]);
    assert_eq!(stdout.trim(), "3.0");

    // The new target applies to fresh tasks.
    let out = run_json(dir.path(), &["record", "--material", "glass", "--weight", "2"]);
    assert!(out["completed_tasks"].as_array().unwrap().is_empty());

    let (code, _, _) = run_cli(dir.path(), &["config", "reset"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(dir.path(), &["config", "get", "tasks.daily_target_kg"]);
    assert_eq!(stdout.trim(), "1.0");
}

#[test]
fn test_config_unknown_key_fails() {
    let dir = TempDir::new().unwrap();
    let (code, _, _) = run_cli(dir.path(), &["config", "get", "nope.nothing"]);
    assert_eq!(code, 1);
    let (code, _, _) = run_cli(dir.path(), &["config", "set", "nope", "1"]);
    assert_eq!(code, 1);
}
