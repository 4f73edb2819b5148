//! End-to-end tests for the `estore` binary.
//!
//! Stdout is a pipe here, so every command emits JSON.

use assert_cmd::Command;
use estore::storage::migrations::default_catalog;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn db(dir: &TempDir) -> PathBuf {
    dir.path().join("data").join("estore.db")
}

fn estore(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("estore").unwrap();
    cmd.env_remove("ESTORE_TEST_DB")
        .env_remove("RUST_LOG")
        .arg("--db")
        .arg(db);
    cmd
}

fn catalog_ids() -> Vec<String> {
    default_catalog().into_iter().map(|m| m.id).collect()
}

fn stdout_json(cmd: &mut Command) -> Value {
    let assert = cmd.assert().success();
    serde_json::from_slice(&assert.get_output().stdout).unwrap()
}

fn stderr_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stderr).unwrap()
}

#[test]
fn migrate_creates_store_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = db(&dir);

    let first = stdout_json(estore(&db).arg("migrate"));
    assert_eq!(first["applied"], serde_json::json!(catalog_ids()));
    assert!(db.exists());

    let second = stdout_json(estore(&db).arg("migrate"));
    assert_eq!(second["applied"], serde_json::json!([]));
    assert_eq!(second["skipped"], 4);
}

#[test]
fn put_with_transition_records_audit_entry() {
    let dir = TempDir::new().unwrap();
    let db = db(&dir);

    let put = stdout_json(estore(&db).args([
        "--actor",
        "alice",
        "put",
        "task",
        "t1",
        r#"{"title":"Write docs","status":"done","tags":["docs"]}"#,
        "--from-state",
        "open",
        "--to-state",
        "done",
        "--reason",
        "finished",
    ]));
    assert_eq!(put["id"], "t1");
    assert!(put["transitionId"].as_str().unwrap().starts_with("aud_"));

    let task = stdout_json(estore(&db).args(["get", "task", "t1"]));
    assert_eq!(task["title"], "Write docs");
    assert_eq!(task["tags"][0], "docs");

    let audit = stdout_json(estore(&db).args(["audit", "--type", "task", "--id", "t1"]));
    assert_eq!(audit["count"], 1);
    let transition = &audit["transitions"][0];
    assert_eq!(transition["fromState"], "open");
    assert_eq!(transition["toState"], "done");
    assert_eq!(transition["actor"]["id"], "alice");
    assert_eq!(transition["reason"], "finished");
}

#[test]
fn failed_put_keeps_neither_entity_nor_transition() {
    let dir = TempDir::new().unwrap();
    let db = db(&dir);

    // status is NOT NULL, so the save fails after the transaction opens
    estore(&db)
        .args(["put", "task", "t1", r#"{"title":"No status"}"#, "--to-state", "open"])
        .assert()
        .code(2);

    let audit = stdout_json(estore(&db).arg("audit"));
    assert_eq!(audit["count"], 0);
    let list = stdout_json(estore(&db).args(["list", "task"]));
    assert_eq!(list["count"], 0);
}

#[test]
fn unsupported_type_exits_with_validation_code() {
    let dir = TempDir::new().unwrap();
    let db = db(&dir);

    let assert = estore(&db)
        .args(["put", "widget", "w1", "{}"])
        .assert()
        .code(5);
    let err = stderr_json(assert.get_output());
    assert_eq!(err["error"]["code"], "UNSUPPORTED_ENTITY_TYPE");
    assert!(err["error"]["hint"].as_str().unwrap().contains("job_run"));
}

#[test]
fn missing_entity_exits_with_not_found_code() {
    let dir = TempDir::new().unwrap();
    let db = db(&dir);

    let assert = estore(&db).args(["get", "note", "n404"]).assert().code(4);
    let err = stderr_json(assert.get_output());
    assert_eq!(err["error"]["code"], "NOT_FOUND");
}

#[test]
fn delete_reports_whether_a_row_was_removed() {
    let dir = TempDir::new().unwrap();
    let db = db(&dir);

    estore(&db)
        .args(["put", "note", "n1", r#"{"body":"hello"}"#])
        .assert()
        .success();

    let first = stdout_json(estore(&db).args(["delete", "note", "n1"]));
    assert_eq!(first["deleted"], true);
    let second = stdout_json(estore(&db).args(["delete", "note", "n1"]));
    assert_eq!(second["deleted"], false);
}

#[test]
fn jobs_lists_runs_newest_first() {
    let dir = TempDir::new().unwrap();
    let db = db(&dir);

    for (id, at) in [
        ("r1", "2024-05-01T00:00:00Z"),
        ("r2", "2024-05-02T00:00:00Z"),
        ("r3", "2024-05-03T00:00:00Z"),
    ] {
        let value = format!(r#"{{"jobId":"nightly","status":"ok","at":"{at}"}}"#);
        estore(&db)
            .args(["put", "job_run", id, value.as_str()])
            .assert()
            .success();
    }

    let runs = stdout_json(estore(&db).args([
        "jobs",
        "nightly",
        "--before",
        "2024-05-03T00:00:00Z",
        "--limit",
        "5",
    ]));
    assert_eq!(runs["count"], 2);
    assert_eq!(runs["runs"][0]["id"], "r2");
    assert_eq!(runs["runs"][1]["id"], "r1");
}

#[test]
fn status_reports_ledger_and_counts() {
    let dir = TempDir::new().unwrap();
    let db = db(&dir);

    estore(&db)
        .args(["put", "signal", "s1", r#"{"source":"mail","kind":"inbound"}"#])
        .assert()
        .success();

    let status = stdout_json(estore(&db).arg("status"));
    assert_eq!(
        status["migrations"].as_array().unwrap().len(),
        catalog_ids().len()
    );
    let signals = status["counts"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["entity_type"] == "signal")
        .unwrap();
    assert_eq!(signals["count"], 1);
}

#[test]
fn version_reports_schema() {
    let dir = TempDir::new().unwrap();
    let version = stdout_json(estore(&db(&dir)).arg("version"));
    assert_eq!(version["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(version["schema"], "004_checkpoints_and_views");
}
