//! Integration tests for the commands that do not need an index.

mod common;

use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use common::{bpr_cmd, write_config};

#[test]
fn test_help_lists_commands() {
    bpr_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("eval"))
        .stdout(predicate::str::contains("build-qrels"));
}

#[test]
fn test_constraints_json() {
    let temp = TempDir::new().expect("create temp dir");
    let config = write_config(temp.path());

    let output = bpr_cmd()
        .arg("--config")
        .arg(&config)
        .args(["constraints", "no suspension, 45-50mm tyres, GB Duro", "--json"])
        .output()
        .expect("run bpr constraints");
    assert!(output.status.success());

    let constraints: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("constraints output is JSON");
    assert_eq!(constraints["avoid_suspension"], true);
    assert_eq!(constraints["prefer_rigid"], true);
    assert_eq!(constraints["tyre_min_mm"], 45);
    assert_eq!(constraints["tyre_max_mm"], 50);
    assert_eq!(constraints["event_key_hint"], "gbd");
}

#[test]
fn test_constraints_none_detected() {
    let temp = TempDir::new().expect("create temp dir");
    let config = write_config(temp.path());

    bpr_cmd()
        .arg("--config")
        .arg(&config)
        .args(["constraints", "a nice bike"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No constraints detected."));
}

#[test]
fn test_build_qrels() {
    let temp = TempDir::new().expect("create temp dir");
    let config = write_config(temp.path());
    let labels = temp.path().join("labels.jsonl");
    let out = temp.path().join("qrels.jsonl");
    fs::write(
        &labels,
        r#"{"qid": "q1", "relevants": [{"rider_id": "r1", "rel": 2}, {"rider_id": 7, "rel": 1}]}
{
  "qid": "q2",
  "relevants": [{"rider_id": "r2", "rel": 0}]
}
"#,
    )
    .expect("write labels");

    let output = bpr_cmd()
        .arg("--config")
        .arg(&config)
        .arg("build-qrels")
        .arg(&labels)
        .arg("--out")
        .arg(&out)
        .args(["--min-rel", "2", "--json"])
        .output()
        .expect("run bpr build-qrels");
    assert!(output.status.success());

    let summary: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("build-qrels output is JSON");
    assert_eq!(summary["rows"], 2);
    assert_eq!(summary["minRel"], 2);
    assert_eq!(summary["emptyRows"], 1);

    let written = fs::read_to_string(&out).expect("read qrels");
    assert_eq!(written.lines().count(), 2);
    assert!(written.contains("r1"));
    assert!(!written.contains("\"7\""));
}

#[test]
fn test_build_qrels_missing_labels_fails() {
    let temp = TempDir::new().expect("create temp dir");
    let config = write_config(temp.path());

    bpr_cmd()
        .arg("--config")
        .arg(&config)
        .arg("build-qrels")
        .arg(temp.path().join("missing.jsonl"))
        .arg("--out")
        .arg(temp.path().join("qrels.jsonl"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing.jsonl"));
}

#[test]
fn test_config_check_json() {
    let temp = TempDir::new().expect("create temp dir");
    let config = write_config(temp.path());

    let output = bpr_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "check", "--json"])
        .output()
        .expect("run bpr config check");
    assert!(output.status.success());

    let check: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("config check output is JSON");
    assert_eq!(check["valid"], true);
    assert_eq!(check["exists"], true);
}

#[test]
fn test_config_show_applies_flags() {
    let temp = TempDir::new().expect("create temp dir");
    let config = write_config(temp.path());

    let output = bpr_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--k", "7", "--no-rerank", "config", "show", "--json"])
        .output()
        .expect("run bpr config show");
    assert!(output.status.success());

    let shown: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("config show output is JSON");
    assert_eq!(shown["retrieval"]["k"], 7);
    assert_eq!(shown["rerank"]["enabled"], false);
    assert_eq!(shown["index"]["backend"], "simple");
}

#[test]
fn test_invalid_config_exits_with_two() {
    let temp = TempDir::new().expect("create temp dir");
    let config = temp.path().join("config.yaml");
    fs::write(&config, "index:\n  dimension: 0\n").expect("write config");

    bpr_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("index.dimension cannot be 0"));
}
