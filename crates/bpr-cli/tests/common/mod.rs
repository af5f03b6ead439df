//! Shared test utilities for bpr-cli integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;

/// Get a Command for the bpr binary.
///
/// # Panics
///
/// Panics if the bpr binary cannot be found.
#[allow(deprecated)]
pub fn bpr_cmd() -> Command {
    let mut cmd = Command::cargo_bin("bpr").expect("bpr binary should exist");
    cmd.env_remove("BPR_CONFIG")
        .env_remove("BPR_VERBOSE")
        .env_remove("BPR_QUIET")
        .env("BPR_COLOR", "never");
    cmd
}

/// Write a config using the file-backed index and the local embedder.
pub fn write_config(dir: &Path) -> PathBuf {
    let config = format!(
        r#"retrieval:
  k: 3
index:
  backend: simple
  path: {index}
  dimension: 64
embedding:
  provider: local
  dimension: 64
eval:
  maxConcurrency: 2
  reportDir: {reports}
"#,
        index = dir.join("index").display(),
        reports = dir.join("reports").display(),
    );
    let path = dir.join("config.yaml");
    std::fs::write(&path, config).expect("write config");
    path
}

pub const CHUNKS: &str = r#"{"rider_id": "r1", "chunk_index": 0, "text": "steel frame, rigid fork, mechanical shifting, 2.2in tyres", "electronic_shifting": false, "frame_type": "rigid"}
{"rider_id": "r2", "chunk_index": 0, "text": "carbon frame, electronic shifting, 40mm tyres", "electronic_shifting": true}
{"rider_id": "r3", "chunk_index": 0, "text": "full suspension bike with garmin and wide range gearing", "frame_type": "full suspension"}
{"rider_id": "r3", "chunk_index": 1, "text": "tubeless with plugs for puncture repair"}
"#;
