//! CLI tests for the cartograph binary
//!
//! Spawns the binary against temporary projects and checks exit codes and
//! output streams.

use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn cartograph(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cartograph"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to start cartograph binary")
}

fn project() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("a.py"),
        "class Foo:\n    def bar(self):\n        pass\n",
    )
    .unwrap();
    fs::write(temp_dir.path().join("bad.py"), "def broken(:\n").unwrap();
    temp_dir
}

#[test]
fn test_index_exits_zero_with_file_failures() {
    let root = project();
    let db = TempDir::new().unwrap();
    let db_path = db.path().join("graph.db");

    let output = cartograph(&[
        "index",
        "--root",
        root.path().to_str().unwrap(),
        "--db",
        db_path.to_str().unwrap(),
        "--json",
        "--quiet",
    ]);
    assert_eq!(output.status.code(), Some(0));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["files_discovered"], 2);
    assert_eq!(report["files_failed"][0]["path"], "bad.py");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR bad.py"));
    assert!(db_path.exists());
}

#[test]
fn test_status_after_index() {
    let root = project();
    let root_arg = root.path().to_str().unwrap();
    assert_eq!(cartograph(&["index", "--root", root_arg, "--quiet"]).status.code(), Some(0));

    let output = cartograph(&["status", "--root", root_arg, "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["last_run"]["outcome"], "partial");
    assert_eq!(status["graph"]["file_count"], 1);
    assert_eq!(status["summaries"][0]["kind"], "Parameter");
}

#[test]
fn test_status_reads_store_settings_from_config() {
    let root = project();
    let work = TempDir::new().unwrap();
    let db_path = work.path().join("custom.db");
    let root_arg = root.path().to_str().unwrap();
    let db_arg = db_path.to_str().unwrap();
    assert_eq!(
        cartograph(&["index", "--root", root_arg, "--db", db_arg, "--quiet"]).status.code(),
        Some(0)
    );

    let config_path = work.path().join("cartograph.json");
    let config = serde_json::json!({
        "root": root_arg,
        "db_path": db_arg,
        "store_timeout_ms": 100,
        "embedding_dimensions": 3,
    });
    fs::write(&config_path, config.to_string()).unwrap();

    let output = cartograph(&["status", "--config", config_path.to_str().unwrap(), "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["database"], db_arg);
    assert_eq!(status["graph"]["file_count"], 1);
}

#[test]
fn test_missing_root_exits_one() {
    let output = cartograph(&["index", "--root", "/nonexistent/cartograph-root"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}

#[test]
fn test_status_without_index_exits_one() {
    let root = TempDir::new().unwrap();
    let output = cartograph(&["status", "--root", root.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_usage_errors_exit_two() {
    assert_eq!(cartograph(&[]).status.code(), Some(2));
    assert_eq!(cartograph(&["frobnicate"]).status.code(), Some(2));
    assert_eq!(cartograph(&["index", "--jobs", "x", "--root", "."]).status.code(), Some(2));
    assert_eq!(cartograph(&["--help"]).status.code(), Some(0));
}

#[test]
fn test_extract_then_ingest() {
    let root = project();
    let output = cartograph(&["extract", "--root", root.path().to_str().unwrap(), "a.py"]);
    assert_eq!(output.status.code(), Some(0));

    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["language"], "python");
    assert_eq!(doc["processed_files"], serde_json::json!(["a.py"]));

    let work = TempDir::new().unwrap();
    let input = work.path().join("doc.json");
    fs::write(&input, &output.stdout).unwrap();
    let db_path = work.path().join("graph.db");

    let output = cartograph(&[
        "ingest",
        "--db",
        db_path.to_str().unwrap(),
        "--input",
        input.to_str().unwrap(),
        "--batch-size",
        "2",
    ]);
    assert_eq!(output.status.code(), Some(0));
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["outcome"]["chunks_failed"], 0);
    assert_eq!(result["outcome"]["totals"]["relationships_rejected"], 0);
}
