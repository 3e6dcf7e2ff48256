//! Tests for the `pipeboard` binary that need no database.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pipeboard_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pipeboard");
    path
}

fn run_pipeboard(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pipeboard_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("API_TOKEN")
        .env_remove("DB_DSN")
        .env("RUST_LOG", "off")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pipeboard binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_variants_prints_both_lists() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("absent.toml");

    let (stdout, stderr, ok) = run_pipeboard(&missing, &["variants", "012.345.678-90"]);
    assert!(ok, "variants failed: {}", stderr);

    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["pf"], serde_json::json!(["01234567890", "1234567890"]));
    assert_eq!(json["pj"], serde_json::json!(["00001234567890", "1234567890"]));
}

#[test]
fn test_variants_of_digitless_input() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("absent.toml");

    let (stdout, _, ok) = run_pipeboard(&missing, &["variants", "n/a"]);
    assert!(ok);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json, serde_json::json!({ "pf": [], "pj": [] }));
}

#[test]
fn test_serve_requires_token() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("pipeboard.toml");
    fs::write(&config_path, "[server]\nbind = \"127.0.0.1:0\"\n").unwrap();

    let (_, stderr, ok) = run_pipeboard(&config_path, &["serve"]);
    assert!(!ok);
    assert!(stderr.contains("API_TOKEN"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("pipeboard.toml");
    fs::write(&config_path, "[db]\npool_min = 9\npool_max = 1\n").unwrap();

    let (_, stderr, ok) = run_pipeboard(&config_path, &["init"]);
    assert!(!ok);
    assert!(stderr.contains("pool_min"), "stderr: {}", stderr);
}

#[test]
fn test_resolve_rejects_unknown_hint() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("absent.toml");

    let (_, _, ok) = run_pipeboard(&missing, &["resolve", "123", "--hint", "XX"]);
    assert!(!ok);
}
