//! Binary-level checks that never reach the network

use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("XD_segments.txt"), "1236893704\n1236893705\n").unwrap();
    dir
}

fn downloader(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("segment-data-downloader").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("RITIS_EMAIL")
        .env_remove("RITIS_PASSWORD")
        .env("RUST_LOG", "segment_data_downloader=info");
    cmd
}

fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).into_owned()
}

#[test]
fn test_help_lists_run_modes() {
    let dir = workspace();
    let assert = downloader(&dir).arg("--help").assert().success();
    let out = stdout_of(&assert);
    for mode in ["single", "daily", "continuous", "validate"] {
        assert!(out.contains(mode), "help is missing {mode}: {out}");
    }
}

#[test]
fn test_invalid_bin_size_fails_before_network() {
    let dir = workspace();
    downloader(&dir)
        .args(["daily", "--bin-size", "7", "--portal-url", "http://127.0.0.1:9"])
        .assert()
        .failure()
        .code(1);
    assert!(!dir.path().join("last_run.txt").exists());
    assert!(!dir.path().join("Data").exists());
}

#[test]
fn test_invalid_confidence_fails() {
    let dir = workspace();
    downloader(&dir)
        .args(["daily", "--confidence", "30,15"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_interval_below_bin_size_fails() {
    let dir = workspace();
    downloader(&dir)
        .args(["continuous", "--bin-size", "15", "--interval-minutes", "5"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_missing_segment_file_fails() {
    let dir = TempDir::new().unwrap();
    downloader(&dir).arg("daily").assert().failure().code(1);
}

#[test]
fn test_missing_credentials_fail() {
    let dir = workspace();
    let assert = downloader(&dir).arg("daily").assert().failure().code(1);
    assert!(stdout_of(&assert).contains("RITIS_EMAIL"));
}

#[test]
fn test_validate_reports_pending_dates() {
    let dir = workspace();
    fs::write(dir.path().join("last_run.txt"), "2024-01-01\n").unwrap();

    let assert = downloader(&dir).arg("validate").assert().success();
    let out = stdout_of(&assert);
    assert!(out.contains("Configuration OK"));
    assert!(out.contains("2 segments"));
    assert!(out.contains("pending"));
}

#[test]
fn test_validate_rejects_corrupt_checkpoint() {
    let dir = workspace();
    fs::write(dir.path().join("last_run.txt"), "last tuesday\n").unwrap();

    downloader(&dir).arg("validate").assert().failure().code(1);
}
