//! CLI Argument Parsing Compatibility Tests
//!
//! These tests verify that command-line arguments are parsed correctly and that the
//! underscore spellings used by earlier releases of the client keep working.
//!
//! Tests in this file should NOT be modified to match new behavior unless it's
//! intentional and documented in the changelog.

use assert_cmd::Command;
use predicates::prelude::*;

fn mdrepo() -> Command {
    let mut cmd = Command::cargo_bin("mdrepo").unwrap();
    cmd.env_remove("MDREPO_STORE_ROOT").env_remove("RUST_LOG");
    cmd
}

/// Test that --help output is generated without errors
#[test]
fn test_help_runs() {
    mdrepo()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submitls"))
        .stdout(predicate::str::contains("describe-ticket"));
}

/// Test --version flag works
#[test]
fn test_version_runs() {
    mdrepo().arg("--version").assert().success();
}

#[test]
fn test_version_subcommand_prints_json() {
    let output = mdrepo().arg("version").output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_subcommand_help_runs() {
    for sub in ["get", "submit", "submitls", "describe-ticket", "version"] {
        mdrepo().args([sub, "--help"]).assert().success();
    }
}

// ============================================================================
// Transfer Options
// ============================================================================

#[test]
fn test_mode_values_accepted() {
    for mode in ["icat", "redirect", "webdav"] {
        mdrepo().args(["get", "--mode", mode, "--help"]).assert().success();
    }
}

#[test]
fn test_unknown_mode_rejected() {
    mdrepo()
        .args(["get", "--mode", "ftp", "--help"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_underscore_aliases_accepted() {
    mdrepo()
        .args([
            "get",
            "--thread_num",
            "4",
            "--thread_num_per_file",
            "2",
            "--tcp_buffer_size",
            "4MiB",
            "--ticket_string",
            "tkt:/iplant/home/shared/mdrepo/prod/release/sim",
            "--show_path",
            "--single_threaded",
            "--help",
        ])
        .assert()
        .success();
}

#[test]
fn test_retry_interval_formats() {
    for interval in ["5s", "1min", "250ms"] {
        mdrepo()
            .args(["get", "--retry", "2", "--retry-interval", interval, "--help"])
            .assert()
            .success();
    }
    mdrepo()
        .args(["get", "--retry-interval", "soon", "--help"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid interval"));
}

#[test]
fn test_size_formats() {
    for size in ["1MiB", "512KiB", "1048576"] {
        mdrepo()
            .args(["get", "--tcp-buffer-size", size, "--help"])
            .assert()
            .success();
    }
    mdrepo()
        .args(["submit", "--max-simulation-size", "2GB", "--help"])
        .assert()
        .success();
}

#[test]
fn test_global_output_flags_after_subcommand() {
    mdrepo()
        .args(["get", "-vv", "--summary", "--max-workers", "2", "--help"])
        .assert()
        .success();
}

// ============================================================================
// Required Arguments
// ============================================================================

#[test]
fn test_submit_requires_sources() {
    mdrepo()
        .args(["submit", "--token", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("<SOURCES>"));
}

#[test]
fn test_expected_simulations_must_be_a_number() {
    mdrepo()
        .args(["submit", "-n", "three", "sims"])
        .assert()
        .failure();
}

#[test]
fn test_missing_subcommand_fails() {
    mdrepo().assert().failure();
}
