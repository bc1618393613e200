//! Integration tests for mtroute CLI functionality

#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_output() {
    let mut cmd = Command::cargo_bin("mtroute").expect("Failed to find mtroute binary");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Live route monitoring"))
        .stdout(predicate::str::contains("--max-hops"))
        .stdout(predicate::str::contains("--dns-server"))
        .stdout(predicate::str::contains("--no-rdns"))
        .stdout(predicate::str::contains("--duration"))
        .stdout(predicate::str::contains("--verbose"));
}

#[test]
fn test_version_output() {
    let mut cmd = Command::cargo_bin("mtroute").expect("Failed to find mtroute binary");
    cmd.arg("--version");

    let output = cmd.output().expect("Failed to execute command");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("mtroute "));
}

#[test]
fn test_missing_host() {
    let mut cmd = Command::cargo_bin("mtroute").expect("Failed to find mtroute binary");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("<HOST>"));
}

#[test]
fn test_unknown_dns_server_rejected() {
    let mut cmd = Command::cargo_bin("mtroute").expect("Failed to find mtroute binary");
    cmd.args(["--dns-server", "quad9", "example.com"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"))
        .stderr(predicate::str::contains("opendns"));
}

#[test]
fn test_invalid_interval_rejected() {
    let mut cmd = Command::cargo_bin("mtroute").expect("Failed to find mtroute binary");
    cmd.args(["--no-history", "-i", "5", "127.0.0.1"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::starts_with("Error: "))
        .stderr(predicate::str::contains("interval"));
}

#[test]
fn test_zero_max_hops_rejected() {
    let mut cmd = Command::cargo_bin("mtroute").expect("Failed to find mtroute binary");
    cmd.args(["--no-history", "-m", "0", "127.0.0.1"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Error: "));
}
