//! Command-line integration tests
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

use predicates::prelude::*;
use std::io::Write;

fn small_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
seed = 7
iterations = 20
report_every = 10

[probe]
target_count = 4
spoof_count = 8
amplification = 2
"#
    )
    .unwrap();
    file
}

#[test]
fn test_cli_help_lists_subcommands() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hashprobe");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("calibrate"))
        .stdout(predicate::str::contains("worker"));
}

#[test]
fn test_cli_requires_subcommand() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hashprobe");
    cmd.assert().failure();
}

#[test]
fn test_worker_requires_port_and_host() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hashprobe");
    cmd.arg("worker")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_calibrate_with_config_file() {
    let config = small_config();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hashprobe");
    cmd.arg("--config")
        .arg(config.path())
        .arg("calibrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("delta=").count(2))
        .stdout(predicate::str::contains("count=20"));
}

#[test]
fn test_calibrate_iterations_override_config() {
    let config = small_config();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hashprobe");
    cmd.arg("calibrate")
        .arg("--iterations")
        .arg("10")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("delta=").count(1));
}

#[test]
fn test_missing_config_file_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hashprobe");
    cmd.arg("--config")
        .arg("/nonexistent/hashprobe.toml")
        .arg("calibrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_invalid_config_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[probe]\namplification = 0").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hashprobe");
    cmd.arg("--config")
        .arg(file.path())
        .arg("calibrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("probe.amplification must be >= 1"));
}

#[test]
fn test_zero_repeat_override_is_rejected() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hashprobe");
    cmd.arg("local")
        .arg("--repeat")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("repeat must be >= 1"));
}

#[test]
fn test_worker_reports_unreachable_victim() {
    // Port 1 on loopback is not listening
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hashprobe");
    cmd.arg("worker")
        .arg("1")
        .arg("127.0.0.1")
        .write_stdin("[]\n")
        .assert()
        .failure();
}
