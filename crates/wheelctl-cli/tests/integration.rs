#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn wheelctl(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("wheelctl").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("WHEELCTL_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = dir.path().join("wheelctl.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

// ---------------------------------------------------------------------------
// wheelctl config
// ---------------------------------------------------------------------------

#[test]
fn config_show_prints_defaults_without_a_file() {
    let dir = TempDir::new().unwrap();
    wheelctl(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SetVelocity"))
        .stdout(predicate::str::contains("expected_source_node_id: 28"));
}

#[test]
fn config_show_json_is_parseable() {
    let dir = TempDir::new().unwrap();
    let output = wheelctl(&dir)
        .args(["config", "show", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["driver"]["commands"]["SetVelocity"]["port"], 117);
    assert_eq!(value["driver"]["monitors"][1]["tier"], "high");
}

#[test]
fn config_check_accepts_defaults() {
    let dir = TempDir::new().unwrap();
    wheelctl(&dir)
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_check_fails_on_errors() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "driver:\n  commands:\n    SetVelocity:\n      request_type: set_mode\n      server_node_id: 28\n      port: 117\n",
    );
    wheelctl(&dir)
        .args(["config", "check"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn config_flag_and_env_select_the_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.yaml");
    std::fs::write(&path, "driver:\n  telemetry:\n    expected_source_node_id: 42\n").unwrap();

    wheelctl(&dir)
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("expected_source_node_id: 42"));

    wheelctl(&dir)
        .env("WHEELCTL_CONFIG", &path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("expected_source_node_id: 42"));
}

#[test]
fn malformed_config_is_reported() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "driver: [not, a, map]\n");
    wheelctl(&dir)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

// ---------------------------------------------------------------------------
// wheelctl sweep
// ---------------------------------------------------------------------------

#[test]
fn single_shot_sweep_sends_one_command() {
    let dir = TempDir::new().unwrap();
    let output = wheelctl(&dir)
        .args(["sweep", "--left", "0.5", "--right", "-0.5", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["commands"], 1);
    assert_eq!(report["zero_commands"], 0);
    assert_eq!(report["final_velocity"]["left"], 0.5);
    assert_eq!(report["interrupted"], false);
}

#[test]
fn zero_cycle_sweep_only_zeroes() {
    let dir = TempDir::new().unwrap();
    let output = wheelctl(&dir)
        .args([
            "sweep",
            "--left",
            "1",
            "--right",
            "1",
            "--interval-ms",
            "10",
            "--cycles",
            "0",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["commands"], 1);
    assert_eq!(report["zero_commands"], 1);
    assert_eq!(report["final_velocity"]["left"], 0.0);
}

#[test]
fn zero_interval_is_rejected() {
    let dir = TempDir::new().unwrap();
    wheelctl(&dir)
        .args(["sweep", "--left", "1", "--right", "1", "--interval-ms", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("interval must be positive"));
}

#[test]
fn sweep_fails_when_velocity_command_is_disabled() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "driver:\n  commands:\n    SetVelocity:\n      request_type: set_target_value\n      server_node_id: 28\n      port: 117\n      enabled: false\n",
    );
    wheelctl(&dir)
        .args(["sweep", "--left", "1", "--right", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("velocity command failed"));
}

// ---------------------------------------------------------------------------
// wheelctl monitor
// ---------------------------------------------------------------------------

#[test]
fn monitor_prints_heartbeat_and_link_state() {
    let dir = TempDir::new().unwrap();
    wheelctl(&dir)
        .args(["monitor", "--seconds", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("heartbeat"))
        .stdout(predicate::str::contains("link up"));
}

#[test]
fn monitor_rejects_non_positive_duration() {
    let dir = TempDir::new().unwrap();
    wheelctl(&dir)
        .args(["monitor", "--seconds", "0"])
        .assert()
        .failure();
}

#[test]
fn logs_go_to_the_configured_file() {
    let dir = TempDir::new().unwrap();
    wheelctl(&dir).args(["sweep", "--left", "0.1", "--right", "0.1"]).assert().success();
    let log = std::fs::read_to_string(dir.path().join("wheelctl.log")).unwrap();
    assert!(log.contains("orchestrator started"));
}
