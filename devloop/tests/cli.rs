//! CLI tests for the offline `devloop` commands.
//!
//! Spawns the devloop binary and verifies output and exit codes.

use std::fs;
use std::process::Command;

use devloop::exit_codes;
use devloop::io::config::{DevloopConfig, load_config};

#[test]
fn reduce_log_prints_tail_from_last_step() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_path = temp.path().join("build.log");
    fs::write(
        &log_path,
        "#5 [2/3] RUN pip install -r requirements.txt\nRequirement already satisfied: pip\n#6 [3/3] RUN pytest\nE   AssertionError: boom\n",
    )
    .expect("write log");

    let output = Command::new(env!("CARGO_BIN_EXE_devloop"))
        .arg("reduce-log")
        .arg(&log_path)
        .output()
        .expect("devloop reduce-log");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert_eq!(stdout, "#6 [3/3] RUN pytest\nE   AssertionError: boom\n");
}

#[test]
fn reduce_log_honors_line_limit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_path = temp.path().join("build.log");
    fs::write(&log_path, "one\ntwo\nthree\n").expect("write log");

    let output = Command::new(env!("CARGO_BIN_EXE_devloop"))
        .args(["reduce-log", "--lines", "1"])
        .arg(&log_path)
        .output()
        .expect("devloop reduce-log");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8(output.stdout).expect("utf8"), "three\n");
}

#[test]
fn reduce_log_missing_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = Command::new(env!("CARGO_BIN_EXE_devloop"))
        .current_dir(temp.path())
        .args(["reduce-log", "nope.log"])
        .status()
        .expect("devloop reduce-log");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_config_writes_defaults_and_refuses_to_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join("devloop.toml");

    let status = Command::new(env!("CARGO_BIN_EXE_devloop"))
        .args(["init-config", "--path"])
        .arg(&config_path)
        .status()
        .expect("devloop init-config");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&config_path).expect("load"), DevloopConfig::default());

    let status = Command::new(env!("CARGO_BIN_EXE_devloop"))
        .args(["init-config", "--path"])
        .arg(&config_path)
        .status()
        .expect("devloop init-config");
    assert_eq!(status.code(), Some(exit_codes::INVALID));

    let status = Command::new(env!("CARGO_BIN_EXE_devloop"))
        .args(["init-config", "--force", "--path"])
        .arg(&config_path)
        .status()
        .expect("devloop init-config --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
}

#[test]
fn generate_reads_the_config_init_config_writes() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = Command::new(env!("CARGO_BIN_EXE_devloop"))
        .current_dir(temp.path())
        .arg("init-config")
        .status()
        .expect("devloop init-config");
    assert_eq!(status.code(), Some(exit_codes::OK));
    let written = temp.path().join("devloop.toml");
    assert_eq!(load_config(&written).expect("load"), DevloopConfig::default());

    fs::write(&written, "max_iterations = 0\n").expect("write config");
    let output = Command::new(env!("CARGO_BIN_EXE_devloop"))
        .current_dir(temp.path())
        .args(["generate", "--task", "echo", "--path", "run"])
        .output()
        .expect("devloop generate");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8(output.stderr).expect("utf8");
    assert!(stderr.contains("max_iterations"), "stderr: {stderr}");
    assert!(!temp.path().join("run").exists());
}
