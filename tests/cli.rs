//! CLI smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn shipwright() -> Command {
    Command::cargo_bin("shipwright").unwrap()
}

#[test]
fn help_and_version_work() {
    shipwright().arg("--help").assert().success();
    shipwright().arg("--version").assert().success();
}

#[test]
fn init_writes_config_and_database() {
    let dir = TempDir::new().unwrap();
    shipwright()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized"));
    assert!(dir.path().join("shipwright.toml").exists());
    assert!(dir.path().join("shipwright.db").exists());
}

#[test]
fn project_add_and_list_roundtrip() {
    let dir = TempDir::new().unwrap();
    let requirements = dir.path().join("reqs.md");
    std::fs::write(&requirements, "Build a todo app").unwrap();

    shipwright()
        .current_dir(dir.path())
        .args(["project", "add", "todo"])
        .arg(&requirements)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    shipwright()
        .current_dir(dir.path())
        .args(["project", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("todo"));
}

#[test]
fn status_of_unknown_project_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    shipwright()
        .current_dir(dir.path())
        .args(["status", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("42"));
}

#[test]
fn pause_and_resume_roundtrip() {
    let dir = TempDir::new().unwrap();
    let requirements = dir.path().join("reqs.md");
    std::fs::write(&requirements, "Build a todo app").unwrap();
    shipwright()
        .current_dir(dir.path())
        .args(["project", "add", "todo"])
        .arg(&requirements)
        .assert()
        .success();

    shipwright()
        .current_dir(dir.path())
        .args(["pause", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Paused"));

    shipwright()
        .current_dir(dir.path())
        .args(["resume", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resumed"));
}

#[test]
fn history_of_fresh_project_is_empty() {
    let dir = TempDir::new().unwrap();
    let requirements = dir.path().join("reqs.md");
    std::fs::write(&requirements, "Build a todo app").unwrap();
    shipwright()
        .current_dir(dir.path())
        .args(["project", "add", "todo"])
        .arg(&requirements)
        .assert()
        .success();

    shipwright()
        .current_dir(dir.path())
        .args(["history", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No execution records"));
}
