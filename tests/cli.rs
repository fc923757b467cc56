use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn library(shared_command: &str) -> String {
    format!(
        r#"
[[testcases]]
id = "shared"
name = "shared case"
configurations = [{{ arch = "x86_64" }}]

[testcases.execution]
type = "command"
data = {{ command = '{shared_command}' }}

[[testcases]]
id = "a"
name = "case a"
configurations = [{{ arch = "x86_64" }}]

[testcases.execution]
type = "command"
data = {{ command = 'test "{{{{ event.compose }}}}" = C-1' }}

[[testcases]]
id = "b"
name = "case b"

[[testplans]]
id = "tp1"
name = "plan 1"
testcases = ["shared", "a"]

[[testplans.reporting]]
type = "junit"

[[testplans]]
id = "tp2"
name = "plan 2"
artifact_type = "compose"
testcases = ["shared", "b"]
"#
    )
}

fn write_library(dir: &Path, shared_command: &str) -> PathBuf {
    let path = dir.join("library.toml");
    std::fs::write(&path, library(shared_command)).unwrap();
    path
}

fn testpipeline() -> Command {
    let mut cmd = Command::cargo_bin("testpipeline").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

const EVENT: &str = r#"{"type": "compose.finished", "compose": "C-1"}"#;

#[test]
fn test_validate_reports_counts() {
    let dir = tempfile::tempdir().unwrap();
    let library = write_library(dir.path(), "exit 0");

    testpipeline()
        .arg("--library")
        .arg(&library)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Library is valid!"))
        .stdout(predicate::str::contains("Test cases: 3"))
        .stdout(predicate::str::contains("Test plans: 2"));
}

#[test]
fn test_validate_missing_library() {
    let dir = tempfile::tempdir().unwrap();

    testpipeline()
        .arg("--library")
        .arg(dir.path().join("missing.toml"))
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Library error"));
}

#[test]
fn test_plan_lists_deduplicated_units() {
    let dir = tempfile::tempdir().unwrap();
    let library = write_library(dir.path(), "exit 0");

    testpipeline()
        .arg("--library")
        .arg(&library)
        .args(["plan", EVENT])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 case-run-configuration(s)"))
        .stdout(predicate::str::contains(
            "shared {arch: x86_64} [command] for tp1, tp2",
        ))
        .stdout(predicate::str::contains("b {} [manual] for tp2"));
}

#[test]
fn test_plan_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let library = write_library(dir.path(), "exit 0");

    let output = testpipeline()
        .arg("--library")
        .arg(&library)
        .args(["plan", "--format", "json", EVENT])
        .output()
        .unwrap();
    assert!(output.status.success());

    let units: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let units = units.as_array().unwrap();
    assert_eq!(units.len(), 3);
    assert!(units.iter().all(|unit| unit["result"]["state"] == "not started"));

    let shared = units
        .iter()
        .find(|unit| unit["testcase"] == "shared")
        .unwrap();
    assert_eq!(shared["configuration"]["arch"], "x86_64");
    assert_eq!(shared["running_for"]["tp1"], true);
    assert_eq!(shared["running_for"]["tp2"], true);
    assert_eq!(shared["workflow_type"], "command");
}

#[test]
fn test_plan_skips_unrelated_plans() {
    let dir = tempfile::tempdir().unwrap();
    let library = write_library(dir.path(), "exit 0");

    testpipeline()
        .arg("--library")
        .arg(&library)
        .args(["plan", r#"{"type": "koji.build"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 case-run-configuration(s)"))
        .stdout(predicate::str::contains("for tp2").not());
}

#[test]
fn test_run_passes_and_writes_junit() {
    let dir = tempfile::tempdir().unwrap();
    let library = write_library(dir.path(), "exit 0");
    let results = dir.path().join("results");
    let event = dir.path().join("event.json");
    std::fs::write(&event, EVENT).unwrap();

    testpipeline()
        .arg("--library")
        .arg(&library)
        .arg("--set")
        .arg(format!("junit.outputDir={}", results.display()))
        .arg("run")
        .arg(format!("@{}", event.display()))
        .assert()
        .success()
        .stdout(predicate::str::contains("Result: PASS"))
        .stdout(predicate::str::contains("tp1: complete (PASS), 2/2 finished"));

    let xml = std::fs::read_to_string(results.join("tp1.xml")).unwrap();
    assert!(xml.contains(r#"<testsuite name="plan 1""#));
    assert!(xml.contains(r#"failures="0""#));
}

#[test]
fn test_run_fails_on_failing_command() {
    let dir = tempfile::tempdir().unwrap();
    let library = write_library(dir.path(), "echo nope >&2; exit 1");

    testpipeline()
        .arg("--library")
        .arg(&library)
        .arg("--set")
        .arg(format!("junit.outputDir={}", dir.path().display()))
        .args(["run", EVENT])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Result: FAIL"));
}

#[test]
fn test_malformed_event() {
    let dir = tempfile::tempdir().unwrap();
    let library = write_library(dir.path(), "exit 0");

    testpipeline()
        .arg("--library")
        .arg(&library)
        .args(["run", r#"{"compose": "C-1"}"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid event"));
}
