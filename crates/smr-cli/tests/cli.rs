//! Integration tests for the smrun CLI

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn smrun() -> Command {
    let mut cmd = Command::cargo_bin("smrun").unwrap();
    cmd.env("HOME", env!("CARGO_MANIFEST_DIR"));
    cmd
}

/// Compiles `name` from a fixture into a record file inside `dir`.
fn compile_to(dir: &TempDir, source: &str, name: &str) -> PathBuf {
    let output = dir.path().join(format!("{}.json", name));
    smrun()
        .arg("compile")
        .arg(fixture(source))
        .args(["--name", name, "--with-defaults", "--output"])
        .arg(&output)
        .assert()
        .success();
    output
}

#[test]
fn test_cli_help() {
    smrun()
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("serialized compiled functions"));
    smrun()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("JSON-RPC style envelope"))
        .stdout(predicate::str::contains("EXAMPLES:"));
}

#[test]
fn test_cli_version() {
    smrun()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_from_data_prints_raw_string() {
    let data = std::fs::read_to_string(fixture("hello.json")).unwrap();
    smrun()
        .args(["run", "--data", data.trim()])
        .assert()
        .success()
        .stdout("Hello World!\n");
}

#[test]
fn test_run_from_file_with_json_envelope() {
    let output = smrun()
        .args(["run", "--json", "--id", "9", "--file"])
        .arg(fixture("hello.json"))
        .output()
        .unwrap();
    assert!(output.status.success());
    let envelope: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(envelope, json!({ "jsonrpc": "2.0", "id": 9, "result": "Hello World!" }));
}

#[test]
fn test_compile_then_run_with_arguments() {
    let dir = TempDir::new().unwrap();
    let greet = compile_to(&dir, "greet.py", "greet");

    smrun()
        .args(["run", "--file"])
        .arg(&greet)
        .arg("dude")
        .assert()
        .success()
        .stdout("Hello dude!\n");

    smrun()
        .args(["run", "--file"])
        .arg(&greet)
        .args(["dude", "--kw", "punct=?"])
        .assert()
        .success()
        .stdout("Hello dude?\n");
}

#[test]
fn test_compile_prints_record() {
    let output = smrun()
        .arg("compile")
        .arg(fixture("greet.py"))
        .output()
        .unwrap();
    assert!(output.status.success());
    let record: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(record["qualified_name"], json!("greet"));
    assert_eq!(record["positional_param_count"], json!(2));
    assert_eq!(record["constants"][0], json!("Greets whoever is passed in."));
    assert!(record.get("default_values").is_none());
}

#[test]
fn test_compile_requires_name_for_several_functions() {
    smrun()
        .arg("compile")
        .arg(fixture("jobs.py"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--name"));
}

#[test]
fn test_compile_reports_unsupported_source() {
    smrun()
        .arg("compile")
        .arg(fixture("broken.py"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("generator functions"));
}

#[test]
fn test_json_values_and_runtime_faults() {
    let dir = TempDir::new().unwrap();
    let total = compile_to(&dir, "jobs.py", "total");
    smrun()
        .args(["run", "--file"])
        .arg(&total)
        .args(["[3, 4.5, 2]", "--kw", "discount=1"])
        .assert()
        .success()
        .stdout("8.5\n");

    let ratio = compile_to(&dir, "jobs.py", "ratio");
    smrun()
        .args(["run", "--file"])
        .arg(&ratio)
        .args(["1", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ZeroDivisionError"));

    let output = smrun()
        .args(["run", "--json", "--file"])
        .arg(&ratio)
        .args(["1", "0"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let envelope: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(envelope["error"]["code"], json!(-32000));
    assert_eq!(envelope["error"]["data"]["args"], json!([1, 0]));
    assert_eq!(
        envelope["error"]["data"]["faultInspection"]["__name__"],
        json!("ZeroDivisionError")
    );
}

#[test]
fn test_missing_file_is_function_not_found() {
    let output = smrun()
        .args(["run", "--json", "--file", "/nonexistent/fn.json"])
        .output()
        .unwrap();
    let envelope: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(envelope["error"]["code"], json!(-32601));
    assert_eq!(envelope["error"]["data"]["locator"], json!("/nonexistent/fn.json"));
}

#[test]
fn test_timeout_stops_waiting() {
    let dir = TempDir::new().unwrap();
    let spin = compile_to(&dir, "jobs.py", "spin");
    smrun()
        .args(["run", "--timeout", "1", "--file"])
        .arg(&spin)
        .assert()
        .failure()
        .stderr(predicate::str::contains("timed out"));
}

#[test]
fn test_config_supplies_globals() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("scale.py");
    std::fs::write(&source, "def scale(x):\n    return x * factor\n").unwrap();
    let record = dir.path().join("scale.json");
    smrun()
        .arg("compile")
        .arg(&source)
        .arg("--output")
        .arg(&record)
        .assert()
        .success();

    let config = dir.path().join("smrun.toml");
    std::fs::write(&config, "[runtime.globals]\nfactor = 4\n").unwrap();
    smrun()
        .arg("--config")
        .arg(&config)
        .args(["run", "--file"])
        .arg(&record)
        .arg("5")
        .assert()
        .success()
        .stdout("20\n");
}

#[test]
fn test_disasm_lists_instructions() {
    smrun()
        .args(["disasm", "--file"])
        .arg(fixture("hello.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("code hello"))
        .stdout(predicate::str::contains("LOAD_CONST"))
        .stdout(predicate::str::contains("RETURN_VALUE"));
}

#[test]
fn test_run_requires_exactly_one_input() {
    smrun().arg("run").assert().failure();
    smrun()
        .args(["run", "--data", "{}", "--file", "x.json"])
        .assert()
        .failure();
}
