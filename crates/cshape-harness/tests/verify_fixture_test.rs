//! Integration test: the checked-in call-site fixture through the library
//! runner and the `harness` binary.
//!
//! Run: cargo test -p cshape-harness --test verify_fixture_test

use std::path::{Path, PathBuf};
use std::process::Command;

use cshape_harness::report::sha256_hex;
use cshape_harness::structured_log::{LogEmitter, Outcome, validate_log_file};
use cshape_harness::{FixtureSet, TestRunner, Verdict, VerificationReport};

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/callsites.v1.json")
}

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cshape-harness-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn every_fixture_case_reaches_its_expected_verdict() {
    let (set, raw) = FixtureSet::from_file(&fixture_path()).unwrap();
    let results = TestRunner::new("fixture").run(&set);
    for result in &results {
        assert!(
            result.passed(),
            "{}: expected {:?}, got {:?} ({:?})",
            result.name,
            result.expected,
            result.actual,
            result.diagnostic
        );
    }
    let report = VerificationReport::new(&set, &raw, results);
    assert!(report.is_clean());
    assert_eq!(report.total, set.cases.len());
    assert_eq!(report.fixture_sha256, sha256_hex(&raw));
}

#[test]
fn rejected_sites_carry_their_position() {
    let (set, _) = FixtureSet::from_file(&fixture_path()).unwrap();
    let results = TestRunner::new("fixture").run(&set);
    let bad = results
        .iter()
        .find(|r| r.name == "printf_float_for_int")
        .unwrap();
    assert!(
        bad.diagnostic
            .as_deref()
            .unwrap()
            .starts_with("demo/report.c:21:5: printf:")
    );
    assert!(bad.plan.is_none());

    let good = results.iter().find(|r| r.name == "qsort_heap_block_with_comparator").unwrap();
    let plan = good.plan.as_ref().unwrap();
    assert_eq!(plan.fixed.len(), 4);
    assert!(plan.variadic.is_empty());
}

#[test]
fn one_failure_does_not_hide_later_verdicts() {
    let (mut set, _) = FixtureSet::from_file(&fixture_path()).unwrap();
    // Flip the first expectation so the first case fails.
    set.cases[0].expect = Verdict::Reject("FormatArgumentTypeMismatch".to_string());

    let all = TestRunner::new("fixture").run(&set);
    assert_eq!(all[0].outcome, Outcome::Fail);
    assert!(all[1..].iter().all(|r| r.passed()));

    let fast = TestRunner::new("fixture").with_fail_fast(true).run(&set);
    assert_eq!(fast[0].outcome, Outcome::Fail);
    assert!(fast[1..].iter().all(|r| r.outcome == Outcome::Skip));
}

#[test]
fn logged_run_produces_a_valid_jsonl_file() {
    let dir = scratch_dir("log");
    let log_path = dir.join("verify.jsonl");
    let _ = std::fs::remove_file(&log_path);

    let (set, _) = FixtureSet::from_file(&fixture_path()).unwrap();
    let mut emitter = LogEmitter::to_file(&log_path, &set.suite).unwrap();
    TestRunner::new("fixture").run_logged(&set, &mut emitter).unwrap();
    drop(emitter);

    let (lines, errors) = validate_log_file(&log_path).unwrap();
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(lines, set.cases.len() + 2);

    let content = std::fs::read_to_string(&log_path).unwrap();
    let rejected = content
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
        .filter(|v| v["diagnostic_kind"] == "UnknownFunction")
        .count();
    assert_eq!(rejected, 1);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn cli_verify_writes_report_and_exits_zero() {
    let dir = scratch_dir("cli");
    let report_path = dir.join("report.json");
    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .arg("verify")
        .arg("--fixture")
        .arg(fixture_path())
        .arg("--report")
        .arg(&report_path)
        .output()
        .expect("harness verify should execute");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    let raw = std::fs::read(fixture_path()).unwrap();
    assert_eq!(report["fixture_sha256"], sha256_hex(&raw));
    assert_eq!(report["failed"], 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn cli_verify_fails_on_contradicted_expectation() {
    let dir = scratch_dir("cli-fail");
    let fixture = dir.join("broken.json");
    std::fs::write(
        &fixture,
        r#"{"version":"v1","suite":"broken","cases":[
            {"name":"wrong","function":"printf","format":"%s",
             "args":["text","i32"],"position":{"file":"b.c","line":1,"column":1},
             "expect":"accept"}
        ]}"#,
    )
    .unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .arg("verify")
        .arg("--fixture")
        .arg(&fixture)
        .arg("--fail-fast")
        .output()
        .expect("harness verify should execute");
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["failed"], 1);
    assert_eq!(
        report["results"][0]["actual"]["reject"],
        "FormatArgumentTypeMismatch"
    );
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn cli_dumps_catalog_and_directives() {
    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .arg("catalog")
        .output()
        .unwrap();
    assert!(output.status.success());
    let catalog: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = catalog
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    assert!(names.contains(&"printf"));
    assert!(names.contains(&"qsort"));

    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(["catalog", "--header", "math"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let math: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let math = math.as_array().unwrap();
    assert!(math.iter().all(|s| s["header"] == "math"));
    assert!(math.iter().any(|s| s["name"] == "fmod"));
    assert!(!math.iter().any(|s| s["name"] == "printf"));

    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(["catalog", "--header", "unistd"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(["directives", "--format", "%*d %s"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let directives: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(directives.as_array().unwrap().len(), 3);

    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(["directives", "--format", "%d %*d", "--scan"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let directives: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(directives.as_array().unwrap().len(), 1);

    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(["directives", "--format", "%q"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}
