//! Machine-readable verification reports.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::fixtures::FixtureSet;
use crate::runner::CaseResult;
use crate::structured_log::Outcome;

/// Summary of one harness run over a fixture set.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub suite: String,
    /// SHA-256 of the fixture bytes, lowercase hex.
    pub fixture_sha256: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<CaseResult>,
}

impl VerificationReport {
    #[must_use]
    pub fn new(set: &FixtureSet, fixture_bytes: &[u8], results: Vec<CaseResult>) -> Self {
        let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();
        Self {
            suite: set.suite.clone(),
            fixture_sha256: sha256_hex(fixture_bytes),
            total: results.len(),
            passed: count(Outcome::Pass),
            failed: count(Outcome::Fail),
            skipped: count(Outcome::Skip),
            results,
        }
    }

    /// Every case ran and matched its expected verdict.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    use std::fmt::Write;
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TestRunner;

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn counts_follow_outcomes() {
        let raw = br#"{"version":"v1","suite":"r","cases":[
            {"name":"a","function":"strlen","args":["text"],
             "position":{"file":"r.c","line":1,"column":1},"expect":"accept"},
            {"name":"b","function":"strlen","args":[],
             "position":{"file":"r.c","line":2,"column":1},"expect":"accept"}
        ]}"#;
        let set = FixtureSet::from_json(std::str::from_utf8(raw).unwrap()).unwrap();
        let report = VerificationReport::new(&set, raw, TestRunner::new("r").run(&set));
        assert_eq!((report.total, report.passed, report.failed, report.skipped), (2, 1, 1, 0));
        assert!(!report.is_clean());
        assert_eq!(report.fixture_sha256, sha256_hex(raw));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["results"][1]["actual"]["reject"], "ArgumentCountMismatch");
    }
}
