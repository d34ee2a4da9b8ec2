//! Call-site verification harness for cshape.
//!
//! This crate provides:
//! - Fixture loading: call sites described as callee, literal format,
//!   argument types and source position, with the expected verdict.
//! - A runner that verifies every site independently (optionally stopping at
//!   the first unexpected verdict).
//! - Structured JSONL logs and a JSON report fingerprinted with the
//!   fixture's SHA-256.

#![forbid(unsafe_code)]

pub mod error;
pub mod fixtures;
pub mod report;
pub mod runner;
pub mod structured_log;

pub use error::HarnessError;
pub use fixtures::{CallSiteCase, FixtureSet, Verdict};
pub use report::VerificationReport;
pub use runner::{CaseResult, TestRunner};
