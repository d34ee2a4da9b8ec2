//! Call-site verification engine.

use std::time::Instant;

use cshape_core::{MarshalPlan, SourcePos, verify_by_name};
use serde::Serialize;

use crate::fixtures::{CallSiteCase, FixtureSet, Verdict};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

/// Result of verifying one case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub name: String,
    pub function: String,
    pub position: SourcePos,
    pub outcome: Outcome,
    pub expected: Verdict,
    /// `None` when the case was skipped.
    pub actual: Option<Verdict>,
    /// Rendered diagnostic, for rejected call sites.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// Approved marshaling plan, for accepted call sites.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<MarshalPlan>,
}

impl CaseResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

/// Verifies every call site of a fixture set independently.
///
/// One failing site never affects another's verdict. With `fail_fast` the
/// runner stops at the first case whose verdict contradicts the fixture and
/// marks the rest as skipped.
#[derive(Debug, Clone)]
pub struct TestRunner {
    pub campaign: String,
    pub fail_fast: bool,
}

impl TestRunner {
    #[must_use]
    pub fn new(campaign: impl Into<String>) -> Self {
        Self {
            campaign: campaign.into(),
            fail_fast: false,
        }
    }

    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Run all cases without logging.
    #[must_use]
    pub fn run(&self, set: &FixtureSet) -> Vec<CaseResult> {
        let mut results = Vec::with_capacity(set.cases.len());
        let mut stopped = false;
        for case in &set.cases {
            let result = self.step(case, stopped);
            stopped |= self.fail_fast && result.outcome == Outcome::Fail;
            results.push(result);
        }
        results
    }

    /// Run all cases, writing one log record per case plus start/end events.
    pub fn run_logged(
        &self,
        set: &FixtureSet,
        emitter: &mut LogEmitter,
    ) -> std::io::Result<Vec<CaseResult>> {
        emitter.emit_entry(
            LogEntry::new("", LogLevel::Info, "verify_start").with_details(serde_json::json!({
                "campaign": self.campaign,
                "suite": set.suite,
                "cases": set.cases.len(),
                "fail_fast": self.fail_fast,
            })),
        )?;

        let mut results = Vec::with_capacity(set.cases.len());
        let mut stopped = false;
        for case in &set.cases {
            let started = Instant::now();
            let result = self.step(case, stopped);
            let elapsed = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
            emitter.emit_entry(case_entry(&result, elapsed))?;
            stopped |= self.fail_fast && result.outcome == Outcome::Fail;
            results.push(result);
        }

        let failed = results.iter().filter(|r| r.outcome == Outcome::Fail).count();
        let level = if failed == 0 {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        emitter.emit_entry(LogEntry::new("", level, "verify_end").with_details(
            serde_json::json!({
                "total": results.len(),
                "failed": failed,
                "skipped": results.iter().filter(|r| r.outcome == Outcome::Skip).count(),
            }),
        ))?;
        emitter.flush()?;
        Ok(results)
    }

    fn step(&self, case: &CallSiteCase, skip: bool) -> CaseResult {
        if skip {
            return CaseResult {
                name: case.name.clone(),
                function: case.function.clone(),
                position: case.position.clone(),
                outcome: Outcome::Skip,
                expected: case.expect.clone(),
                actual: None,
                diagnostic: None,
                plan: None,
            };
        }
        verify_case(case)
    }
}

/// Verify one case against its expected verdict.
#[must_use]
pub fn verify_case(case: &CallSiteCase) -> CaseResult {
    let (actual, diagnostic, plan) = match verify_by_name(
        &case.function,
        case.format.as_deref(),
        &case.args,
        &case.position,
    ) {
        Ok(plan) => (Verdict::Accept, None, Some(plan)),
        Err(diag) => (
            Verdict::Reject(diag.kind().to_string()),
            Some(diag.to_string()),
            None,
        ),
    };
    let outcome = if actual == case.expect {
        Outcome::Pass
    } else {
        Outcome::Fail
    };
    CaseResult {
        name: case.name.clone(),
        function: case.function.clone(),
        position: case.position.clone(),
        outcome,
        expected: case.expect.clone(),
        actual: Some(actual),
        diagnostic,
        plan,
    }
}

fn case_entry(result: &CaseResult, elapsed_us: u64) -> LogEntry {
    let level = match result.outcome {
        Outcome::Pass => LogLevel::Info,
        Outcome::Fail => LogLevel::Error,
        Outcome::Skip => LogLevel::Warn,
    };
    let mut entry = LogEntry::new("", level, "call_site")
        .with_symbol(&result.function)
        .with_call_site(&result.position)
        .with_outcome(result.outcome)
        .with_duration_us(elapsed_us)
        .with_details(serde_json::json!({
            "case": result.name,
            "expected": result.expected,
            "actual": result.actual,
        }));
    if let Some(Verdict::Reject(kind)) = &result.actual {
        entry = entry.with_diagnostic_kind(kind);
    }
    entry
}
