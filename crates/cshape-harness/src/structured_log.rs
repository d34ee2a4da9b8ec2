//! Structured JSONL logging for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required and optional fields.
//! - [`LogEmitter`]: writes records to a file or an in-memory buffer and
//!   assigns `<run_id>::<seq>` trace ids.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks for logs
//!   produced by earlier runs.

use std::fmt;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Outcome of verifying one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The verdict matched the fixture's expectation.
    Pass,
    /// The verdict contradicted the fixture's expectation.
    Fail,
    /// Not run because an earlier case failed under `--fail-fast`.
    Skip,
}

const OUTCOMES: [&str; 3] = ["pass", "fail", "skip"];

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    /// Bound function the call site names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// `file:line:column` of the call site.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create an entry with only the required fields.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            symbol: None,
            call_site: None,
            diagnostic_kind: None,
            outcome: None,
            duration_us: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_call_site(mut self, call_site: impl fmt::Display) -> Self {
        self.call_site = Some(call_site.to_string());
        self
    }

    #[must_use]
    pub fn with_diagnostic_kind(mut self, kind: impl Into<String>) -> Self {
        self.diagnostic_kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_duration_us(mut self, micros: u64) -> Self {
        self.duration_us = Some(micros);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Writes JSONL records and numbers them within one run.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Emitter appending to the file at `path` (created if missing).
    pub fn to_file(path: &Path, run_id: impl Into<String>) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(std::io::BufWriter::new(file)),
            seq: 0,
            run_id: run_id.into(),
        })
    }

    /// Emitter that discards its output; trace ids are still assigned.
    #[must_use]
    pub fn to_buffer(run_id: impl Into<String>) -> Self {
        Self {
            writer: Box::new(Vec::new()),
            seq: 0,
            run_id: run_id.into(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Next trace id: `<run_id>::<seq>`, sequence starting at 001.
    pub fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:03}", self.run_id, self.seq)
    }

    /// Emit a bare event and return the entry written.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let entry = LogEntry::new(self.next_trace_id(), level, event);
        self.write_line(&entry)?;
        Ok(entry)
    }

    /// Emit a prepared entry. The trace id is replaced by the emitter's own.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<LogEntry> {
        entry.trace_id = self.next_trace_id();
        self.write_line(&entry)?;
        Ok(entry)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    fn write_line(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }
}

impl fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogEmitter")
            .field("run_id", &self.run_id)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One schema violation in a JSONL log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line.
///
/// Returns the parsed entry, or every violation found on the line.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let error = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Err(vec![error("<json>", format!("invalid JSON: {e}"))]),
    };
    let Some(obj) = value.as_object() else {
        return Err(vec![error("<root>", "expected JSON object".to_string())]);
    };

    let mut errors = Vec::new();
    for field in ["timestamp", "trace_id", "level", "event"] {
        match obj.get(field) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => {}
            Some(serde_json::Value::String(_)) => {
                errors.push(error(field, "required field is empty".to_string()));
            }
            Some(_) => errors.push(error(field, "required field must be a string".to_string())),
            None => errors.push(error(field, "required field missing".to_string())),
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !LEVELS.contains(&level)
    {
        errors.push(error("level", format!("invalid level: '{level}'")));
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !OUTCOMES.contains(&outcome)
    {
        errors.push(error("outcome", format!("invalid outcome: '{outcome}'")));
    }

    // Failing verdicts must name the function.
    if obj.get("outcome").and_then(|v| v.as_str()) == Some("fail")
        && obj.get("symbol").is_none()
    {
        errors.push(error(
            "symbol",
            "fail outcomes must name the symbol".to_string(),
        ));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.contains("::")
    {
        errors.push(error(
            "trace_id",
            format!("trace_id should follow <run_id>::<seq> format, got: '{trace_id}'"),
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value)
        .map_err(|e| vec![error("<deserialization>", format!("failed to deserialize: {e}"))])
}

/// Validate an entire JSONL file.
///
/// Returns the non-empty line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> std::io::Result<(usize, Vec<LogValidationError>)> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

/// RFC 3339 timestamp for `secs` since the Unix epoch.
fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

/// Proleptic Gregorian date for a day count relative to 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
