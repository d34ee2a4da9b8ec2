//! Call-site fixture loading.
//!
//! A fixture set lists call expressions the way a build pass would see them:
//! the callee, the literal format (if any), the static type of every
//! argument and the source position, plus the verdict the verifier must
//! reach.

use std::collections::HashSet;
use std::path::Path;

use cshape_core::{SourcePos, SourceType};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Fixture schema version this harness reads.
pub const FIXTURE_VERSION: &str = "v1";

/// Verdict for one call site: accepted, or rejected with a diagnostic kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject(String),
}

/// A single call site to verify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSiteCase {
    /// Case identifier, unique within the set.
    pub name: String,
    /// Bound function being called.
    pub function: String,
    /// Literal format string. Absent when the call passes a non-literal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Static types of every argument, format argument included.
    pub args: Vec<SourceType>,
    pub position: SourcePos,
    pub expect: Verdict,
}

/// A collection of call-site cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSet {
    /// Schema version.
    pub version: String,
    /// Suite name, used as the log run id.
    pub suite: String,
    pub cases: Vec<CallSiteCase>,
}

impl FixtureSet {
    /// Parse and check a fixture set from JSON text.
    pub fn from_json(json: &str) -> Result<Self, HarnessError> {
        let set: Self = serde_json::from_str(json)?;
        set.check()?;
        Ok(set)
    }

    /// Serialize fixture set to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load a fixture set from a file path, returning the raw bytes too so
    /// callers can fingerprint exactly what was verified.
    pub fn from_file(path: &Path) -> Result<(Self, Vec<u8>), HarnessError> {
        let raw = std::fs::read(path).map_err(|source| HarnessError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let set: Self = serde_json::from_slice(&raw)?;
        set.check()?;
        Ok((set, raw))
    }

    fn check(&self) -> Result<(), HarnessError> {
        if self.version != FIXTURE_VERSION {
            return Err(HarnessError::UnsupportedVersion {
                found: self.version.clone(),
                expected: FIXTURE_VERSION,
            });
        }
        let mut seen = HashSet::new();
        for case in &self.cases {
            if !seen.insert(case.name.as_str()) {
                return Err(HarnessError::DuplicateCase(case.name.clone()));
            }
        }
        Ok(())
    }
}
