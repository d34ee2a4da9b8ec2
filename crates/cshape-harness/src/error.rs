//! Harness errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed reading '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed writing '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed fixture: {0}")]
    Fixture(#[from] serde_json::Error),
    #[error("unsupported fixture version '{found}' (expected '{expected}')")]
    UnsupportedVersion {
        found: String,
        expected: &'static str,
    },
    #[error("duplicate case name '{0}'")]
    DuplicateCase(String),
    #[error("log: {0}")]
    Log(#[source] std::io::Error),
}
