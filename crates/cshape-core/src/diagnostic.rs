//! Verification-time errors and positioned diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::format::{Expectation, MalformedReason};
use crate::kind::{MarshalKind, SourceType};

/// Why a call site was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallSiteError {
    #[error("malformed format directive at byte {offset}: {reason}")]
    MalformedFormatDirective {
        offset: usize,
        reason: MalformedReason,
    },
    #[error("format argument {index}: expected {expected}, found {actual}")]
    FormatArgumentTypeMismatch {
        index: usize,
        expected: Expectation,
        actual: SourceType,
    },
    #[error("format argument {index}: expected writable location {expected}, found value of type {actual}")]
    ExpectedOutputReference {
        index: usize,
        expected: Expectation,
        actual: SourceType,
    },
    #[error("format string consumes {expected} argument(s) but {supplied} supplied")]
    FormatArgumentCountMismatch { expected: usize, supplied: usize },
    #[error("expected {expected} fixed argument(s), {supplied} supplied")]
    ArgumentCountMismatch { expected: usize, supplied: usize },
    #[error("argument {index}: expected {expected}, found {actual}")]
    ParameterTypeMismatch {
        index: usize,
        expected: MarshalKind,
        actual: SourceType,
    },
    #[error("format string must be a literal")]
    NonLiteralFormat,
    #[error("`{name}` is not a bound function")]
    UnknownFunction { name: String },
}

impl CallSiteError {
    /// Stable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedFormatDirective { .. } => "MalformedFormatDirective",
            Self::FormatArgumentTypeMismatch { .. } => "FormatArgumentTypeMismatch",
            Self::ExpectedOutputReference { .. } => "ExpectedOutputReference",
            Self::FormatArgumentCountMismatch { .. } => "FormatArgumentCountMismatch",
            Self::ArgumentCountMismatch { .. } => "ArgumentCountMismatch",
            Self::ParameterTypeMismatch { .. } => "ParameterTypeMismatch",
            Self::NonLiteralFormat => "NonLiteralFormat",
            Self::UnknownFunction { .. } => "UnknownFunction",
        }
    }
}

/// Location of a call site in source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePos {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A rejected call site: error kind, position and the function called.
///
/// The display form is what build tooling prints verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{position}: {function}: {error}")]
pub struct Diagnostic {
    pub error: CallSiteError,
    pub position: SourcePos,
    pub function: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(error: CallSiteError, position: SourcePos, function: impl Into<String>) -> Self {
        Self {
            error,
            position,
            function: function.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.error.kind()
    }

    /// Human-readable detail without the position prefix.
    #[must_use]
    pub fn detail(&self) -> String {
        self.error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::NumWidth;

    #[test]
    fn diagnostic_renders_position_function_and_detail() {
        let diag = Diagnostic::new(
            CallSiteError::FormatArgumentCountMismatch {
                expected: 2,
                supplied: 1,
            },
            SourcePos::new("src/main.ts", 12, 5),
            "printf",
        );
        assert_eq!(
            diag.to_string(),
            "src/main.ts:12:5: printf: format string consumes 2 argument(s) but 1 supplied"
        );
        assert_eq!(diag.kind(), "FormatArgumentCountMismatch");
    }

    #[test]
    fn mismatch_detail_names_expected_and_actual() {
        let err = CallSiteError::FormatArgumentTypeMismatch {
            index: 0,
            expected: Expectation::Text,
            actual: SourceType::int(true, NumWidth::W32),
        };
        assert_eq!(err.to_string(), "format argument 0: expected text, found i32");
    }
}
