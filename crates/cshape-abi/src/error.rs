//! Runtime marshaling and invocation errors.

use std::io;

use cshape_core::{Diagnostic, MarshalKind, SourceType};
use cshape_membrane::OwnershipError;
use thiserror::Error;

/// Why a bound call was refused or failed.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("text contains an interior NUL byte at position {position}")]
    EmbeddedNulInText { position: usize },
    #[error("{actual} value does not fit in {target} without narrowing")]
    NarrowingRejected {
        actual: SourceType,
        target: MarshalKind,
    },
    #[error("{actual} value cannot be marshaled as {expected}")]
    KindMismatch {
        expected: MarshalKind,
        actual: SourceType,
    },
    #[error("output needs {needed} byte(s) but the buffer holds {available}")]
    OutputBufferTooSmall { needed: usize, available: usize },
    #[error("invalid element layout: {reason}")]
    ElementLayout { reason: &'static str },
    #[error("{function} failed: {source}")]
    Native {
        function: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{function} does not {action} a tracked resource")]
    UntrackedEffect {
        function: &'static str,
        action: &'static str,
    },
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
    #[error(transparent)]
    CallSite(#[from] Diagnostic),
}

impl BindError {
    /// Capture `errno` after a failed native call.
    #[must_use]
    pub fn native(function: &'static str) -> Self {
        Self::Native {
            function,
            source: io::Error::last_os_error(),
        }
    }

    /// Stable name of the error kind, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmbeddedNulInText { .. } => "EmbeddedNulInText",
            Self::NarrowingRejected { .. } => "NarrowingRejected",
            Self::KindMismatch { .. } => "KindMismatch",
            Self::OutputBufferTooSmall { .. } => "OutputBufferTooSmall",
            Self::ElementLayout { .. } => "ElementLayout",
            Self::Native { .. } => "Native",
            Self::UntrackedEffect { .. } => "UntrackedEffect",
            Self::Ownership(e) => e.kind(),
            Self::CallSite(d) => d.kind(),
        }
    }
}
