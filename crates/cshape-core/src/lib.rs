//! # cshape-core
//!
//! Verification-time half of the cshape C bindings: the static signature
//! catalog, marshaling kinds, the printf/scanf format directive parser and the
//! call-site type matcher that turns a call expression into a marshaling plan
//! or a positioned diagnostic. No `unsafe` code is permitted at the crate
//! level.

#![deny(unsafe_code)]

pub mod catalog;
pub mod diagnostic;
pub mod format;
pub mod kind;
pub mod matcher;

pub use catalog::{AbiSignature, CATALOG, FormatRole, Header, ResourceEffect, lookup, signatures_in};
pub use diagnostic::{CallSiteError, Diagnostic, SourcePos};
pub use format::{
    Directive, DirectiveKind, DirectiveRole, Directives, Expectation, FormatFamily, FormatFlags,
    FormatString, LengthMod, MalformedReason, Piece, Precision, Width, parse_format,
};
pub use kind::{MarshalKind, NumWidth, SourceType};
pub use matcher::{
    CallSite, MarshalPlan, Passing, PlanEntry, match_directives, verify_by_name, verify_call,
};
