//! Call-site type matcher.
//!
//! Pairs the static argument types of a call with the catalog signature and,
//! for format-directed calls, with the parsed directive sequence. Pairing is
//! strictly positional and arity must match exactly; the native runtime's
//! tolerance for surplus variadic arguments is not replicated.

use serde::Serialize;

use crate::catalog::{AbiSignature, lookup};
use crate::diagnostic::{CallSiteError, Diagnostic, SourcePos};
use crate::format::{Directive, Expectation, FormatString};
use crate::kind::{MarshalKind, NumWidth, SourceType};

/// A call expression as seen by the build pass.
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'a> {
    pub signature: &'static AbiSignature,
    /// Literal format string, when the format argument is one.
    pub format: Option<&'a str>,
    /// Static types of every argument, format argument included.
    pub args: &'a [SourceType],
    pub position: &'a SourcePos,
}

/// How a plan entry crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Passing {
    Value,
    /// Address of a writable location.
    Reference,
}

/// Marshaling decision for one supplied argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub kind: MarshalKind,
    pub passing: Passing,
    pub source: SourceType,
    /// The value is promoted to a wider native representation.
    pub widened: bool,
}

/// Approved marshaling for a whole call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarshalPlan {
    pub function: &'static str,
    pub fixed: Vec<PlanEntry>,
    pub variadic: Vec<PlanEntry>,
    pub ret: MarshalKind,
}

impl MarshalPlan {
    /// Every entry in argument order.
    pub fn entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.fixed.iter().chain(&self.variadic)
    }

    /// Plan kinds only, ignoring the concrete source types.
    #[must_use]
    pub fn shape(&self) -> Vec<(MarshalKind, Passing)> {
        self.entries().map(|e| (e.kind, e.passing)).collect()
    }
}

/// Verify one call site, producing a plan or a positioned diagnostic.
pub fn verify_call(site: &CallSite<'_>) -> Result<MarshalPlan, Diagnostic> {
    plan_call(site)
        .map_err(|error| Diagnostic::new(error, site.position.clone(), site.signature.name))
}

/// Resolve `function` in the catalog, then verify the call.
pub fn verify_by_name(
    function: &str,
    format: Option<&str>,
    args: &[SourceType],
    position: &SourcePos,
) -> Result<MarshalPlan, Diagnostic> {
    let Some(signature) = lookup(function) else {
        return Err(Diagnostic::new(
            CallSiteError::UnknownFunction {
                name: function.to_string(),
            },
            position.clone(),
            function,
        ));
    };
    verify_call(&CallSite {
        signature,
        format,
        args,
        position,
    })
}

fn plan_call(site: &CallSite<'_>) -> Result<MarshalPlan, CallSiteError> {
    let sig = site.signature;
    let fixed_arity = sig.fixed_arity();
    let supplied = site.args.len();
    if supplied < fixed_arity || (!sig.is_variadic() && supplied != fixed_arity) {
        return Err(CallSiteError::ArgumentCountMismatch {
            expected: fixed_arity,
            supplied,
        });
    }

    let (fixed_args, tail) = site.args.split_at(fixed_arity);
    let fixed = sig
        .params
        .iter()
        .zip(fixed_args)
        .enumerate()
        .map(|(index, (&kind, arg))| {
            if kind.accepts(arg) {
                Ok(value_entry(kind, arg))
            } else {
                Err(CallSiteError::ParameterTypeMismatch {
                    index,
                    expected: kind,
                    actual: arg.clone(),
                })
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let variadic = match sig.format {
        Some(role) => {
            let text = site.format.ok_or(CallSiteError::NonLiteralFormat)?;
            let directives = FormatString::new(text, role.family)
                .directives()
                .collect::<Result<Vec<_>, _>>()?;
            match_directives(&directives, tail)?
        }
        None => Vec::new(),
    };

    Ok(MarshalPlan {
        function: sig.name,
        fixed,
        variadic,
        ret: sig.ret,
    })
}

/// Pair each directive with the variadic argument at the same position.
///
/// Arity is checked before any pairing, so a count mismatch is reported even
/// when an earlier pair would also fail.
pub fn match_directives(
    directives: &[Directive],
    args: &[SourceType],
) -> Result<Vec<PlanEntry>, CallSiteError> {
    if directives.len() != args.len() {
        return Err(CallSiteError::FormatArgumentCountMismatch {
            expected: directives.len(),
            supplied: args.len(),
        });
    }
    directives
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (directive, arg))| pair(index, &directive.expectation(), arg))
        .collect()
}

fn pair(index: usize, expected: &Expectation, arg: &SourceType) -> Result<PlanEntry, CallSiteError> {
    let mismatch = || CallSiteError::FormatArgumentTypeMismatch {
        index,
        expected: expected.clone(),
        actual: arg.clone(),
    };
    match expected {
        Expectation::Output(want) => {
            if !arg.is_location() {
                return Err(CallSiteError::ExpectedOutputReference {
                    index,
                    expected: expected.clone(),
                    actual: arg.clone(),
                });
            }
            if arg != want {
                return Err(mismatch());
            }
            let kind = match arg {
                SourceType::Ref(inner) => inner.marshal_kind(),
                other => other.marshal_kind(),
            }
            .ok_or_else(mismatch)?;
            Ok(PlanEntry {
                kind,
                passing: Passing::Reference,
                source: arg.clone(),
                widened: false,
            })
        }
        Expectation::Integer { signed, max } => match arg {
            SourceType::Int { width, .. } if width <= max => {
                let kind = if *signed {
                    MarshalKind::SignedInt(*max)
                } else {
                    MarshalKind::UnsignedInt(*max)
                };
                Ok(PlanEntry {
                    kind,
                    passing: Passing::Value,
                    source: arg.clone(),
                    widened: width < max,
                })
            }
            _ => Err(mismatch()),
        },
        Expectation::Floating => match arg {
            SourceType::Float(width) => Ok(PlanEntry {
                kind: MarshalKind::Float(NumWidth::W64),
                passing: Passing::Value,
                source: arg.clone(),
                widened: *width < NumWidth::W64,
            }),
            _ => Err(mismatch()),
        },
        Expectation::Text => match arg {
            SourceType::Text => Ok(value_entry(MarshalKind::Text, arg)),
            _ => Err(mismatch()),
        },
        Expectation::Pointer => match arg {
            SourceType::Handle(_) | SourceType::Bytes => {
                let kind = arg.marshal_kind().ok_or_else(mismatch)?;
                Ok(value_entry(kind, arg))
            }
            _ => Err(mismatch()),
        },
    }
}

fn value_entry(kind: MarshalKind, arg: &SourceType) -> PlanEntry {
    let widened = match (kind.scalar_bytes(), arg.marshal_kind().and_then(MarshalKind::scalar_bytes)) {
        (Some(to), Some(from)) => from < to,
        _ => false,
    };
    PlanEntry {
        kind,
        passing: Passing::Value,
        source: arg.clone(),
        widened,
    }
}
