//! Format directive parser for the printf and scanf families.
//!
//! Parses a literal format string into the ordered sequence of directives
//! that determine how many variadic arguments a call consumes and what each
//! one must be. Parsing is lazy: [`FormatString::directives`] returns a fresh
//! iterator on every call, so the sequence can be restarted, and it stops
//! after the first malformed directive.
//!
//! Directive grammar (after `%`):
//!
//! ```text
//! print:  flags* width? ('.' precision)? length? conversion
//! scan:   '*'? digits? length? conversion
//! width/precision: digits | '*'
//! length: hh | h | l | ll | j | z | t | L
//! ```
//!
//! A `*` width or precision in the print family consumes its own integer
//! argument; it is emitted as a separate directive ahead of the conversion it
//! belongs to. In the scan family `*` after `%` suppresses assignment, so the
//! conversion consumes no argument and yields no directive.

use std::collections::VecDeque;
use std::fmt;
use std::iter::FusedIterator;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::diagnostic::CallSiteError;
use crate::kind::{NumWidth, SourceType};

// ---------------------------------------------------------------------------
// Directive types
// ---------------------------------------------------------------------------

/// Which side of the variadic tail a format string drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatFamily {
    /// Tail arguments are inputs (`printf`, `fprintf`, ...).
    Print,
    /// Tail arguments are output locations (`scanf`, `sscanf`, ...).
    Scan,
}

/// Flags parsed from a print directive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormatFlags {
    pub left_justify: bool, // '-'
    pub force_sign: bool,   // '+'
    pub space_sign: bool,   // ' '
    pub alt_form: bool,     // '#'
    pub zero_pad: bool,     // '0'
}

/// Width specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Width {
    None,
    Fixed(usize),
    FromArg, // '*'
}

/// Precision specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Precision {
    None,
    Fixed(usize),
    FromArg, // '.*'
}

/// Length modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LengthMod {
    None,
    Hh,   // 'hh'
    H,    // 'h'
    L,    // 'l'
    Ll,   // 'll'
    Z,    // 'z'
    T,    // 't'
    J,    // 'j'
    BigL, // 'L'
}

impl LengthMod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Hh => "hh",
            Self::H => "h",
            Self::L => "l",
            Self::Ll => "ll",
            Self::Z => "z",
            Self::T => "t",
            Self::J => "j",
            Self::BigL => "L",
        }
    }

    /// Width a scan output of this length writes exactly.
    #[must_use]
    pub const fn exact_width(self) -> NumWidth {
        match self {
            Self::Hh => NumWidth::W8,
            Self::H => NumWidth::W16,
            Self::None => NumWidth::W32,
            Self::L | Self::Ll | Self::Z | Self::T | Self::J | Self::BigL => NumWidth::W64,
        }
    }

    /// Width a print argument of this length is promoted to.
    #[must_use]
    pub const fn promoted_width(self) -> NumWidth {
        match self {
            Self::None | Self::Hh | Self::H => NumWidth::W32,
            Self::L | Self::Ll | Self::Z | Self::T | Self::J | Self::BigL => NumWidth::W64,
        }
    }
}

/// Conversion kind of a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectiveKind {
    SignedInt,
    UnsignedInt,
    Float,
    Text,
    Char,
    Pointer,
    /// `%n`: store the number of bytes processed so far.
    Count,
}

/// Which argument a directive consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectiveRole {
    /// The conversion's own value or output.
    Conversion,
    /// Implicit integer consumed by a `*` width.
    WidthArg,
    /// Implicit integer consumed by a `.*` precision.
    PrecisionArg,
}

/// One argument-consuming unit of a format string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    pub family: FormatFamily,
    pub kind: DirectiveKind,
    pub role: DirectiveRole,
    pub flags: FormatFlags,
    pub width: Width,
    pub precision: Precision,
    pub length: LengthMod,
    pub conversion: char,
    /// Requires a writable location rather than a value.
    pub output: bool,
    /// Byte offset of the introducing `%`.
    pub offset: usize,
    /// Byte length of the directive text, `%` included.
    pub len: usize,
}

impl Directive {
    #[must_use]
    pub fn is_conversion(&self) -> bool {
        self.role == DirectiveRole::Conversion
    }

    /// What the paired argument has to be.
    #[must_use]
    pub fn expectation(&self) -> Expectation {
        if self.role != DirectiveRole::Conversion {
            return Expectation::Integer {
                signed: true,
                max: NumWidth::W32,
            };
        }
        if self.output {
            return Expectation::Output(self.output_type());
        }
        match self.kind {
            DirectiveKind::SignedInt | DirectiveKind::Char => Expectation::Integer {
                signed: true,
                max: self.length.promoted_width(),
            },
            DirectiveKind::UnsignedInt => Expectation::Integer {
                signed: false,
                max: self.length.promoted_width(),
            },
            DirectiveKind::Float => Expectation::Floating,
            DirectiveKind::Text => Expectation::Text,
            DirectiveKind::Pointer => Expectation::Pointer,
            DirectiveKind::Count => Expectation::Output(self.output_type()),
        }
    }

    /// Exact type of the location an output directive writes.
    fn output_type(&self) -> SourceType {
        let width = self.length.exact_width();
        match self.kind {
            DirectiveKind::SignedInt | DirectiveKind::Count => {
                SourceType::reference(SourceType::int(true, width))
            }
            DirectiveKind::UnsignedInt => SourceType::reference(SourceType::int(false, width)),
            DirectiveKind::Float => SourceType::reference(SourceType::Float(
                if self.length == LengthMod::None {
                    NumWidth::W32
                } else {
                    NumWidth::W64
                },
            )),
            DirectiveKind::Text | DirectiveKind::Char => SourceType::Bytes,
            DirectiveKind::Pointer => SourceType::reference(SourceType::int(false, NumWidth::W64)),
        }
    }
}

/// Requirement a directive places on its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Integer value no wider than the promotion width `max`.
    Integer { signed: bool, max: NumWidth },
    /// Floating value, promoted to double.
    Floating,
    Text,
    /// Opaque pointer (tracked handle or byte buffer).
    Pointer,
    /// Writable location of exactly this type.
    Output(SourceType),
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer { max, .. } => write!(f, "integer (<= {}-bit)", max.bits()),
            Self::Floating => f.write_str("floating (<= 64-bit)"),
            Self::Text => f.write_str("text"),
            Self::Pointer => f.write_str("pointer"),
            Self::Output(ty) => write!(f, "{ty}"),
        }
    }
}

impl Serialize for Expectation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Why a directive could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("unknown conversion character `{0}`")]
    UnknownConversion(char),
    #[error("directive truncated at end of string")]
    Truncated,
    #[error("long double (`L`) has no marshaling kind")]
    LongDouble,
    #[error("wide-character text (`l` on a text conversion) has no marshaling kind")]
    WideText,
    #[error("length modifier `{length}` does not apply to `%{conversion}`")]
    IncompatibleLength {
        length: &'static str,
        conversion: char,
    },
    #[error("unterminated `%[` scanset")]
    UnterminatedScanset,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// A literal format string bound to its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatString<'a> {
    text: &'a str,
    family: FormatFamily,
}

impl<'a> FormatString<'a> {
    #[must_use]
    pub const fn new(text: &'a str, family: FormatFamily) -> Self {
        Self { text, family }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'a str {
        self.text
    }

    #[must_use]
    pub const fn family(&self) -> FormatFamily {
        self.family
    }

    /// Start a new pass over the directives.
    #[must_use]
    pub fn directives(&self) -> Directives<'a> {
        Directives {
            fmt: self.text.as_bytes(),
            family: self.family,
            pos: 0,
            pending: VecDeque::new(),
            failed: false,
        }
    }

    /// Number of variadic arguments the format consumes.
    pub fn required_args(&self) -> Result<usize, CallSiteError> {
        self.directives()
            .try_fold(0, |n, d| d.map(|_| n + 1))
    }

    /// Split the format into literal runs and conversions, in order.
    ///
    /// Literal runs keep `%%` escapes and suppressed scan conversions verbatim.
    pub fn pieces(&self) -> Result<Vec<Piece<'a>>, CallSiteError> {
        let mut pieces = Vec::new();
        let mut cursor = 0;
        let mut star_args = 0;
        for directive in self.directives() {
            let directive = directive?;
            if !directive.is_conversion() {
                star_args += 1;
                continue;
            }
            if directive.offset > cursor {
                pieces.push(Piece::Literal(&self.text[cursor..directive.offset]));
            }
            let end = directive.offset + directive.len;
            pieces.push(Piece::Conversion {
                spec: &self.text[directive.offset..end],
                star_args,
                directive,
            });
            star_args = 0;
            cursor = end;
        }
        if cursor < self.text.len() {
            pieces.push(Piece::Literal(&self.text[cursor..]));
        }
        Ok(pieces)
    }
}

/// Piece of a format string as executed at the native boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece<'a> {
    Literal(&'a str),
    Conversion {
        /// Directive text, `%` through the conversion character.
        spec: &'a str,
        /// Implicit width/precision arguments preceding the value.
        star_args: usize,
        directive: Directive,
    },
}

/// Parse every directive of `fmt` eagerly.
pub fn parse_format(fmt: &str, family: FormatFamily) -> Result<Vec<Directive>, CallSiteError> {
    FormatString::new(fmt, family).directives().collect()
}

/// Lazy directive iterator. Fused after the first error.
#[derive(Debug, Clone)]
pub struct Directives<'a> {
    fmt: &'a [u8],
    family: FormatFamily,
    pos: usize,
    pending: VecDeque<Directive>,
    failed: bool,
}

enum Step {
    /// `%%` or a suppressed scan conversion.
    Skip { end: usize },
    Conversion { end: usize, directive: Directive },
}

impl Iterator for Directives<'_> {
    type Item = Result<Directive, CallSiteError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(directive) = self.pending.pop_front() {
                return Some(Ok(directive));
            }
            if self.failed {
                return None;
            }
            let rest = self.fmt.get(self.pos..)?;
            let Some(rel) = rest.iter().position(|&b| b == b'%') else {
                self.pos = self.fmt.len();
                return None;
            };
            let start = self.pos + rel;
            match scan_directive(self.fmt, start, self.family) {
                Ok(Step::Skip { end }) => self.pos = end,
                Ok(Step::Conversion { end, directive }) => {
                    self.pos = end;
                    let implicit = |role| Directive {
                        kind: DirectiveKind::SignedInt,
                        role,
                        conversion: '*',
                        output: false,
                        ..directive.clone()
                    };
                    if directive.width == Width::FromArg {
                        self.pending.push_back(implicit(DirectiveRole::WidthArg));
                    }
                    if directive.precision == Precision::FromArg {
                        self.pending.push_back(implicit(DirectiveRole::PrecisionArg));
                    }
                    self.pending.push_back(directive);
                }
                Err(reason) => {
                    self.failed = true;
                    return Some(Err(CallSiteError::MalformedFormatDirective {
                        offset: start,
                        reason,
                    }));
                }
            }
        }
    }
}

impl FusedIterator for Directives<'_> {}

/// Parse the directive whose `%` sits at `start`.
fn scan_directive(fmt: &[u8], start: usize, family: FormatFamily) -> Result<Step, MalformedReason> {
    let len = fmt.len();
    let mut pos = start + 1;
    let at = |pos: usize| fmt.get(pos).copied().ok_or(MalformedReason::Truncated);

    if at(pos)? == b'%' {
        return Ok(Step::Skip { end: pos + 1 });
    }

    // --- flags / suppression ---
    let mut flags = FormatFlags::default();
    let mut suppressed = false;
    match family {
        FormatFamily::Print => {
            while pos < len {
                match fmt[pos] {
                    b'-' => flags.left_justify = true,
                    b'+' => flags.force_sign = true,
                    b' ' => flags.space_sign = true,
                    b'#' => flags.alt_form = true,
                    b'0' => flags.zero_pad = true,
                    _ => break,
                }
                pos += 1;
            }
            // '+' overrides ' '; '-' overrides '0'.
            if flags.force_sign {
                flags.space_sign = false;
            }
            if flags.left_justify {
                flags.zero_pad = false;
            }
        }
        FormatFamily::Scan => {
            if at(pos)? == b'*' {
                suppressed = true;
                pos += 1;
            }
        }
    }

    // --- width ---
    let width = if family == FormatFamily::Print && at(pos)? == b'*' {
        pos += 1;
        Width::FromArg
    } else {
        let (value, next) = parse_decimal(fmt, pos);
        pos = next;
        value.map_or(Width::None, Width::Fixed)
    };

    // --- precision ---
    let precision = if family == FormatFamily::Print && at(pos)? == b'.' {
        pos += 1;
        if at(pos)? == b'*' {
            pos += 1;
            Precision::FromArg
        } else {
            let (value, next) = parse_decimal(fmt, pos);
            pos = next;
            Precision::Fixed(value.unwrap_or(0))
        }
    } else {
        Precision::None
    };

    // --- length modifier ---
    let length = match at(pos)? {
        b'h' if fmt.get(pos + 1) == Some(&b'h') => LengthMod::Hh,
        b'h' => LengthMod::H,
        b'l' if fmt.get(pos + 1) == Some(&b'l') => LengthMod::Ll,
        b'l' => LengthMod::L,
        b'j' => LengthMod::J,
        b'z' => LengthMod::Z,
        b't' => LengthMod::T,
        b'L' => LengthMod::BigL,
        _ => LengthMod::None,
    };
    pos += length.as_str().len();

    // --- conversion ---
    let conversion = at(pos)?;
    let kind = match conversion {
        b'd' | b'i' => DirectiveKind::SignedInt,
        b'u' | b'x' | b'X' | b'o' => DirectiveKind::UnsignedInt,
        b'f' | b'F' | b'e' | b'E' | b'g' | b'G' | b'a' | b'A' => DirectiveKind::Float,
        b's' => DirectiveKind::Text,
        b'[' if family == FormatFamily::Scan => DirectiveKind::Text,
        b'c' => DirectiveKind::Char,
        b'p' => DirectiveKind::Pointer,
        b'n' => DirectiveKind::Count,
        _ => return Err(MalformedReason::UnknownConversion(char_at(fmt, pos))),
    };
    pos += 1;
    if conversion == b'[' {
        pos = scanset_end(fmt, pos)?;
    }
    check_length(kind, length, conversion as char)?;

    if suppressed {
        return Ok(Step::Skip { end: pos });
    }
    Ok(Step::Conversion {
        end: pos,
        directive: Directive {
            family,
            kind,
            role: DirectiveRole::Conversion,
            flags,
            width,
            precision,
            length,
            conversion: conversion as char,
            output: family == FormatFamily::Scan || kind == DirectiveKind::Count,
            offset: start,
            len: pos - start,
        },
    })
}

fn check_length(kind: DirectiveKind, length: LengthMod, conversion: char) -> Result<(), MalformedReason> {
    let incompatible = MalformedReason::IncompatibleLength {
        length: length.as_str(),
        conversion,
    };
    match (kind, length) {
        (_, LengthMod::None) => Ok(()),
        (DirectiveKind::Float, LengthMod::L) => Ok(()),
        (DirectiveKind::Float, LengthMod::BigL) => Err(MalformedReason::LongDouble),
        (DirectiveKind::Float, _) => Err(incompatible),
        (DirectiveKind::Text | DirectiveKind::Char, LengthMod::L) => Err(MalformedReason::WideText),
        (DirectiveKind::Text | DirectiveKind::Char | DirectiveKind::Pointer, _) => Err(incompatible),
        (_, LengthMod::BigL) => Err(incompatible),
        _ => Ok(()),
    }
}

/// Position just past the `]` closing a scanset whose body starts at `pos`.
fn scanset_end(fmt: &[u8], mut pos: usize) -> Result<usize, MalformedReason> {
    if fmt.get(pos) == Some(&b'^') {
        pos += 1;
    }
    // A leading ']' is a member, not the terminator.
    if fmt.get(pos) == Some(&b']') {
        pos += 1;
    }
    match fmt.get(pos..).and_then(|rest| rest.iter().position(|&b| b == b']')) {
        Some(rel) => Ok(pos + rel + 1),
        None => Err(MalformedReason::UnterminatedScanset),
    }
}

fn parse_decimal(fmt: &[u8], mut pos: usize) -> (Option<usize>, usize) {
    let start = pos;
    let mut value: usize = 0;
    while let Some(&b) = fmt.get(pos) {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add(usize::from(b - b'0'));
        pos += 1;
    }
    ((pos > start).then_some(value), pos)
}

fn char_at(fmt: &[u8], pos: usize) -> char {
    let tail = fmt.get(pos..).unwrap_or_default();
    let end = tail.len().min(4);
    (1..=end)
        .find_map(|n| std::str::from_utf8(&tail[..n]).ok())
        .and_then(|s| s.chars().next())
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}
