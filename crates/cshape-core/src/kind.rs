//! Marshaling kinds and source-level argument types.
//!
//! A [`MarshalKind`] names a native representation at the C boundary. A
//! [`SourceType`] is the static type of an argument as written at a call
//! site. The matcher decides whether a source type may flow into a marshaling
//! kind; narrowing is never implicit.

use std::fmt;
use std::str::FromStr;

use cshape_membrane::ResourceClass;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Numeric width in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NumWidth {
    W8,
    W16,
    W32,
    W64,
}

impl NumWidth {
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }

    #[must_use]
    pub const fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::W8),
            16 => Some(Self::W16),
            32 => Some(Self::W32),
            64 => Some(Self::W64),
            _ => None,
        }
    }
}

/// Native representation of one parameter, return value or variadic slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarshalKind {
    SignedInt(NumWidth),
    UnsignedInt(NumWidth),
    /// Only `W32` and `W64` are meaningful.
    Float(NumWidth),
    /// Null-terminated text.
    Text,
    /// Pointer plus explicit length. Never terminator-scanned.
    ByteView,
    /// Opaque tracked handle.
    Handle(ResourceClass),
    /// Native function pointer (comparators).
    FnPtr,
    Void,
}

impl MarshalKind {
    /// Whether a value already in `from` representation may be passed where
    /// `self` is expected without losing information.
    ///
    /// Integer widening must be representation-preserving: a signed target
    /// takes signed sources up to its width and unsigned sources strictly
    /// narrower than it; an unsigned target takes only unsigned sources.
    #[must_use]
    pub fn compatible(self, from: MarshalKind) -> bool {
        use MarshalKind::{Float, SignedInt, UnsignedInt};
        match (self, from) {
            (SignedInt(to), SignedInt(w)) => w <= to,
            (SignedInt(to), UnsignedInt(w)) => w < to,
            (UnsignedInt(to), UnsignedInt(w)) => w <= to,
            (Float(to), Float(w)) => w <= to,
            (Self::ByteView, Self::Handle(ResourceClass::HeapBlock)) => true,
            (to, from) => to == from,
        }
    }

    /// Whether an argument of static type `ty` may be passed for this kind.
    #[must_use]
    pub fn accepts(self, ty: &SourceType) -> bool {
        match (self, ty) {
            (Self::Handle(_), SourceType::Null) => true,
            (_, ty) => ty.marshal_kind().is_some_and(|from| self.compatible(from)),
        }
    }

    /// Size of the native representation in bytes, if it is a scalar.
    #[must_use]
    pub const fn scalar_bytes(self) -> Option<usize> {
        match self {
            Self::SignedInt(w) | Self::UnsignedInt(w) | Self::Float(w) => Some(w.bytes()),
            _ => None,
        }
    }
}

impl fmt::Display for MarshalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedInt(w) => write!(f, "i{}", w.bits()),
            Self::UnsignedInt(w) => write!(f, "u{}", w.bits()),
            Self::Float(w) => write!(f, "f{}", w.bits()),
            Self::Text => f.write_str("text"),
            Self::ByteView => f.write_str("byte-view"),
            Self::Handle(class) => write!(f, "handle<{class}>"),
            Self::FnPtr => f.write_str("fn-ptr"),
            Self::Void => f.write_str("void"),
        }
    }
}

impl Serialize for MarshalKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Static type of an argument at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceType {
    Int { signed: bool, width: NumWidth },
    Float(NumWidth),
    Text,
    /// Writable byte buffer (pointer + length).
    Bytes,
    Handle(ResourceClass),
    /// Managed comparator closure.
    Comparator,
    /// Null pointer literal.
    Null,
    /// Writable location holding the inner type.
    Ref(Box<SourceType>),
}

impl SourceType {
    #[must_use]
    pub const fn int(signed: bool, width: NumWidth) -> Self {
        Self::Int { signed, width }
    }

    /// `&mut` reference to `inner`.
    #[must_use]
    pub fn reference(inner: SourceType) -> Self {
        Self::Ref(Box::new(inner))
    }

    /// Whether the argument is a writable location rather than a value.
    #[must_use]
    pub fn is_location(&self) -> bool {
        matches!(self, Self::Ref(_) | Self::Bytes)
    }

    /// Whether the argument is an integer value.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int { .. })
    }

    /// Native representation of the value itself. `None` for null and for
    /// references, which marshal as their referent.
    #[must_use]
    pub fn marshal_kind(&self) -> Option<MarshalKind> {
        match self {
            Self::Int {
                signed: true,
                width,
            } => Some(MarshalKind::SignedInt(*width)),
            Self::Int {
                signed: false,
                width,
            } => Some(MarshalKind::UnsignedInt(*width)),
            Self::Float(w) => Some(MarshalKind::Float(*w)),
            Self::Text => Some(MarshalKind::Text),
            Self::Bytes => Some(MarshalKind::ByteView),
            Self::Handle(class) => Some(MarshalKind::Handle(*class)),
            Self::Comparator => Some(MarshalKind::FnPtr),
            Self::Null | Self::Ref(_) => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int {
                signed: true,
                width,
            } => write!(f, "i{}", width.bits()),
            Self::Int {
                signed: false,
                width,
            } => write!(f, "u{}", width.bits()),
            Self::Float(w) => write!(f, "f{}", w.bits()),
            Self::Text => f.write_str("text"),
            Self::Bytes => f.write_str("bytes"),
            Self::Handle(class) => f.write_str(class.as_str()),
            Self::Comparator => f.write_str("comparator"),
            Self::Null => f.write_str("null"),
            Self::Ref(inner) => write!(f, "&mut {inner}"),
        }
    }
}

/// Unrecognized source type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown source type `{0}`")]
pub struct ParseSourceTypeError(pub String);

impl FromStr for SourceType {
    type Err = ParseSourceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("&mut ") {
            return inner.parse().map(Self::reference);
        }
        let numeric = |signed: Option<bool>, digits: &str| {
            let width = digits.parse::<u32>().ok().and_then(NumWidth::from_bits)?;
            Some(match signed {
                Some(signed) => Self::Int { signed, width },
                None if matches!(width, NumWidth::W32 | NumWidth::W64) => Self::Float(width),
                None => return None,
            })
        };
        let parsed = match s {
            "text" => Some(Self::Text),
            "bytes" => Some(Self::Bytes),
            "comparator" => Some(Self::Comparator),
            "null" => Some(Self::Null),
            _ => {
                if let Some(class) = ResourceClass::from_name(s) {
                    Some(Self::Handle(class))
                } else if let Some(d) = s.strip_prefix('i') {
                    numeric(Some(true), d)
                } else if let Some(d) = s.strip_prefix('u') {
                    numeric(Some(false), d)
                } else if let Some(d) = s.strip_prefix('f') {
                    numeric(None, d)
                } else {
                    None
                }
            }
        };
        parsed.ok_or_else(|| ParseSourceTypeError(s.to_string()))
    }
}

impl Serialize for SourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
