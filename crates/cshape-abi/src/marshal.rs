//! Value marshaler.
//!
//! Converts one managed value into its native representation for a given
//! [`MarshalKind`] at the moment a native call is made, and numeric native
//! values back. Integers are sign- or zero-extended according to the source
//! type and never narrowed. Text gets exactly one terminating NUL and must not
//! contain one already. Byte views carry an explicit length. Handles pass
//! their native address through verbatim once the tracker confirms they are
//! live.

use std::ffi::{CString, c_void};
use std::ptr;

use cshape_core::{MarshalKind, NumWidth, SourceType};
use cshape_membrane::{Handle, OwnershipTracker, ResourceClass};

use crate::error::BindError;

// ---------------------------------------------------------------------------
// Managed values
// ---------------------------------------------------------------------------

/// Writable location handed to an output directive.
#[derive(Debug)]
pub enum OutRef<'a> {
    I8(&'a mut i8),
    I16(&'a mut i16),
    I32(&'a mut i32),
    I64(&'a mut i64),
    U8(&'a mut u8),
    U16(&'a mut u16),
    U32(&'a mut u32),
    U64(&'a mut u64),
    F32(&'a mut f32),
    F64(&'a mut f64),
}

impl OutRef<'_> {
    /// Static type of the referent.
    #[must_use]
    pub fn referent_type(&self) -> SourceType {
        match self {
            Self::I8(_) => SourceType::int(true, NumWidth::W8),
            Self::I16(_) => SourceType::int(true, NumWidth::W16),
            Self::I32(_) => SourceType::int(true, NumWidth::W32),
            Self::I64(_) => SourceType::int(true, NumWidth::W64),
            Self::U8(_) => SourceType::int(false, NumWidth::W8),
            Self::U16(_) => SourceType::int(false, NumWidth::W16),
            Self::U32(_) => SourceType::int(false, NumWidth::W32),
            Self::U64(_) => SourceType::int(false, NumWidth::W64),
            Self::F32(_) => SourceType::Float(NumWidth::W32),
            Self::F64(_) => SourceType::Float(NumWidth::W64),
        }
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        match self {
            Self::I8(r) => ptr::addr_of_mut!(**r).cast(),
            Self::I16(r) => ptr::addr_of_mut!(**r).cast(),
            Self::I32(r) => ptr::addr_of_mut!(**r).cast(),
            Self::I64(r) => ptr::addr_of_mut!(**r).cast(),
            Self::U8(r) => ptr::addr_of_mut!(**r).cast(),
            Self::U16(r) => ptr::addr_of_mut!(**r).cast(),
            Self::U32(r) => ptr::addr_of_mut!(**r).cast(),
            Self::U64(r) => ptr::addr_of_mut!(**r).cast(),
            Self::F32(r) => ptr::addr_of_mut!(**r).cast(),
            Self::F64(r) => ptr::addr_of_mut!(**r).cast(),
        }
    }

    /// Store an integer count, refusing values the referent cannot hold.
    pub fn store_count(&mut self, count: usize) -> Result<(), BindError> {
        let target = self
            .referent_type()
            .marshal_kind()
            .unwrap_or(MarshalKind::Void);
        let narrowing = move || BindError::NarrowingRejected {
            actual: SourceType::int(false, NumWidth::W64),
            target,
        };
        macro_rules! store {
            ($r:expr) => {
                match count.try_into() {
                    Ok(v) => {
                        **$r = v;
                        Ok(())
                    }
                    Err(_) => Err(narrowing()),
                }
            };
        }
        match self {
            Self::I8(r) => store!(r),
            Self::I16(r) => store!(r),
            Self::I32(r) => store!(r),
            Self::I64(r) => store!(r),
            Self::U8(r) => store!(r),
            Self::U16(r) => store!(r),
            Self::U32(r) => store!(r),
            Self::U64(r) => store!(r),
            Self::F32(_) | Self::F64(_) => Err(narrowing()),
        }
    }
}

/// A managed argument value.
#[derive(Debug)]
pub enum Value<'a> {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Text(&'a str),
    /// Read-only byte view.
    Bytes(&'a [u8]),
    /// Writable byte buffer.
    BytesMut(&'a mut [u8]),
    Handle(Handle),
    Null,
    Out(OutRef<'a>),
}

impl Value<'_> {
    /// Static type this value presents to the call-site matcher.
    #[must_use]
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::I8(_) => SourceType::int(true, NumWidth::W8),
            Self::I16(_) => SourceType::int(true, NumWidth::W16),
            Self::I32(_) => SourceType::int(true, NumWidth::W32),
            Self::I64(_) => SourceType::int(true, NumWidth::W64),
            Self::U8(_) => SourceType::int(false, NumWidth::W8),
            Self::U16(_) => SourceType::int(false, NumWidth::W16),
            Self::U32(_) => SourceType::int(false, NumWidth::W32),
            Self::U64(_) => SourceType::int(false, NumWidth::W64),
            Self::F32(_) => SourceType::Float(NumWidth::W32),
            Self::F64(_) => SourceType::Float(NumWidth::W64),
            Self::Text(_) => SourceType::Text,
            Self::Bytes(_) | Self::BytesMut(_) => SourceType::Bytes,
            Self::Handle(h) => SourceType::Handle(h.class),
            Self::Null => SourceType::Null,
            Self::Out(r) => SourceType::reference(r.referent_type()),
        }
    }

    /// Integer payload as `(sign-extended bits, width, signed)`.
    fn integer(&self) -> Option<(u64, NumWidth, bool)> {
        Some(match *self {
            Self::I8(v) => (i64::from(v) as u64, NumWidth::W8, true),
            Self::I16(v) => (i64::from(v) as u64, NumWidth::W16, true),
            Self::I32(v) => (i64::from(v) as u64, NumWidth::W32, true),
            Self::I64(v) => (v as u64, NumWidth::W64, true),
            Self::U8(v) => (u64::from(v), NumWidth::W8, false),
            Self::U16(v) => (u64::from(v), NumWidth::W16, false),
            Self::U32(v) => (u64::from(v), NumWidth::W32, false),
            Self::U64(v) => (v, NumWidth::W64, false),
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Native representations
// ---------------------------------------------------------------------------

/// A value in native form, ready to be passed across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeArg {
    /// Integer extended to 64 bits; `width` is the native parameter width.
    Int {
        bits: u64,
        width: NumWidth,
        signed: bool,
    },
    /// IEEE-754 bit pattern of the given width.
    Float { bits: u64, width: NumWidth },
    Ptr(usize),
    View { addr: usize, len: usize },
}

/// Per-call marshaling state. Owns the NUL-terminated copies of text
/// arguments until the native call returns.
pub struct CallFrame<'t> {
    tracker: &'t OwnershipTracker,
    texts: Vec<CString>,
}

impl<'t> CallFrame<'t> {
    #[must_use]
    pub fn new(tracker: &'t OwnershipTracker) -> Self {
        Self {
            tracker,
            texts: Vec::new(),
        }
    }

    /// Convert `value` into the native representation of `kind`.
    pub fn marshal(&mut self, value: &mut Value<'_>, kind: MarshalKind) -> Result<NativeArg, BindError> {
        let mismatch = |value: &Value<'_>| BindError::KindMismatch {
            expected: kind,
            actual: value.source_type(),
        };

        match kind {
            MarshalKind::SignedInt(width) | MarshalKind::UnsignedInt(width) => {
                let Some((bits, from, signed)) = value.integer() else {
                    return Err(mismatch(value));
                };
                let from_kind = if signed {
                    MarshalKind::SignedInt(from)
                } else {
                    MarshalKind::UnsignedInt(from)
                };
                if !kind.compatible(from_kind) {
                    return Err(BindError::NarrowingRejected {
                        actual: value.source_type(),
                        target: kind,
                    });
                }
                Ok(NativeArg::Int {
                    bits,
                    width,
                    signed: matches!(kind, MarshalKind::SignedInt(_)),
                })
            }
            MarshalKind::Float(width) => match (&*value, width) {
                (Value::F32(v), NumWidth::W32) => Ok(NativeArg::Float {
                    bits: u64::from(v.to_bits()),
                    width,
                }),
                (Value::F32(v), NumWidth::W64) => Ok(NativeArg::Float {
                    bits: f64::from(*v).to_bits(),
                    width,
                }),
                (Value::F64(v), NumWidth::W64) => Ok(NativeArg::Float {
                    bits: v.to_bits(),
                    width,
                }),
                (Value::F64(_), _) => Err(BindError::NarrowingRejected {
                    actual: value.source_type(),
                    target: kind,
                }),
                _ => Err(mismatch(value)),
            },
            MarshalKind::Text => match value {
                Value::Text(text) => {
                    let ptr = self.push_text(text)?;
                    Ok(NativeArg::Ptr(ptr))
                }
                _ => Err(mismatch(value)),
            },
            MarshalKind::ByteView => match value {
                Value::Bytes(bytes) => Ok(NativeArg::View {
                    addr: bytes.as_ptr() as usize,
                    len: bytes.len(),
                }),
                Value::BytesMut(bytes) => Ok(NativeArg::View {
                    addr: bytes.as_mut_ptr() as usize,
                    len: bytes.len(),
                }),
                Value::Handle(h) if h.class == ResourceClass::HeapBlock => {
                    let record = self.tracker.check_live(*h)?;
                    Ok(NativeArg::View {
                        addr: record.handle.addr,
                        len: record.len.unwrap_or(0),
                    })
                }
                _ => Err(mismatch(value)),
            },
            MarshalKind::Handle(class) => match value {
                Value::Handle(h) if h.class == class => {
                    let record = self.tracker.check_live(*h)?;
                    Ok(NativeArg::Ptr(record.handle.addr))
                }
                Value::Null => Ok(NativeArg::Ptr(0)),
                _ => Err(mismatch(value)),
            },
            MarshalKind::FnPtr | MarshalKind::Void => Err(mismatch(value)),
        }
    }

    /// Marshal a writable location for an output directive.
    pub fn marshal_out(&mut self, value: &mut Value<'_>, want: &SourceType) -> Result<NativeArg, BindError> {
        match value {
            Value::Out(r) if SourceType::reference(r.referent_type()) == *want => {
                Ok(NativeArg::Ptr(r.as_mut_ptr() as usize))
            }
            Value::BytesMut(bytes) if *want == SourceType::Bytes => Ok(NativeArg::View {
                addr: bytes.as_mut_ptr() as usize,
                len: bytes.len(),
            }),
            _ => Err(BindError::KindMismatch {
                expected: want.marshal_kind().unwrap_or(MarshalKind::ByteView),
                actual: value.source_type(),
            }),
        }
    }

    /// Keep a NUL-terminated copy of `text` alive for the call.
    pub fn push_text(&mut self, text: &str) -> Result<usize, BindError> {
        let owned = c_text(text)?;
        let ptr = owned.as_ptr() as usize;
        self.texts.push(owned);
        Ok(ptr)
    }

    #[must_use]
    pub fn tracker(&self) -> &'t OwnershipTracker {
        self.tracker
    }
}

/// NUL-terminated copy of `text`, refusing interior NULs.
pub fn c_text(text: &str) -> Result<CString, BindError> {
    CString::new(text).map_err(|e| BindError::EmbeddedNulInText {
        position: e.nul_position(),
    })
}

/// Convert a numeric native value back into a managed value of `kind`.
///
/// The reverse direction may narrow, but only when the value is exactly
/// representable; anything else is refused.
pub fn unmarshal(native: NativeArg, kind: MarshalKind) -> Result<Value<'static>, BindError> {
    let refuse = |actual: SourceType| BindError::NarrowingRejected {
        actual,
        target: kind,
    };
    match (native, kind) {
        (NativeArg::Int { bits, width, signed }, MarshalKind::SignedInt(to)) => {
            let actual = SourceType::int(signed, width);
            if !signed && width == NumWidth::W64 && bits > i64::MAX as u64 {
                return Err(refuse(actual));
            }
            let v = bits as i64;
            Ok(match to {
                NumWidth::W8 => Value::I8(i8::try_from(v).map_err(|_| refuse(actual))?),
                NumWidth::W16 => Value::I16(i16::try_from(v).map_err(|_| refuse(actual))?),
                NumWidth::W32 => Value::I32(i32::try_from(v).map_err(|_| refuse(actual))?),
                NumWidth::W64 => Value::I64(v),
            })
        }
        (NativeArg::Int { bits, width, signed }, MarshalKind::UnsignedInt(to)) => {
            let actual = SourceType::int(signed, width);
            if signed && (bits as i64) < 0 {
                return Err(refuse(actual));
            }
            Ok(match to {
                NumWidth::W8 => Value::U8(u8::try_from(bits).map_err(|_| refuse(actual))?),
                NumWidth::W16 => Value::U16(u16::try_from(bits).map_err(|_| refuse(actual))?),
                NumWidth::W32 => Value::U32(u32::try_from(bits).map_err(|_| refuse(actual))?),
                NumWidth::W64 => Value::U64(bits),
            })
        }
        (NativeArg::Float { bits, width }, MarshalKind::Float(to)) => {
            let actual = SourceType::Float(width);
            match (width, to) {
                (NumWidth::W32, NumWidth::W32) => Ok(Value::F32(f32::from_bits(bits as u32))),
                (NumWidth::W32, NumWidth::W64) => {
                    Ok(Value::F64(f64::from(f32::from_bits(bits as u32))))
                }
                (NumWidth::W64, NumWidth::W64) => Ok(Value::F64(f64::from_bits(bits))),
                (NumWidth::W64, NumWidth::W32) => {
                    let wide = f64::from_bits(bits);
                    let narrow = wide as f32;
                    if f64::from(narrow) == wide || wide.is_nan() {
                        Ok(Value::F32(narrow))
                    } else {
                        Err(refuse(actual))
                    }
                }
                _ => Err(refuse(actual)),
            }
        }
        (NativeArg::Int { width, signed, .. }, _) => Err(BindError::KindMismatch {
            expected: kind,
            actual: SourceType::int(signed, width),
        }),
        (NativeArg::Float { width, .. }, _) => Err(BindError::KindMismatch {
            expected: kind,
            actual: SourceType::Float(width),
        }),
        (NativeArg::Ptr(_) | NativeArg::View { .. }, _) => Err(BindError::KindMismatch {
            expected: kind,
            actual: SourceType::Bytes,
        }),
    }
}
