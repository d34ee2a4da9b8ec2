//! Format-directed calls: the `printf` and `scanf` families.
//!
//! There is no dynamic-call facility behind these functions. Each call is
//! verified against the catalog first, exactly as the build pass would verify
//! it, and then executed one conversion at a time:
//!
//! - print: every conversion is rendered by the native `snprintf` with only
//!   that conversion's arguments (its `*` integers and its value). Literal
//!   runs are copied with `%%` collapsed. `%n` stores the byte count so far.
//! - scan: every literal run and every conversion is executed by the native
//!   `sscanf`/`fscanf` with a trailing `%n`, so the next piece resumes where
//!   the last one stopped. `%s` and `%[` get a maximum width derived from the
//!   destination buffer.
//!
//! Call sites are reported at the caller's source position.

use std::ffi::{CStr, CString, c_int, c_long, c_void};
use std::panic::Location;

use cshape_core::{
    Diagnostic, Directive, DirectiveKind, FormatFamily, FormatString, MarshalKind, MarshalPlan,
    NumWidth, Piece, PlanEntry, SourcePos, SourceType, Width, verify_by_name,
};
use cshape_membrane::Handle;

use crate::binding::Binding;
use crate::error::BindError;
use crate::marshal::{CallFrame, NativeArg, Value, c_text};
use crate::metrics::{AbiMetrics, abi_metrics, refused};

/// `EOF` as returned by the scan family.
pub const EOF: i32 = -1;

unsafe extern "C" {
    static mut stdin: *mut libc::FILE;
    static mut stdout: *mut libc::FILE;
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

struct Verified<'f> {
    plan: MarshalPlan,
    pieces: Vec<Piece<'f>>,
}

fn caller_pos(location: &Location<'_>) -> SourcePos {
    SourcePos::new(location.file(), location.line(), location.column())
}

/// Verify a call from its runtime values. `leading` are the fixed parameters
/// before the format.
fn verify<'f>(
    function: &'static str,
    family: FormatFamily,
    leading: &[SourceType],
    format: &'f str,
    args: &[Value<'_>],
    position: SourcePos,
) -> Result<Verified<'f>, BindError> {
    c_text(format).map_err(refused)?;
    let types: Vec<SourceType> = leading
        .iter()
        .cloned()
        .chain([SourceType::Text])
        .chain(args.iter().map(Value::source_type))
        .collect();
    let plan = verify_by_name(function, Some(format), &types, &position)
        .map_err(|d| refused(BindError::from(d)))?;
    let pieces = FormatString::new(format, family)
        .pieces()
        .map_err(|e| refused(BindError::from(Diagnostic::new(e, position, function))))?;
    Ok(Verified { plan, pieces })
}

/// Pairs plan entries with argument values, in order.
struct Slots<'p, 'v, 'a> {
    inner: std::iter::Zip<std::slice::Iter<'p, PlanEntry>, std::slice::IterMut<'v, Value<'a>>>,
}

impl<'p, 'v, 'a> Slots<'p, 'v, 'a> {
    fn new(plan: &'p MarshalPlan, args: &'v mut [Value<'a>]) -> Self {
        Self {
            inner: plan.variadic.iter().zip(args.iter_mut()),
        }
    }

    fn next(&mut self, directive: &Directive) -> Result<(&'p PlanEntry, &'v mut Value<'a>), BindError> {
        self.inner.next().ok_or(BindError::ElementLayout {
            reason: if directive.is_conversion() {
                "no argument left for conversion"
            } else {
                "no argument left for `*`"
            },
        })
    }
}

/// Store a byte count into the location supplied for `%n`.
fn store_count(value: &mut Value<'_>, count: usize) -> Result<(), BindError> {
    match value {
        Value::Out(target) => target.store_count(count),
        other => Err(BindError::KindMismatch {
            expected: MarshalKind::SignedInt(NumWidth::W32),
            actual: other.source_type(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Print family
// ---------------------------------------------------------------------------

/// Variadic argument after C's default promotions.
#[derive(Debug, Clone, Copy, PartialEq)]
enum VarArg {
    Int(c_int),
    Long(c_long),
    Double(f64),
    Ptr(*const c_void),
}

/// Marshal at the value's own width; promotion happens in [`vararg`].
fn value_kind(entry: &PlanEntry) -> MarshalKind {
    match entry.kind {
        MarshalKind::SignedInt(_) | MarshalKind::UnsignedInt(_) => {
            entry.source.marshal_kind().unwrap_or(entry.kind)
        }
        kind => kind,
    }
}

fn vararg(native: NativeArg, promoted: MarshalKind) -> VarArg {
    match native {
        NativeArg::Int { bits, .. } => match promoted {
            MarshalKind::SignedInt(NumWidth::W64) | MarshalKind::UnsignedInt(NumWidth::W64) => {
                VarArg::Long(bits as c_long)
            }
            // Low 32 bits of the extended value: exact for every source the
            // matcher admits at int width.
            _ => VarArg::Int(bits as c_int),
        },
        NativeArg::Float {
            bits,
            width: NumWidth::W32,
        } => VarArg::Double(f64::from(f32::from_bits(bits as u32))),
        NativeArg::Float { bits, .. } => VarArg::Double(f64::from_bits(bits)),
        NativeArg::Ptr(addr) | NativeArg::View { addr, .. } => VarArg::Ptr(addr as *const c_void),
    }
}

macro_rules! native_snprintf {
    ($buf:expr, $cap:expr, $spec:expr, [$($star:expr),*], $value:expr) => {
        match $value {
            VarArg::Int(v) => libc::snprintf($buf, $cap, $spec, $($star,)* v),
            VarArg::Long(v) => libc::snprintf($buf, $cap, $spec, $($star,)* v),
            VarArg::Double(v) => libc::snprintf($buf, $cap, $spec, $($star,)* v),
            VarArg::Ptr(v) => libc::snprintf($buf, $cap, $spec, $($star,)* v),
        }
    };
}

/// # Safety
///
/// `buf` must be writable for `cap` bytes, and `spec` must hold exactly one
/// conversion whose `*` count and argument type match `stars` and `value`.
unsafe fn format_one(
    buf: *mut libc::c_char,
    cap: usize,
    spec: &CStr,
    stars: &[c_int],
    value: VarArg,
) -> c_int {
    let spec = spec.as_ptr();
    // SAFETY: guaranteed by the caller.
    unsafe {
        match *stars {
            [] => native_snprintf!(buf, cap, spec, [], value),
            [w] => native_snprintf!(buf, cap, spec, [w], value),
            [w, p] => native_snprintf!(buf, cap, spec, [w, p], value),
            _ => -1,
        }
    }
}

/// Render one conversion, growing the buffer until the output fits.
fn render_conversion(spec: &str, stars: &[c_int], value: VarArg) -> Result<Vec<u8>, BindError> {
    let spec = c_text(spec)?;
    let mut buf = vec![0_u8; 64];
    loop {
        AbiMetrics::inc(&abi_metrics().native_calls);
        // SAFETY: `buf` is writable for its length; `spec` came from a
        // verified piece whose arguments are exactly `stars` and `value`.
        let written = unsafe { format_one(buf.as_mut_ptr().cast(), buf.len(), &spec, stars, value) };
        let Ok(written) = usize::try_from(written) else {
            return Err(BindError::native("snprintf"));
        };
        if written < buf.len() {
            buf.truncate(written);
            return Ok(buf);
        }
        buf.resize(written + 1, 0);
    }
}

impl Binding<'_> {
    /// Render a verified print call into bytes, without a terminating NUL.
    fn render(&self, verified: &Verified<'_>, args: &mut [Value<'_>]) -> Result<Vec<u8>, BindError> {
        let mut frame = CallFrame::new(self.tracker());
        let mut slots = Slots::new(&verified.plan, args);
        let mut out = Vec::new();
        for piece in &verified.pieces {
            let (spec, star_args, directive) = match piece {
                Piece::Literal(text) => {
                    out.extend_from_slice(text.replace("%%", "%").as_bytes());
                    continue;
                }
                Piece::Conversion {
                    spec,
                    star_args,
                    directive,
                } => (spec, *star_args, directive),
            };

            let mut stars = Vec::with_capacity(star_args);
            for _ in 0..star_args {
                let (entry, value) = slots.next(directive)?;
                match frame.marshal(value, value_kind(entry)).map_err(refused)? {
                    NativeArg::Int { bits, .. } => stars.push(bits as c_int),
                    _ => {
                        return Err(refused(BindError::KindMismatch {
                            expected: entry.kind,
                            actual: value.source_type(),
                        }));
                    }
                }
            }

            let (entry, value) = slots.next(directive)?;
            if directive.kind == DirectiveKind::Count {
                store_count(value, out.len())?;
                continue;
            }
            let native = frame.marshal(value, value_kind(entry)).map_err(refused)?;
            out.extend(render_conversion(spec, &stars, vararg(native, entry.kind))?);
        }
        Ok(out)
    }

    /// `printf` to the C standard output. Returns the number of bytes written.
    #[track_caller]
    pub fn printf(&self, format: &str, args: &mut [Value<'_>]) -> Result<usize, BindError> {
        let position = caller_pos(Location::caller());
        let verified = verify("printf", FormatFamily::Print, &[], format, args, position)?;
        let text = self.render(&verified, args)?;
        // SAFETY: `stdout` is initialized by the C runtime before `main`.
        let file = unsafe { stdout };
        write_all(file, &text, "printf")?;
        // SAFETY: as above.
        unsafe { libc::fflush(file) };
        Ok(text.len())
    }

    /// `fprintf` to a live stream.
    #[track_caller]
    pub fn fprintf(
        &self,
        stream: Handle,
        format: &str,
        args: &mut [Value<'_>],
    ) -> Result<usize, BindError> {
        let position = caller_pos(Location::caller());
        let leading = [SourceType::Handle(stream.class)];
        let verified = verify("fprintf", FormatFamily::Print, &leading, format, args, position)?;
        let record = self.check_for("fprintf", stream)?;
        let text = self.render(&verified, args)?;
        write_all(record.handle.addr as *mut libc::FILE, &text, "fprintf")?;
        Ok(text.len())
    }

    /// `sprintf` into `dest`, refusing output that does not fit with its
    /// terminating NUL. Returns the length written, NUL excluded.
    #[track_caller]
    pub fn sprintf(
        &self,
        dest: &mut [u8],
        format: &str,
        args: &mut [Value<'_>],
    ) -> Result<usize, BindError> {
        let position = caller_pos(Location::caller());
        let verified = verify("sprintf", FormatFamily::Print, &[SourceType::Bytes], format, args, position)?;
        let text = self.render(&verified, args)?;
        if text.len() + 1 > dest.len() {
            return Err(refused(BindError::OutputBufferTooSmall {
                needed: text.len() + 1,
                available: dest.len(),
            }));
        }
        dest[..text.len()].copy_from_slice(&text);
        dest[text.len()] = 0;
        Ok(text.len())
    }

    /// `snprintf` into `dest`: truncates to `dest.len() - 1` bytes plus NUL
    /// and returns the untruncated length.
    #[track_caller]
    pub fn snprintf(
        &self,
        dest: &mut [u8],
        format: &str,
        args: &mut [Value<'_>],
    ) -> Result<usize, BindError> {
        let position = caller_pos(Location::caller());
        let leading = [SourceType::Bytes, SourceType::int(false, NumWidth::W64)];
        let verified = verify("snprintf", FormatFamily::Print, &leading, format, args, position)?;
        let text = self.render(&verified, args)?;
        if let Some(room) = dest.len().checked_sub(1) {
            let kept = text.len().min(room);
            dest[..kept].copy_from_slice(&text[..kept]);
            dest[kept] = 0;
        }
        Ok(text.len())
    }
}

fn write_all(file: *mut libc::FILE, bytes: &[u8], function: &'static str) -> Result<(), BindError> {
    if bytes.is_empty() {
        return Ok(());
    }
    AbiMetrics::inc(&abi_metrics().native_calls);
    // SAFETY: `file` is a live stream and `bytes` is readable for its length.
    let written = unsafe { libc::fwrite(bytes.as_ptr().cast(), 1, bytes.len(), file) };
    if written != bytes.len() {
        return Err(BindError::native(function));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scan family
// ---------------------------------------------------------------------------

enum ScanInput {
    Text(CString),
    Stream(*mut libc::FILE),
}

/// Native spec for one scan conversion writing into `target`.
///
/// `%s` and `%[` need room for the NUL, `%c` writes exactly `width` bytes.
fn scan_spec(spec: &str, directive: &Directive, target: NativeArg) -> Result<String, BindError> {
    let NativeArg::View { len, .. } = target else {
        return Ok(spec.to_string());
    };
    let too_small = |needed: usize| {
        refused(BindError::OutputBufferTooSmall {
            needed,
            available: len,
        })
    };
    match (directive.kind, directive.width) {
        (DirectiveKind::Text, Width::Fixed(width)) if width < len => Ok(spec.to_string()),
        (DirectiveKind::Text, Width::Fixed(width)) => Err(too_small(width + 1)),
        // A width of zero is not valid scanf syntax, so one byte of room is
        // the minimum.
        (DirectiveKind::Text, _) if len < 2 => Err(too_small(2)),
        (DirectiveKind::Text, _) => Ok(format!("%{}{}", len - 1, &spec[1..])),
        (DirectiveKind::Char, Width::Fixed(width)) if width > len => Err(too_small(width)),
        (DirectiveKind::Char, Width::None) if len == 0 => Err(too_small(1)),
        _ => Ok(spec.to_string()),
    }
}

fn target_ptr(native: NativeArg) -> *mut c_void {
    match native {
        NativeArg::Ptr(addr) | NativeArg::View { addr, .. } => addr as *mut c_void,
        NativeArg::Int { .. } | NativeArg::Float { .. } => std::ptr::null_mut(),
    }
}

/// # Safety
///
/// `consumed` must not exceed the input text length; `spec` must hold at most
/// one assigning conversion (present iff `target` is) followed by `%n`, and
/// `target` must be writable as that conversion requires.
unsafe fn scan_one(
    input: &ScanInput,
    consumed: usize,
    spec: &CStr,
    target: Option<*mut c_void>,
    count: &mut c_int,
) -> c_int {
    let count: *mut c_int = count;
    let spec = spec.as_ptr();
    // SAFETY: guaranteed by the caller.
    unsafe {
        match (input, target) {
            (ScanInput::Text(text), Some(target)) => {
                libc::sscanf(text.as_ptr().add(consumed), spec, target, count)
            }
            (ScanInput::Text(text), None) => libc::sscanf(text.as_ptr().add(consumed), spec, count),
            (ScanInput::Stream(file), Some(target)) => libc::fscanf(*file, spec, target, count),
            (ScanInput::Stream(file), None) => libc::fscanf(*file, spec, count),
        }
    }
}

impl Binding<'_> {
    /// Execute a verified scan call. Returns the number of assigned
    /// conversions, or [`EOF`] when input ran out before the first one.
    fn scan(
        &self,
        verified: &Verified<'_>,
        input: &ScanInput,
        args: &mut [Value<'_>],
    ) -> Result<i32, BindError> {
        let mut frame = CallFrame::new(self.tracker());
        let mut slots = Slots::new(&verified.plan, args);
        let mut assigned: i32 = 0;
        let mut consumed: usize = 0;

        for piece in &verified.pieces {
            let (spec, target) = match piece {
                Piece::Literal(text) => (format!("{text}%n"), None),
                Piece::Conversion {
                    spec, directive, ..
                } => {
                    let (entry, value) = slots.next(directive)?;
                    if directive.kind == DirectiveKind::Count {
                        store_count(value, consumed)?;
                        continue;
                    }
                    let native = frame.marshal_out(value, &entry.source).map_err(refused)?;
                    let spec = scan_spec(spec, directive, native)?;
                    (format!("{spec}%n"), Some(target_ptr(native)))
                }
            };
            let spec = c_text(&spec)?;
            let mut count: c_int = -1;
            AbiMetrics::inc(&abi_metrics().native_calls);
            // SAFETY: `consumed` only advances by counts the native scanner
            // reported for this input; the spec and target were built above
            // from one verified piece.
            let ret = unsafe { scan_one(input, consumed, &spec, target, &mut count) };

            let matched = match target {
                None => count >= 0,
                Some(_) => ret == 1,
            };
            if !matched {
                return Ok(if ret == EOF && assigned == 0 { EOF } else { assigned });
            }
            if target.is_some() {
                assigned += 1;
            }
            consumed += usize::try_from(count).unwrap_or(0);
        }
        Ok(assigned)
    }

    /// `sscanf` over `input`.
    #[track_caller]
    pub fn sscanf(&self, input: &str, format: &str, args: &mut [Value<'_>]) -> Result<i32, BindError> {
        let position = caller_pos(Location::caller());
        let verified = verify("sscanf", FormatFamily::Scan, &[SourceType::Text], format, args, position)?;
        let input = ScanInput::Text(c_text(input).map_err(refused)?);
        self.scan(&verified, &input, args)
    }

    /// `fscanf` from a live stream.
    #[track_caller]
    pub fn fscanf(
        &self,
        stream: Handle,
        format: &str,
        args: &mut [Value<'_>],
    ) -> Result<i32, BindError> {
        let position = caller_pos(Location::caller());
        let leading = [SourceType::Handle(stream.class)];
        let verified = verify("fscanf", FormatFamily::Scan, &leading, format, args, position)?;
        let record = self.check_for("fscanf", stream)?;
        let input = ScanInput::Stream(record.handle.addr as *mut libc::FILE);
        self.scan(&verified, &input, args)
    }

    /// `scanf` from the C standard input.
    #[track_caller]
    pub fn scanf(&self, format: &str, args: &mut [Value<'_>]) -> Result<i32, BindError> {
        let position = caller_pos(Location::caller());
        let verified = verify("scanf", FormatFamily::Scan, &[], format, args, position)?;
        // SAFETY: `stdin` is initialized by the C runtime before `main`.
        let input = ScanInput::Stream(unsafe { stdin });
        self.scan(&verified, &input, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cshape_core::parse_format;

    fn scan_directive(fmt: &str) -> Directive {
        parse_format(fmt, FormatFamily::Scan).unwrap().remove(0)
    }

    fn view(len: usize) -> NativeArg {
        NativeArg::View { addr: 0x1000, len }
    }

    #[test]
    fn text_conversions_get_buffer_width() {
        assert_eq!(scan_spec("%s", &scan_directive("%s"), view(16)).unwrap(), "%15s");
        assert_eq!(scan_spec("%[a-z]", &scan_directive("%[a-z]"), view(8)).unwrap(), "%7[a-z]");
        assert_eq!(scan_spec("%7s", &scan_directive("%7s"), view(8)).unwrap(), "%7s");
    }

    #[test]
    fn text_widths_that_do_not_fit_are_refused() {
        let err = scan_spec("%8s", &scan_directive("%8s"), view(8)).unwrap_err();
        assert!(matches!(
            err,
            BindError::OutputBufferTooSmall {
                needed: 9,
                available: 8
            }
        ));
        assert!(scan_spec("%s", &scan_directive("%s"), view(1)).is_err());
        assert!(scan_spec("%4c", &scan_directive("%4c"), view(3)).is_err());
        assert_eq!(scan_spec("%3c", &scan_directive("%3c"), view(3)).unwrap(), "%3c");
    }

    #[test]
    fn numeric_targets_keep_their_spec() {
        let d = scan_directive("%ld");
        assert_eq!(scan_spec("%ld", &d, NativeArg::Ptr(0x2000)).unwrap(), "%ld");
    }

    #[test]
    fn promotion_picks_the_varargs_slot() {
        let int = NativeArg::Int {
            bits: (-2_i64) as u64,
            width: NumWidth::W8,
            signed: true,
        };
        assert_eq!(vararg(int, MarshalKind::SignedInt(NumWidth::W32)), VarArg::Int(-2));
        assert_eq!(vararg(int, MarshalKind::SignedInt(NumWidth::W64)), VarArg::Long(-2));
        let float = NativeArg::Float {
            bits: u64::from(1.5_f32.to_bits()),
            width: NumWidth::W32,
        };
        assert_eq!(vararg(float, MarshalKind::Float(NumWidth::W64)), VarArg::Double(1.5));
    }

    #[test]
    fn conversions_render_through_native_snprintf() {
        assert_eq!(render_conversion("%5d", &[], VarArg::Int(42)).unwrap(), b"   42");
        assert_eq!(render_conversion("%*d", &[4], VarArg::Int(7)).unwrap(), b"   7");
        assert_eq!(render_conversion("%.*f", &[2], VarArg::Double(3.14159)).unwrap(), b"3.14");
        let long = render_conversion("%0200ld", &[], VarArg::Long(1)).unwrap();
        assert_eq!(long.len(), 200);
        assert_eq!(long.last(), Some(&b'1'));
    }
}
