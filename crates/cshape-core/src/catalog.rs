//! Static catalog of bound C functions.
//!
//! Each entry describes the marshaling kind of every fixed parameter and of
//! the return value, whether the function is format-directed (and which
//! parameter holds the format), and what the call does to tracked resources.
//! The table is built at compile time and never mutated, so concurrent reads
//! need no synchronization.
//!
//! Widths assume an LP64 target: `size_t` and `long` are 64-bit, `int` is
//! 32-bit.

use cshape_membrane::ResourceClass;
use serde::Serialize;

use crate::format::FormatFamily;
use crate::kind::{MarshalKind, NumWidth};

/// Header a function is declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Header {
    Stdio,
    Stdlib,
    String,
    Math,
    Time,
}

/// Format-directed call shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatRole {
    pub family: FormatFamily,
    /// Index of the format parameter among the fixed parameters.
    pub format_index: usize,
}

/// What a call does to the resource ownership tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", content = "class", rename_all = "kebab-case")]
pub enum ResourceEffect {
    None,
    /// Returns a new resource to register.
    Acquire(ResourceClass),
    /// Consumes the resource passed as the first parameter.
    Release(ResourceClass),
    /// Releases the first parameter and acquires the return value.
    Resize,
    /// Dereferences a resource; it must be live.
    Uses(ResourceClass),
}

/// Signature of one bound function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AbiSignature {
    pub name: &'static str,
    pub header: Header,
    pub params: &'static [MarshalKind],
    pub ret: MarshalKind,
    pub format: Option<FormatRole>,
    pub effect: ResourceEffect,
}

impl AbiSignature {
    /// Format-directed functions take a variadic tail after their fixed
    /// parameters; nothing else in the catalog is variadic.
    #[must_use]
    pub const fn is_variadic(&self) -> bool {
        self.format.is_some()
    }

    #[must_use]
    pub const fn fixed_arity(&self) -> usize {
        self.params.len()
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

const I32: MarshalKind = MarshalKind::SignedInt(NumWidth::W32);
const U32: MarshalKind = MarshalKind::UnsignedInt(NumWidth::W32);
const LONG: MarshalKind = MarshalKind::SignedInt(NumWidth::W64);
const ULONG: MarshalKind = MarshalKind::UnsignedInt(NumWidth::W64);
const SIZE: MarshalKind = MarshalKind::UnsignedInt(NumWidth::W64);
const F64: MarshalKind = MarshalKind::Float(NumWidth::W64);
const TEXT: MarshalKind = MarshalKind::Text;
const BYTES: MarshalKind = MarshalKind::ByteView;
const FILE: MarshalKind = MarshalKind::Handle(ResourceClass::FileStream);
const HEAP: MarshalKind = MarshalKind::Handle(ResourceClass::HeapBlock);
const TEMP: MarshalKind = MarshalKind::Handle(ResourceClass::TempName);
const FN: MarshalKind = MarshalKind::FnPtr;
const VOID: MarshalKind = MarshalKind::Void;

const fn sig(
    name: &'static str,
    header: Header,
    params: &'static [MarshalKind],
    ret: MarshalKind,
    effect: ResourceEffect,
) -> AbiSignature {
    AbiSignature {
        name,
        header,
        params,
        ret,
        format: None,
        effect,
    }
}

const fn fmt_sig(
    name: &'static str,
    params: &'static [MarshalKind],
    family: FormatFamily,
    effect: ResourceEffect,
) -> AbiSignature {
    AbiSignature {
        name,
        header: Header::Stdio,
        params,
        ret: I32,
        format: Some(FormatRole {
            family,
            format_index: params.len() - 1,
        }),
        effect,
    }
}

use FormatFamily::{Print, Scan};
use Header::{Math, Stdio, Stdlib, String as Str, Time};
use ResourceEffect::{Acquire, Release, Resize, Uses};

const NONE: ResourceEffect = ResourceEffect::None;
const USES_FILE: ResourceEffect = Uses(ResourceClass::FileStream);

/// Every bound function, grouped by header.
pub static CATALOG: &[AbiSignature] = &[
    // --- stdio: format-directed ---
    fmt_sig("printf", &[TEXT], Print, NONE),
    fmt_sig("fprintf", &[FILE, TEXT], Print, USES_FILE),
    fmt_sig("sprintf", &[BYTES, TEXT], Print, NONE),
    fmt_sig("snprintf", &[BYTES, SIZE, TEXT], Print, NONE),
    fmt_sig("scanf", &[TEXT], Scan, NONE),
    fmt_sig("fscanf", &[FILE, TEXT], Scan, USES_FILE),
    fmt_sig("sscanf", &[TEXT, TEXT], Scan, NONE),
    // --- stdio: streams ---
    sig("fopen", Stdio, &[TEXT, TEXT], FILE, Acquire(ResourceClass::FileStream)),
    sig("fclose", Stdio, &[FILE], I32, Release(ResourceClass::FileStream)),
    sig("fflush", Stdio, &[FILE], I32, USES_FILE),
    sig("fread", Stdio, &[BYTES, SIZE, SIZE, FILE], SIZE, USES_FILE),
    sig("fwrite", Stdio, &[BYTES, SIZE, SIZE, FILE], SIZE, USES_FILE),
    sig("fgetc", Stdio, &[FILE], I32, USES_FILE),
    sig("fputc", Stdio, &[I32, FILE], I32, USES_FILE),
    sig("fgets", Stdio, &[BYTES, I32, FILE], BYTES, USES_FILE),
    sig("fputs", Stdio, &[TEXT, FILE], I32, USES_FILE),
    sig("puts", Stdio, &[TEXT], I32, NONE),
    sig("getchar", Stdio, &[], I32, NONE),
    sig("putchar", Stdio, &[I32], I32, NONE),
    sig("fseek", Stdio, &[FILE, LONG, I32], I32, USES_FILE),
    sig("ftell", Stdio, &[FILE], LONG, USES_FILE),
    sig("rewind", Stdio, &[FILE], VOID, USES_FILE),
    sig("feof", Stdio, &[FILE], I32, USES_FILE),
    sig("ferror", Stdio, &[FILE], I32, USES_FILE),
    sig("clearerr", Stdio, &[FILE], VOID, USES_FILE),
    sig("setbuf", Stdio, &[FILE, BYTES], VOID, USES_FILE),
    sig("setvbuf", Stdio, &[FILE, BYTES, I32, SIZE], I32, USES_FILE),
    sig("remove", Stdio, &[TEXT], I32, NONE),
    sig("rename", Stdio, &[TEXT, TEXT], I32, NONE),
    sig("tmpfile", Stdio, &[], FILE, Acquire(ResourceClass::FileStream)),
    sig("tmpnam", Stdio, &[], TEMP, Acquire(ResourceClass::TempName)),
    // --- stdlib ---
    sig("malloc", Stdlib, &[SIZE], HEAP, Acquire(ResourceClass::HeapBlock)),
    sig("calloc", Stdlib, &[SIZE, SIZE], HEAP, Acquire(ResourceClass::HeapBlock)),
    sig("realloc", Stdlib, &[HEAP, SIZE], HEAP, Resize),
    sig("free", Stdlib, &[HEAP], VOID, Release(ResourceClass::HeapBlock)),
    sig("atoi", Stdlib, &[TEXT], I32, NONE),
    sig("atol", Stdlib, &[TEXT], LONG, NONE),
    sig("atof", Stdlib, &[TEXT], F64, NONE),
    // End pointers are not exposed; the parsed value is returned alone.
    sig("strtol", Stdlib, &[TEXT, I32], LONG, NONE),
    sig("strtoul", Stdlib, &[TEXT, I32], ULONG, NONE),
    sig("strtod", Stdlib, &[TEXT], F64, NONE),
    sig("rand", Stdlib, &[], I32, NONE),
    sig("srand", Stdlib, &[U32], VOID, NONE),
    sig("qsort", Stdlib, &[BYTES, SIZE, SIZE, FN], VOID, NONE),
    sig("bsearch", Stdlib, &[BYTES, BYTES, SIZE, SIZE, FN], BYTES, NONE),
    sig("system", Stdlib, &[TEXT], I32, NONE),
    sig("getenv", Stdlib, &[TEXT], TEXT, NONE),
    sig("exit", Stdlib, &[I32], VOID, NONE),
    sig("abort", Stdlib, &[], VOID, NONE),
    sig("atexit", Stdlib, &[FN], I32, NONE),
    sig("abs", Stdlib, &[I32], I32, NONE),
    sig("labs", Stdlib, &[LONG], LONG, NONE),
    // --- string ---
    sig("strlen", Str, &[TEXT], SIZE, NONE),
    // Destinations are writable views; the result aliases the destination.
    sig("strcpy", Str, &[BYTES, TEXT], BYTES, NONE),
    sig("strncpy", Str, &[BYTES, TEXT, SIZE], BYTES, NONE),
    sig("strcat", Str, &[BYTES, TEXT], BYTES, NONE),
    sig("strncat", Str, &[BYTES, TEXT, SIZE], BYTES, NONE),
    sig("strcmp", Str, &[TEXT, TEXT], I32, NONE),
    sig("strncmp", Str, &[TEXT, TEXT, SIZE], I32, NONE),
    sig("strcoll", Str, &[TEXT, TEXT], I32, NONE),
    sig("strxfrm", Str, &[BYTES, TEXT, SIZE], SIZE, NONE),
    sig("strchr", Str, &[TEXT, I32], TEXT, NONE),
    sig("strrchr", Str, &[TEXT, I32], TEXT, NONE),
    sig("strstr", Str, &[TEXT, TEXT], TEXT, NONE),
    sig("strpbrk", Str, &[TEXT, TEXT], TEXT, NONE),
    sig("strspn", Str, &[TEXT, TEXT], SIZE, NONE),
    sig("strcspn", Str, &[TEXT, TEXT], SIZE, NONE),
    sig("strerror", Str, &[I32], TEXT, NONE),
    sig("strdup", Str, &[TEXT], HEAP, Acquire(ResourceClass::HeapBlock)),
    sig("memcpy", Str, &[BYTES, BYTES, SIZE], BYTES, NONE),
    sig("memmove", Str, &[BYTES, BYTES, SIZE], BYTES, NONE),
    sig("memset", Str, &[BYTES, I32, SIZE], BYTES, NONE),
    sig("memcmp", Str, &[BYTES, BYTES, SIZE], I32, NONE),
    sig("memchr", Str, &[BYTES, I32, SIZE], BYTES, NONE),
    // --- math ---
    sig("sin", Math, &[F64], F64, NONE),
    sig("cos", Math, &[F64], F64, NONE),
    sig("tan", Math, &[F64], F64, NONE),
    sig("asin", Math, &[F64], F64, NONE),
    sig("acos", Math, &[F64], F64, NONE),
    sig("atan", Math, &[F64], F64, NONE),
    sig("sinh", Math, &[F64], F64, NONE),
    sig("cosh", Math, &[F64], F64, NONE),
    sig("tanh", Math, &[F64], F64, NONE),
    sig("sqrt", Math, &[F64], F64, NONE),
    sig("pow", Math, &[F64, F64], F64, NONE),
    sig("fabs", Math, &[F64], F64, NONE),
    sig("floor", Math, &[F64], F64, NONE),
    sig("ceil", Math, &[F64], F64, NONE),
    sig("exp", Math, &[F64], F64, NONE),
    sig("log", Math, &[F64], F64, NONE),
    sig("log10", Math, &[F64], F64, NONE),
    sig("fmod", Math, &[F64, F64], F64, NONE),
    sig("round", Math, &[F64], F64, NONE),
    sig("atan2", Math, &[F64, F64], F64, NONE),
    // --- time ---
    sig("time", Time, &[], LONG, NONE),
    sig("clock", Time, &[], LONG, NONE),
    sig("difftime", Time, &[LONG, LONG], F64, NONE),
];

/// Look up a bound function by name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static AbiSignature> {
    CATALOG.iter().find(|s| s.name == name)
}

/// All signatures declared in `header`.
pub fn signatures_in(header: Header) -> impl Iterator<Item = &'static AbiSignature> {
    CATALOG.iter().filter(move |s| s.header == header)
}
