//! Integration test: format-directed calls through the native printf/scanf
//! families, with verification and ownership checks in front.
//!
//! Run: cargo test -p cshape-abi --test format_call_test

use cshape_abi::{Binding, BindError, EOF, OutRef, Value};
use cshape_membrane::OwnershipTracker;

fn text(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).unwrap()
}

fn call_site_kind(err: &BindError) -> &'static str {
    match err {
        BindError::CallSite(diag) => diag.kind(),
        other => panic!("expected a call-site diagnostic, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Print family
// ---------------------------------------------------------------------------

#[test]
fn sprintf_renders_mixed_conversions() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut buf = [0_u8; 64];
    let n = binding
        .sprintf(
            &mut buf,
            "%d %s, %u%% of %.2f [%c] %lx\n",
            &mut [
                Value::I32(-3),
                Value::Text("apples"),
                Value::U8(50),
                Value::F64(2.5),
                Value::I8(b'z' as i8),
                Value::U64(0xbeef),
            ],
        )
        .unwrap();
    assert_eq!(text(&buf), "-3 apples, 50% of 2.50 [z] beef\n");
    assert_eq!(n, text(&buf).len());
}

#[test]
fn star_width_and_precision_consume_integers_in_order() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut buf = [0_u8; 32];
    binding
        .sprintf(
            &mut buf,
            "[%*.*f]",
            &mut [Value::I32(8), Value::I16(3), Value::F32(1.25)],
        )
        .unwrap();
    assert_eq!(text(&buf), "[   1.250]");

    // Literal digits consume nothing.
    binding
        .sprintf(&mut buf, "[%5.2f]", &mut [Value::F64(1.0)])
        .unwrap();
    assert_eq!(text(&buf), "[ 1.00]");
}

#[test]
fn sprintf_refuses_overflow_and_leaves_buffer_untouched() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut buf = [b'#'; 4];
    let err = binding
        .sprintf(&mut buf, "%d", &mut [Value::I32(12345)])
        .unwrap_err();
    assert!(matches!(
        err,
        BindError::OutputBufferTooSmall {
            needed: 6,
            available: 4
        }
    ));
    assert_eq!(buf, [b'#'; 4]);
}

#[test]
fn snprintf_truncates_and_reports_full_length() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut buf = [0xFF_u8; 6];
    let n = binding
        .snprintf(&mut buf, "%s-%d", &mut [Value::Text("abcdef"), Value::I32(7)])
        .unwrap();
    assert_eq!(n, 8);
    assert_eq!(text(&buf), "abcde");
    assert_eq!(buf[5], 0);

    let n = binding.snprintf(&mut [], "%d", &mut [Value::I32(10)]).unwrap();
    assert_eq!(n, 2);
}

#[test]
fn print_count_stores_bytes_written_so_far() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut buf = [0_u8; 32];
    let mut at = 0_i32;
    binding
        .sprintf(
            &mut buf,
            "%s%n!",
            &mut [Value::Text("hello"), Value::Out(OutRef::I32(&mut at))],
        )
        .unwrap();
    assert_eq!(text(&buf), "hello!");
    assert_eq!(at, 5);
}

#[test]
fn verification_failures_never_reach_native_code() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut buf = [0_u8; 16];

    let err = binding
        .sprintf(&mut buf, "%d %d", &mut [Value::I32(1)])
        .unwrap_err();
    assert_eq!(call_site_kind(&err), "FormatArgumentCountMismatch");

    let err = binding
        .sprintf(&mut buf, "%d", &mut [Value::I32(1), Value::I32(2)])
        .unwrap_err();
    assert_eq!(call_site_kind(&err), "FormatArgumentCountMismatch");

    let err = binding
        .sprintf(&mut buf, "%d", &mut [Value::I64(1)])
        .unwrap_err();
    assert_eq!(call_site_kind(&err), "FormatArgumentTypeMismatch");

    let err = binding
        .sprintf(&mut buf, "%s", &mut [Value::I32(1)])
        .unwrap_err();
    assert_eq!(call_site_kind(&err), "FormatArgumentTypeMismatch");

    let err = binding.sprintf(&mut buf, "%y", &mut []).unwrap_err();
    assert_eq!(call_site_kind(&err), "MalformedFormatDirective");

    assert_eq!(buf, [0_u8; 16]);
}

#[test]
fn diagnostics_point_at_the_calling_line() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let line = line!() + 1;
    let err = binding.printf("%d\n", &mut []).unwrap_err();
    let BindError::CallSite(diag) = err else {
        panic!("expected a call-site diagnostic");
    };
    assert!(diag.position.file.ends_with("format_call_test.rs"));
    assert_eq!(diag.position.line, line);
    assert_eq!(diag.function, "printf");
}

#[test]
fn interior_nul_in_text_is_refused() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut buf = [0_u8; 16];
    let err = binding
        .sprintf(&mut buf, "%s", &mut [Value::Text("a\0b")])
        .unwrap_err();
    assert!(matches!(err, BindError::EmbeddedNulInText { position: 1 }));
    binding
        .sprintf(&mut buf, "%s", &mut [Value::Text("ab")])
        .unwrap();
    assert_eq!(text(&buf), "ab");
}

#[test]
fn pointer_conversion_checks_handle_liveness() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let block = binding.malloc(8).unwrap();
    let mut buf = [0_u8; 32];
    binding
        .sprintf(&mut buf, "%p", &mut [Value::Handle(block)])
        .unwrap();
    assert_eq!(text(&buf), format!("{:#x}", block.addr));

    binding.free(Some(block)).unwrap();
    let err = binding
        .sprintf(&mut buf, "%p", &mut [Value::Handle(block)])
        .unwrap_err();
    assert_eq!(err.kind(), "UseAfterRelease");
}

#[test]
fn printf_with_nothing_to_write() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    assert_eq!(binding.printf("", &mut []).unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Scan family
// ---------------------------------------------------------------------------

#[test]
fn sscanf_assigns_every_output() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut n = 0_i32;
    let mut word = [0_u8; 16];
    let mut x = 0.0_f64;
    let mut small = 0_u8;
    let assigned = binding
        .sscanf(
            "  42 apples 2.5 7",
            "%d %s %lf %hhu",
            &mut [
                Value::Out(OutRef::I32(&mut n)),
                Value::BytesMut(&mut word),
                Value::Out(OutRef::F64(&mut x)),
                Value::Out(OutRef::U8(&mut small)),
            ],
        )
        .unwrap();
    assert_eq!(assigned, 4);
    assert_eq!(n, 42);
    assert_eq!(text(&word), "apples");
    assert_eq!(x, 2.5);
    assert_eq!(small, 7);
}

#[test]
fn sscanf_stops_at_the_first_mismatch() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut a = 0_i32;
    let mut b = -1_i32;
    let assigned = binding
        .sscanf(
            "10,x",
            "%d,%d",
            &mut [Value::Out(OutRef::I32(&mut a)), Value::Out(OutRef::I32(&mut b))],
        )
        .unwrap();
    assert_eq!(assigned, 1);
    assert_eq!((a, b), (10, -1));

    let assigned = binding
        .sscanf("10;20", "%d,%d", &mut [
            Value::Out(OutRef::I32(&mut a)),
            Value::Out(OutRef::I32(&mut b)),
        ])
        .unwrap();
    assert_eq!(assigned, 1);
}

#[test]
fn sscanf_on_empty_input_is_eof() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut a = 0_i32;
    let assigned = binding
        .sscanf("", "%d", &mut [Value::Out(OutRef::I32(&mut a))])
        .unwrap();
    assert_eq!(assigned, EOF);
}

#[test]
fn suppressed_conversions_and_counts() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut second = 0_i64;
    let mut at = 0_i32;
    let assigned = binding
        .sscanf(
            "1 2 rest",
            "%*d %ld%n",
            &mut [
                Value::Out(OutRef::I64(&mut second)),
                Value::Out(OutRef::I32(&mut at)),
            ],
        )
        .unwrap();
    assert_eq!(assigned, 1);
    assert_eq!(second, 2);
    assert_eq!(at, 3);
}

#[test]
fn text_outputs_are_bounded_by_the_buffer() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let mut word = [0xAA_u8; 4];
    let assigned = binding
        .sscanf("overflowing", "%s", &mut [Value::BytesMut(&mut word)])
        .unwrap();
    assert_eq!(assigned, 1);
    assert_eq!(&word, b"ove\0");

    let err = binding
        .sscanf("abc", "%8s", &mut [Value::BytesMut(&mut word)])
        .unwrap_err();
    assert_eq!(err.kind(), "OutputBufferTooSmall");
}

#[test]
fn scan_outputs_must_be_locations_of_the_exact_type() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let err = binding
        .sscanf("5", "%d", &mut [Value::I32(0)])
        .unwrap_err();
    assert_eq!(call_site_kind(&err), "ExpectedOutputReference");

    let mut wide = 0_i64;
    let err = binding
        .sscanf("5", "%d", &mut [Value::Out(OutRef::I64(&mut wide))])
        .unwrap_err();
    assert_eq!(call_site_kind(&err), "FormatArgumentTypeMismatch");

    let mut single = 0.0_f32;
    binding
        .sscanf("0.5", "%f", &mut [Value::Out(OutRef::F32(&mut single))])
        .unwrap();
    assert_eq!(single, 0.5);
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

#[test]
fn fprintf_then_fscanf_through_a_temporary_stream() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let stream = binding.tmpfile().unwrap();
    let written = binding
        .fprintf(stream, "%s=%d\n", &mut [Value::Text("depth"), Value::U16(12)])
        .unwrap();
    assert_eq!(written, 9);
    binding.rewind(stream).unwrap();

    let mut key = [0_u8; 8];
    let mut value = 0_i32;
    let assigned = binding
        .fscanf(
            stream,
            "%[a-z]=%d",
            &mut [Value::BytesMut(&mut key), Value::Out(OutRef::I32(&mut value))],
        )
        .unwrap();
    assert_eq!(assigned, 2);
    assert_eq!(text(&key), "depth");
    assert_eq!(value, 12);

    binding.fclose(stream).unwrap();
    let err = binding.fprintf(stream, "x", &mut []).unwrap_err();
    assert_eq!(err.kind(), "UseAfterRelease");
}

#[test]
fn heap_handles_are_not_streams() {
    let tracker = OwnershipTracker::new();
    let binding = Binding::new(&tracker);
    let block = binding.malloc(4).unwrap();
    let err = binding.fprintf(block, "x", &mut []).unwrap_err();
    assert_eq!(call_site_kind(&err), "ParameterTypeMismatch");
    binding.free(Some(block)).unwrap();
}
