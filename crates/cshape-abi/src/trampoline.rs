//! Comparator trampolines for `qsort` and `bsearch`.
//!
//! The native routines call back through a plain `extern "C"` function
//! pointer that carries no user data. [`compare_trampoline`] is that fixed
//! entry point; the managed comparator and the element stride live in a
//! per-call [`ComparatorFrame`] pushed onto a thread-local stack for the
//! duration of the native call. Nested sorts (a comparator that itself sorts)
//! push their own frame, and sorts on other threads have their own stack, so
//! calls never see each other's closures.
//!
//! A panicking comparator must not unwind through C frames. The trampoline
//! catches the panic, answers "equal" for the rest of the native call, and the
//! panic is resumed once the native routine has returned.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::ffi::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::marker::PhantomData;
use std::{mem, ptr, slice};

use crate::error::BindError;
use crate::metrics::{AbiMetrics, abi_metrics};

/// View of one element inside the array being sorted or searched.
#[derive(Debug, Clone, Copy)]
pub struct ElementView<'a> {
    ptr: *const u8,
    stride: usize,
    _array: PhantomData<&'a [u8]>,
}

impl<'a> ElementView<'a> {
    /// Native address the routine handed to the comparator.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.ptr as usize
    }

    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The element's bytes, `stride` long.
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        // SAFETY: views handed to byte-level comparators point into an
        // initialized `[u8]` borrowed for `'a`; typed helpers never call this.
        unsafe { slice::from_raw_parts(self.ptr, self.stride) }
    }
}

type NativeComparator = unsafe extern "C" fn(*const c_void, *const c_void) -> c_int;

struct ComparatorFrame<'f> {
    compare: &'f mut dyn FnMut(ElementView<'_>, ElementView<'_>) -> Ordering,
    stride: usize,
    panic: Option<Box<dyn Any + Send>>,
}

thread_local! {
    /// Type-erased `*mut ComparatorFrame` for each native call in progress.
    static ACTIVE: RefCell<Vec<*mut ()>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame pushed for one native call, also on unwind.
struct ActiveFrame;

impl ActiveFrame {
    fn push(frame: &mut ComparatorFrame<'_>) -> Self {
        let raw = ptr::from_mut(frame).cast::<()>();
        ACTIVE.with(|stack| stack.borrow_mut().push(raw));
        Self
    }
}

impl Drop for ActiveFrame {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Fixed native entry point handed to `qsort`/`bsearch`.
extern "C" fn compare_trampoline(a: *const c_void, b: *const c_void) -> c_int {
    // Copy the pointer out so no RefCell borrow is held while the comparator
    // runs; a nested sort pushes onto the same stack.
    let Some(raw) = ACTIVE.with(|stack| stack.borrow().last().copied()) else {
        return 0;
    };
    // SAFETY: `raw` was pushed by `with_frame` for the native call currently
    // executing on this thread and stays valid until that call returns.
    let frame = unsafe { &mut *raw.cast::<ComparatorFrame<'_>>() };
    if frame.panic.is_some() {
        return 0;
    }
    AbiMetrics::inc(&abi_metrics().trampoline_calls);

    // The native routine only passes addresses of elements inside the array
    // (or the key) it was given, each `stride` bytes long.
    let left = ElementView {
        ptr: a.cast(),
        stride: frame.stride,
        _array: PhantomData,
    };
    let right = ElementView {
        ptr: b.cast(),
        stride: frame.stride,
        _array: PhantomData,
    };

    let compare = &mut *frame.compare;
    match panic::catch_unwind(AssertUnwindSafe(|| compare(left, right))) {
        Ok(ordering) => ordering as c_int,
        Err(payload) => {
            frame.panic = Some(payload);
            0
        }
    }
}

/// Run `call` with the comparator installed, then resume any comparator panic.
fn with_frame<R>(
    stride: usize,
    compare: &mut dyn FnMut(ElementView<'_>, ElementView<'_>) -> Ordering,
    call: impl FnOnce(NativeComparator) -> R,
) -> R {
    let mut frame = ComparatorFrame {
        compare,
        stride,
        panic: None,
    };
    let result = {
        let _active = ActiveFrame::push(&mut frame);
        call(compare_trampoline)
    };
    if let Some(payload) = frame.panic.take() {
        panic::resume_unwind(payload);
    }
    result
}

fn check_layout(len: usize, size: usize) -> Result<usize, BindError> {
    if size == 0 {
        return Err(BindError::ElementLayout {
            reason: "element size is zero",
        });
    }
    if len % size != 0 {
        return Err(BindError::ElementLayout {
            reason: "buffer length is not a multiple of the element size",
        });
    }
    Ok(len / size)
}

/// # Safety
///
/// `base` must be valid for reads and writes of `count * size` bytes for the
/// duration of the call.
unsafe fn qsort_raw(
    base: *mut c_void,
    count: usize,
    size: usize,
    compare: &mut dyn FnMut(ElementView<'_>, ElementView<'_>) -> Ordering,
) {
    if count < 2 {
        return;
    }
    AbiMetrics::inc(&abi_metrics().native_calls);
    with_frame(size, compare, |trampoline| {
        // SAFETY: guaranteed by the caller.
        unsafe { libc::qsort(base, count, size, Some(trampoline)) }
    });
}

/// # Safety
///
/// `key` must be valid for `size` bytes and `base` for `count * size` bytes.
unsafe fn bsearch_raw(
    key: *const c_void,
    base: *const c_void,
    count: usize,
    size: usize,
    compare: &mut dyn FnMut(ElementView<'_>, ElementView<'_>) -> Ordering,
) -> Option<usize> {
    if count == 0 {
        return None;
    }
    AbiMetrics::inc(&abi_metrics().native_calls);
    let found = with_frame(size, compare, |trampoline| {
        // SAFETY: guaranteed by the caller.
        unsafe { libc::bsearch(key, base, count, size, Some(trampoline)) }
    });
    (!found.is_null()).then(|| (found as usize - base as usize) / size)
}

// ---------------------------------------------------------------------------
// Raw element arrays
// ---------------------------------------------------------------------------

/// Sort `base`, viewed as `base.len() / size` elements, with the native `qsort`.
pub fn sort_elements(
    base: &mut [u8],
    size: usize,
    mut compare: impl FnMut(ElementView<'_>, ElementView<'_>) -> Ordering,
) -> Result<(), BindError> {
    let count = check_layout(base.len(), size)?;
    // SAFETY: `base` is exclusively borrowed and holds `count * size` bytes.
    unsafe { qsort_raw(base.as_mut_ptr().cast(), count, size, &mut compare) };
    Ok(())
}

/// Binary-search sorted `base` for `key` with the native `bsearch`.
///
/// Returns the index of a matching element.
pub fn search_elements(
    key: &[u8],
    base: &[u8],
    size: usize,
    mut compare: impl FnMut(ElementView<'_>, ElementView<'_>) -> Ordering,
) -> Result<Option<usize>, BindError> {
    let count = check_layout(base.len(), size)?;
    if key.len() != size {
        return Err(BindError::ElementLayout {
            reason: "key length differs from the element size",
        });
    }
    // SAFETY: `key` holds one element and `base` holds `count`.
    Ok(unsafe { bsearch_raw(key.as_ptr().cast(), base.as_ptr().cast(), count, size, &mut compare) })
}

// ---------------------------------------------------------------------------
// Typed slices
// ---------------------------------------------------------------------------

/// # Safety
///
/// `view` must point at a properly aligned, initialized `T` that lives for `'a`.
unsafe fn element<'a, T>(view: ElementView<'a>) -> &'a T {
    // SAFETY: guaranteed by the caller.
    unsafe { &*view.ptr.cast::<T>() }
}

fn typed_size<T>() -> Result<usize, BindError> {
    match mem::size_of::<T>() {
        0 => Err(BindError::ElementLayout {
            reason: "element size is zero",
        }),
        size => Ok(size),
    }
}

/// Sort a slice in place through the native `qsort`.
pub fn sort_slice<T: Copy>(
    items: &mut [T],
    mut compare: impl FnMut(&T, &T) -> Ordering,
) -> Result<(), BindError> {
    let size = typed_size::<T>()?;
    let mut adapter = |a: ElementView<'_>, b: ElementView<'_>| {
        // SAFETY: qsort hands out addresses of elements of `items`, which
        // are aligned `T`s.
        let (a, b) = unsafe { (element::<T>(a), element::<T>(b)) };
        compare(a, b)
    };
    // SAFETY: `items` is exclusively borrowed; `T: Copy` values may be moved
    // bytewise by the native routine.
    unsafe { qsort_raw(items.as_mut_ptr().cast(), items.len(), size, &mut adapter) };
    Ok(())
}

/// Binary-search a sorted slice through the native `bsearch`.
pub fn search_slice<T: Copy>(
    items: &[T],
    key: &T,
    mut compare: impl FnMut(&T, &T) -> Ordering,
) -> Result<Option<usize>, BindError> {
    let size = typed_size::<T>()?;
    let mut adapter = |a: ElementView<'_>, b: ElementView<'_>| {
        // SAFETY: bsearch passes the key and elements of `items`, all
        // aligned `T`s.
        let (a, b) = unsafe { (element::<T>(a), element::<T>(b)) };
        compare(a, b)
    };
    let key: *const T = key;
    // SAFETY: `key` is one `T` and `items` holds `items.len()` of them.
    Ok(unsafe {
        bsearch_raw(
            key.cast(),
            items.as_ptr().cast(),
            items.len(),
            size,
            &mut adapter,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_integers_ascending_and_descending() {
        let mut values = [5_i32, -3, 9, 0, 2, 2, -8];
        sort_slice(&mut values, |a, b| a.cmp(b)).unwrap();
        assert_eq!(values, [-8, -3, 0, 2, 2, 5, 9]);
        sort_slice(&mut values, |a, b| b.cmp(a)).unwrap();
        assert_eq!(values, [9, 5, 2, 2, 0, -3, -8]);
    }

    #[test]
    fn search_finds_present_and_misses_absent() {
        let values = [1_u64, 3, 5, 7, 11];
        assert_eq!(search_slice(&values, &7, |a, b| a.cmp(b)).unwrap(), Some(3));
        assert_eq!(search_slice(&values, &4, |a, b| a.cmp(b)).unwrap(), None);
        assert_eq!(search_slice(&[] as &[u64], &4, |a, b| a.cmp(b)).unwrap(), None);
    }

    #[test]
    fn element_views_are_stride_aligned_within_the_array() {
        let mut raw: Vec<u8> = vec![3, 0, 1, 0, 2, 0, 9, 9];
        let base = raw.as_ptr() as usize;
        let len = raw.len();
        let mut seen = Vec::new();
        sort_elements(&mut raw, 2, |a, b| {
            for view in [a, b] {
                assert_eq!(view.bytes().len(), 2);
                assert!(view.addr() >= base && view.addr() < base + len);
                assert_eq!((view.addr() - base) % 2, 0);
            }
            seen.push((a.bytes()[0], b.bytes()[0]));
            a.bytes()[0].cmp(&b.bytes()[0])
        })
        .unwrap();
        assert_eq!(raw, vec![1, 0, 2, 0, 3, 0, 9, 9]);
        assert!(!seen.is_empty());
    }

    #[test]
    fn bad_layouts_are_refused() {
        let mut raw = [0_u8; 5];
        assert_eq!(
            sort_elements(&mut raw, 2, |_, _| Ordering::Equal).unwrap_err().kind(),
            "ElementLayout"
        );
        assert_eq!(
            sort_elements(&mut raw, 0, |_, _| Ordering::Equal).unwrap_err().kind(),
            "ElementLayout"
        );
        assert_eq!(
            search_elements(&[0; 3], &[0; 4], 2, |_, _| Ordering::Equal)
                .unwrap_err()
                .kind(),
            "ElementLayout"
        );
        let mut units = [(), ()];
        assert!(sort_slice(&mut units, |_, _| Ordering::Equal).is_err());
    }

    #[test]
    fn nested_sort_inside_a_comparator_uses_its_own_frame() {
        let mut outer = [3_i32, 1, 2];
        sort_slice(&mut outer, |a, b| {
            let mut inner = [9_u8, 7, 8];
            sort_slice(&mut inner, |x, y| x.cmp(y)).unwrap();
            assert_eq!(inner, [7, 8, 9]);
            a.cmp(b)
        })
        .unwrap();
        assert_eq!(outer, [1, 2, 3]);
    }

    #[test]
    fn comparator_panic_resumes_after_native_return() {
        let mut values = [4_i32, 3, 2, 1];
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = sort_slice(&mut values, |_, _| panic!("comparator failed"));
        }));
        assert!(result.is_err());
        ACTIVE.with(|stack| assert!(stack.borrow().is_empty()));
        // The trampoline still works after a panic.
        sort_slice(&mut values, |a, b| a.cmp(b)).unwrap();
        assert_eq!(values, [1, 2, 3, 4]);
    }

    #[test]
    fn sorts_on_separate_threads_do_not_interfere() {
        let workers: Vec<_> = (0..4_i64)
            .map(|t| {
                std::thread::spawn(move || {
                    let mut values: Vec<i64> = (0..200).map(|i| (i * 7919 + t) % 211).collect();
                    sort_slice(&mut values, |a, b| a.cmp(b)).unwrap();
                    values.windows(2).all(|w| w[0] <= w[1])
                })
            })
            .collect();
        for w in workers {
            assert!(w.join().unwrap());
        }
    }
}
