//! Heap blocks: `malloc`, `calloc`, `realloc`, `free`, `strdup`, and sorting
//! or searching inside a tracked block.
//!
//! Every block handed out is registered as a `heap-block` handle carrying its
//! requested size. A block's handle is the only way back to its bytes, and
//! `free` releases the handle before the native call so a second `free` is
//! refused without touching the allocator.

use std::cmp::Ordering;
use std::ffi::c_void;
use std::{io, slice};

use cshape_membrane::{Handle, ResourceClass};

use crate::binding::Binding;
use crate::error::BindError;
use crate::marshal::c_text;
use crate::metrics::{AbiMetrics, abi_metrics, refused};
use crate::trampoline::{ElementView, search_elements, sort_elements};

const HEAP: ResourceClass = ResourceClass::HeapBlock;

fn native_call() {
    AbiMetrics::inc(&abi_metrics().native_calls);
}

impl Binding<'_> {
    /// Register a block `function` just allocated, freeing it again if the
    /// tracker refuses the address.
    fn adopt_block(
        &self,
        function: &'static str,
        ptr: *mut c_void,
        len: usize,
    ) -> Result<Handle, BindError> {
        self.acquire(function, ptr as usize, Some(len)).inspect_err(|_| {
            // SAFETY: `ptr` came from the native allocator and is not tracked.
            unsafe { libc::free(ptr) }
        })
    }

    /// Allocate `size` bytes. A zero-byte request still yields a unique
    /// block.
    pub fn malloc(&self, size: usize) -> Result<Handle, BindError> {
        native_call();
        // SAFETY: plain allocation; the result is checked for null.
        let ptr = unsafe { libc::malloc(size.max(1)) };
        if ptr.is_null() {
            return Err(BindError::native("malloc"));
        }
        self.adopt_block("malloc", ptr, size)
    }

    /// Allocate `count * size` zeroed bytes.
    pub fn calloc(&self, count: usize, size: usize) -> Result<Handle, BindError> {
        let Some(len) = count.checked_mul(size) else {
            return Err(refused(BindError::Native {
                function: "calloc",
                source: io::Error::from_raw_os_error(libc::ENOMEM),
            }));
        };
        native_call();
        // SAFETY: plain allocation; the result is checked for null.
        let ptr = unsafe { libc::calloc(count.max(1), size.max(1)) };
        if ptr.is_null() {
            return Err(BindError::native("calloc"));
        }
        self.adopt_block("calloc", ptr, len)
    }

    /// Resize a live block.
    ///
    /// On success the old handle is released and a new one returned, even when
    /// the address did not move. On failure the original stays live.
    pub fn realloc(&self, block: Handle, new_size: usize) -> Result<Handle, BindError> {
        let record = self.check_for("realloc", block)?;
        native_call();
        // SAFETY: the tracked address is a live allocation from the native
        // allocator.
        let ptr = unsafe { libc::realloc(record.handle.addr as *mut c_void, new_size.max(1)) };
        if ptr.is_null() {
            return Err(BindError::native("realloc"));
        }
        self.release_for("realloc", block)?;
        self.adopt_block("realloc", ptr, new_size)
    }

    /// Free a block. `None` is a no-op, like `free(NULL)`.
    pub fn free(&self, block: Option<Handle>) -> Result<(), BindError> {
        let Some(block) = block else {
            return Ok(());
        };
        let record = self.release_for("free", block)?;
        native_call();
        // SAFETY: the handle was live until the release above, so its tracked
        // address is an unfreed native allocation.
        unsafe { libc::free(record.handle.addr as *mut c_void) };
        Ok(())
    }

    /// Copy `text` into a new NUL-terminated heap block.
    pub fn strdup(&self, text: &str) -> Result<Handle, BindError> {
        let owned = c_text(text).map_err(refused)?;
        native_call();
        // SAFETY: `owned` is NUL-terminated and outlives the call.
        let ptr = unsafe { libc::strdup(owned.as_ptr()) };
        if ptr.is_null() {
            return Err(BindError::native("strdup"));
        }
        self.adopt_block("strdup", ptr.cast(), text.len() + 1)
    }

    /// Run `f` over the bytes of a live block.
    ///
    /// The block must not be freed from another thread while `f` runs.
    pub fn with_block<R>(&self, block: Handle, f: impl FnOnce(&[u8]) -> R) -> Result<R, BindError> {
        let record = self.check_live_as(block, HEAP)?;
        let len = record.len.unwrap_or(0);
        // SAFETY: a live heap block owns at least `len` initialized-or-zeroed
        // bytes at its address; `len == 0` blocks still have a valid address.
        let bytes = unsafe { slice::from_raw_parts(record.handle.addr as *const u8, len) };
        Ok(f(bytes))
    }

    /// Run `f` over the bytes of a live block, mutably.
    pub fn with_block_mut<R>(
        &self,
        block: Handle,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, BindError> {
        let record = self.check_live_as(block, HEAP)?;
        let len = record.len.unwrap_or(0);
        // SAFETY: as in `with_block`; the tracker hands each block to a single
        // owner, so no other slice aliases it during `f`.
        let bytes = unsafe { slice::from_raw_parts_mut(record.handle.addr as *mut u8, len) };
        Ok(f(bytes))
    }

    /// Sort the first `count` elements of `size` bytes stored in a block.
    pub fn qsort_block(
        &self,
        block: Handle,
        count: usize,
        size: usize,
        compare: impl FnMut(ElementView<'_>, ElementView<'_>) -> Ordering,
    ) -> Result<(), BindError> {
        let record = self.check_live_as(block, HEAP)?;
        let span = element_span(record.len.unwrap_or(0), count, size)?;
        self.with_block_mut(block, |bytes| sort_elements(&mut bytes[..span], size, compare))?
    }

    /// Binary-search the first `count` sorted elements of a block for `key`.
    pub fn bsearch_block(
        &self,
        key: &[u8],
        block: Handle,
        count: usize,
        size: usize,
        compare: impl FnMut(ElementView<'_>, ElementView<'_>) -> Ordering,
    ) -> Result<Option<usize>, BindError> {
        let record = self.check_live_as(block, HEAP)?;
        let span = element_span(record.len.unwrap_or(0), count, size)?;
        self.with_block(block, |bytes| search_elements(key, &bytes[..span], size, compare))?
    }
}

/// Bytes covered by `count` elements of `size`, which must fit in `len`.
fn element_span(len: usize, count: usize, size: usize) -> Result<usize, BindError> {
    match count.checked_mul(size) {
        Some(span) if span <= len => Ok(span),
        _ => Err(refused(BindError::ElementLayout {
            reason: "block is smaller than count * size",
        })),
    }
}
