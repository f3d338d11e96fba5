//! ABI layer for `malloc`, `calloc`, `realloc`, `free`, and `show_alloc_mem`.
//!
//! Suppressed under `cfg(test)` (see `lib.rs`) to avoid shadowing the test
//! binary's own allocator.

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::GLOBAL;

abi_fn! {
    /// Allocates `size` bytes, returning `NULL` on failure or when
    /// `size == 0`.
    fn malloc(size: usize) -> *mut c_void {
        GLOBAL
            .allocate(size)
            .map_or(std::ptr::null_mut(), |p| p.as_ptr().cast())
    }
}

abi_fn! {
    /// Allocates space for `nmemb` elements of `size` bytes each, zeroed.
    /// Returns `NULL` on overflow or allocation failure.
    fn calloc(nmemb: usize, size: usize) -> *mut c_void {
        GLOBAL
            .callocate(nmemb, size)
            .map_or(std::ptr::null_mut(), |p| p.as_ptr().cast())
    }
}

abi_fn! {
    /// Resizes the allocation at `ptr` to `size` bytes, preserving the
    /// overlapping prefix. `ptr == NULL` behaves as `malloc`; `size == 0`
    /// frees `ptr` and returns `NULL`.
    fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
        GLOBAL
            .reallocate(NonNull::new(ptr.cast::<u8>()), size)
            .map_or(std::ptr::null_mut(), |p| p.as_ptr().cast())
    }
}

abi_fn! {
    /// Returns the block at `ptr` to its pool. `ptr == NULL` and pointers
    /// not owned by [`GLOBAL`] are silent no-ops.
    fn free(ptr: *mut c_void) {
        GLOBAL.free(NonNull::new(ptr.cast::<u8>()));
    }
}

abi_fn! {
    /// Writes a snapshot of every pool's live blocks to stdout, in the
    /// stable `show_alloc_mem` dump format.
    fn show_alloc_mem() {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = GLOBAL.dump_to(&mut handle);
    }
}
