//! The host virtual-memory primitive: anonymous page mappings.
//!
//! Everything above this module treats memory acquisition as `map`/`unmap`
//! over opaque byte ranges. This is the one place that actually talks to the
//! operating system.

use std::ptr::NonNull;
use std::sync::OnceLock;

/// Failure modes when asking the host for or releasing memory.
#[derive(Debug, thiserror::Error)]
pub enum HostMapError {
    /// `mmap` returned `MAP_FAILED`.
    #[error("mmap failed with errno {errno}")]
    MmapFailed {
        /// The `errno` observed immediately after the failed call.
        errno: i32,
    },
    /// The requested size could not be represented safely (e.g. would
    /// overflow when rounded to a page boundary).
    #[error("requested mapping size overflows")]
    SizeOverflow,
}

/// Returns the process's page size, queried once and cached for the
/// lifetime of the process.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: `sysconf` with `_SC_PAGESIZE` has no preconditions and
        // never fails on a POSIX host.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if raw <= 0 { 4096 } else { raw as usize }
    })
}

/// Requests `bytes` of fresh, zero-initialized, read-write, private,
/// anonymous memory from the host.
///
/// `bytes` must be greater than zero. The returned region is owned by the
/// caller until passed back to [`unmap`] with the identical size.
pub fn map(bytes: usize) -> Result<NonNull<u8>, HostMapError> {
    if bytes == 0 {
        return Err(HostMapError::SizeOverflow);
    }
    // SAFETY: we pass a null hint address, anonymous+private flags, and a
    // non-zero length; the kernel either returns a fresh mapping or
    // `MAP_FAILED`, both of which are handled below without touching
    // uninitialized memory.
    let raw = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        // SAFETY: reading `errno` right after the failing call is sound.
        let errno = unsafe { *libc::__errno_location() };
        return Err(HostMapError::MmapFailed { errno });
    }
    // SAFETY: mmap succeeded, so `raw` is a non-null base address of a
    // `bytes`-byte mapping.
    Ok(unsafe { NonNull::new_unchecked(raw.cast::<u8>()) })
}

/// Releases a region previously obtained from [`map`]. `bytes` must be the
/// exact size passed to the `map` call that produced `base`.
///
/// # Safety
/// `base` must be the unmodified return value of a prior `map(bytes)` call
/// that has not already been unmapped.
pub unsafe fn unmap(base: NonNull<u8>, bytes: usize) {
    // SAFETY: caller guarantees `base`/`bytes` describe a live mapping
    // obtained from `map`.
    unsafe {
        libc::munmap(base.as_ptr().cast(), bytes);
    }
}
