//! Intrusive block metadata: one header precedes every payload.

use std::ptr::NonNull;

/// Metadata preceding a block's payload bytes.
///
/// `size` is always a positive multiple of 16. Headers within an arena are
/// address-ordered along `next`; the payload for a given header begins
/// exactly one header past its start (`(self as *const _ as *const u8)
/// .add(size_of::<BlockHeader>())`).
#[repr(C, align(16))]
#[derive(Debug)]
pub struct BlockHeader {
    /// Usable payload bytes of this block, post-alignment.
    pub size: usize,
    /// Whether this block is currently free for reuse.
    pub is_free: bool,
    /// Next block in the same arena, or `None` at the tail.
    pub next: Option<NonNull<BlockHeader>>,
}

impl BlockHeader {
    /// Returns a pointer to the first byte of this block's payload.
    ///
    /// # Safety
    /// `header` must point at a live, fully-initialized `BlockHeader`.
    pub unsafe fn payload_ptr(header: NonNull<BlockHeader>) -> NonNull<u8> {
        // SAFETY: `header` is valid per the caller's contract; offsetting by
        // the header's own size stays within the arena that owns it (an
        // arena always reserves room for the header plus its declared size).
        unsafe {
            NonNull::new_unchecked(header.as_ptr().cast::<u8>().add(std::mem::size_of::<BlockHeader>()))
        }
    }

    /// Recovers the header that precedes `payload`.
    ///
    /// # Safety
    /// `payload` must be a pointer previously returned as a block's payload
    /// by this allocator.
    pub unsafe fn header_from_payload(payload: NonNull<u8>) -> NonNull<BlockHeader> {
        // SAFETY: every payload pointer this allocator hands out is preceded
        // by exactly one `BlockHeader`, per the caller's contract.
        unsafe {
            NonNull::new_unchecked(
                payload
                    .as_ptr()
                    .sub(std::mem::size_of::<BlockHeader>())
                    .cast::<BlockHeader>(),
            )
        }
    }
}
