//! Arenas: one mapped region carrying an `ArenaHeader` and a chain of blocks.

use std::ptr::NonNull;

use crate::block::BlockHeader;
use crate::host::{self, HostMapError};

/// Metadata at offset zero of every mapped region.
///
/// The byte range `[self, self + size)` is owned exclusively by this arena;
/// no `BlockHeader` it contains references memory outside that range.
#[repr(C, align(16))]
#[derive(Debug)]
pub struct ArenaHeader {
    /// Total mapped bytes, including this header and every block header.
    pub size: usize,
    /// Next arena in the same pool.
    pub next: Option<NonNull<ArenaHeader>>,
    /// First block header inside this arena. Always non-null post-construction.
    pub blocks: Option<NonNull<BlockHeader>>,
}

impl ArenaHeader {
    /// Maps `capacity` bytes from the host and carves out the arena's first
    /// block, sized to `first_block_size` (already 16-byte aligned).
    ///
    /// `capacity` must be large enough to hold the arena header, one block
    /// header, and `first_block_size` bytes of payload.
    pub fn new(capacity: usize, first_block_size: usize) -> Result<NonNull<ArenaHeader>, HostMapError> {
        let base = host::map(capacity)?;
        let arena_ptr = base.cast::<ArenaHeader>();
        // SAFETY: `base` is a fresh `capacity`-byte mapping from the host;
        // the caller guarantees `capacity` has room for this header, one
        // block header, and `first_block_size` bytes of payload, so both
        // writes below land inside the mapping.
        unsafe {
            let block_ptr = base
                .as_ptr()
                .add(std::mem::size_of::<ArenaHeader>())
                .cast::<BlockHeader>();
            block_ptr.write(BlockHeader {
                size: first_block_size,
                is_free: false,
                next: None,
            });
            let block_ptr = NonNull::new_unchecked(block_ptr);
            arena_ptr.as_ptr().write(ArenaHeader {
                size: capacity,
                next: None,
                blocks: Some(block_ptr),
            });
        }
        Ok(arena_ptr)
    }

    /// Releases this arena's mapping back to the host.
    ///
    /// # Safety
    /// `arena` must be a pointer previously returned by [`ArenaHeader::new`]
    /// that has not already been unmapped, and must not be dereferenced by
    /// any other thread concurrently with this call.
    pub unsafe fn destroy(arena: NonNull<ArenaHeader>) {
        // SAFETY: reading `size` before unmapping is sound because the
        // mapping is still live at this point; caller guarantees `arena`
        // came from a matching `map` call.
        let size = unsafe { arena.as_ref().size };
        // SAFETY: `arena.cast::<u8>()` is the exact base address and `size`
        // the exact length passed to the `map` call that produced it.
        unsafe {
            host::unmap(arena.cast::<u8>(), size);
        }
    }

    /// The first byte past this arena's mapped region.
    pub fn end(arena: NonNull<ArenaHeader>) -> *mut u8 {
        // SAFETY: `arena` is a live header; `size` is the exact mapped
        // length, so this address is one-past-the-end of a valid mapping
        // (never dereferenced, only compared).
        unsafe { arena.as_ptr().cast::<u8>().add(arena.as_ref().size) }
    }
}
