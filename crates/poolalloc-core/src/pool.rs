//! A pool: the chain of arenas serving one size class.

use std::mem::size_of;
use std::ptr::NonNull;

use crate::arena::ArenaHeader;
use crate::block::BlockHeader;
use crate::classify::PoolId;
use crate::host::HostMapError;
use crate::log::{LifecycleLevel, LifecycleLog};

/// The surplus a free block must have over the request before it is worth
/// splitting into two blocks (see §4.D / §9 "split threshold").
fn splittable_surplus(block_size: usize, aligned_size: usize) -> bool {
    block_size > aligned_size + size_of::<BlockHeader>() + 16
}

/// A singly-linked chain of arenas dedicated to one size class.
#[derive(Default)]
pub struct Pool {
    head: Option<NonNull<ArenaHeader>>,
}

// SAFETY: every field of `Pool` is a raw, address-validated link; the only
// access path into a `Pool` is through the allocator's single mutex, which
// makes exclusive access (and therefore `Send`) sound regardless of the
// thread that happens to hold the lock.
unsafe impl Send for Pool {}

impl Pool {
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// The head arena of this pool, for introspection.
    pub fn head(&self) -> Option<NonNull<ArenaHeader>> {
        self.head
    }

    fn arenas(&self) -> ArenaIter {
        ArenaIter { next: self.head }
    }

    /// `allocate_in_pool` (§4.D): first-fit scan with splitting, then tail
    /// extension, then arena creation.
    pub fn allocate(
        &mut self,
        pool_id: PoolId,
        aligned_size: usize,
        arena_capacity: usize,
        log: &mut LifecycleLog,
    ) -> Result<NonNull<u8>, HostMapError> {
        if let Some(payload) = self.scan_free_blocks(aligned_size, log) {
            return Ok(payload);
        }
        if let Some(payload) = self.scan_tail_extension(aligned_size, log) {
            return Ok(payload);
        }
        self.create_arena(pool_id, aligned_size, arena_capacity, log)
    }

    fn scan_free_blocks(&mut self, aligned_size: usize, log: &mut LifecycleLog) -> Option<NonNull<u8>> {
        for arena in self.arenas() {
            // SAFETY: `arena` came from this pool's own live chain.
            let mut cursor = unsafe { arena.as_ref().blocks };
            while let Some(mut block) = cursor {
                // SAFETY: `block` is a link inside `arena`'s chain, which is
                // exclusively owned by this pool and accessed only under the
                // allocator's lock.
                let (is_free, size, next) = unsafe {
                    let b = block.as_ref();
                    (b.is_free, b.size, b.next)
                };
                if is_free && size >= aligned_size {
                    // SAFETY: same justification as above; we now mutate the
                    // winning block (and possibly split off a new one) while
                    // holding the only reference to it.
                    unsafe {
                        if size == aligned_size {
                            block.as_mut().is_free = false;
                        } else if splittable_surplus(size, aligned_size) {
                            let payload = BlockHeader::payload_ptr(block);
                            let new_header_addr =
                                payload.as_ptr().add(aligned_size).cast::<BlockHeader>();
                            let new_block_size = size - aligned_size - size_of::<BlockHeader>();
                            new_header_addr.write(BlockHeader {
                                size: new_block_size,
                                is_free: true,
                                next,
                            });
                            let new_block = NonNull::new_unchecked(new_header_addr);
                            let b = block.as_mut();
                            b.size = aligned_size;
                            b.next = Some(new_block);
                            b.is_free = false;
                            log.trace(
                                "allocate",
                                "split",
                                Some(block.as_ptr() as usize),
                                Some(aligned_size),
                                None,
                                "success",
                                format!("surplus_block_size={new_block_size}"),
                            );
                        } else {
                            block.as_mut().is_free = false;
                        }
                        return Some(BlockHeader::payload_ptr(block));
                    }
                }
                cursor = next;
            }
        }
        None
    }

    fn scan_tail_extension(&mut self, aligned_size: usize, log: &mut LifecycleLog) -> Option<NonNull<u8>> {
        for arena in self.arenas() {
            // SAFETY: `arena` is a live member of this pool's chain.
            let (mut last, arena_end) = unsafe { (arena.as_ref().blocks.unwrap(), ArenaHeader::end(arena)) };
            // SAFETY: walking to the tail of a well-formed, address-ordered
            // chain owned exclusively by this arena.
            unsafe {
                while let Some(next) = last.as_ref().next {
                    last = next;
                }
            }
            // SAFETY: `last` is the tail block of `arena`'s chain.
            let needed_end = unsafe {
                let payload = BlockHeader::payload_ptr(last);
                payload.as_ptr().add(last.as_ref().size) as usize
                    + size_of::<BlockHeader>()
                    + aligned_size
            };
            if needed_end <= arena_end as usize {
                // SAFETY: the arithmetic above proved the new header and its
                // payload fit strictly before `arena_end`.
                unsafe {
                    let payload = BlockHeader::payload_ptr(last);
                    let new_header_addr = payload
                        .as_ptr()
                        .add(last.as_ref().size)
                        .cast::<BlockHeader>();
                    new_header_addr.write(BlockHeader {
                        size: aligned_size,
                        is_free: false,
                        next: None,
                    });
                    let new_block = NonNull::new_unchecked(new_header_addr);
                    last.as_mut().next = Some(new_block);
                    log.trace(
                        "allocate",
                        "tail_extend",
                        Some(new_block.as_ptr() as usize),
                        Some(aligned_size),
                        None,
                        "success",
                        "appended past previous tail block",
                    );
                    return Some(BlockHeader::payload_ptr(new_block));
                }
            }
        }
        None
    }

    fn create_arena(
        &mut self,
        pool_id: PoolId,
        aligned_size: usize,
        arena_capacity: usize,
        log: &mut LifecycleLog,
    ) -> Result<NonNull<u8>, HostMapError> {
        let mut arena = ArenaHeader::new(arena_capacity, aligned_size).map_err(|err| {
            log.record(
                LifecycleLevel::Warn,
                "allocate",
                "new_arena",
                None,
                Some(arena_capacity),
                Some(pool_id),
                "oom",
                format!("{err}"),
            );
            err
        })?;
        // SAFETY: `arena` was just constructed and is not yet reachable from
        // any other thread.
        unsafe {
            arena.as_mut().next = self.head;
        }
        self.head = Some(arena);
        log.record(
            LifecycleLevel::Info,
            "allocate",
            "new_arena",
            Some(arena.as_ptr() as usize),
            Some(arena_capacity),
            Some(pool_id),
            "success",
            format!("first_block_size={aligned_size}"),
        );
        // SAFETY: the arena's first block is always populated by `ArenaHeader::new`.
        let payload = unsafe { BlockHeader::payload_ptr(arena.as_ref().blocks.unwrap()) };
        Ok(payload)
    }

    /// Scans this pool's arenas for a `BlockHeader` at exactly `candidate`
    /// and marks it free. Returns `true` on match (Tiny/Small free path).
    pub fn mark_free(&mut self, candidate: NonNull<BlockHeader>) -> bool {
        for arena in self.arenas() {
            // SAFETY: `arena` is a live member of this pool's chain.
            let mut cursor = unsafe { arena.as_ref().blocks };
            while let Some(mut block) = cursor {
                if block == candidate {
                    // SAFETY: `block` is a live header inside `arena`.
                    unsafe {
                        block.as_mut().is_free = true;
                    }
                    return true;
                }
                // SAFETY: `block` is a live header; reading `next` stays
                // inside the arena's chain.
                cursor = unsafe { block.as_ref().next };
            }
        }
        false
    }

    /// Looks up (without mutating) the `BlockHeader` at `candidate`, for
    /// reallocate's size query. Tiny/Small path.
    pub fn find(&self, candidate: NonNull<BlockHeader>) -> Option<NonNull<BlockHeader>> {
        for arena in self.arenas() {
            // SAFETY: `arena` is a live member of this pool's chain.
            let mut cursor = unsafe { arena.as_ref().blocks };
            while let Some(block) = cursor {
                if block == candidate {
                    return Some(block);
                }
                // SAFETY: `block` is a live header; reading `next` stays
                // inside the arena's chain.
                cursor = unsafe { block.as_ref().next };
            }
        }
        None
    }

    /// Looks up (without mutating or unlinking) whether `candidate` is the
    /// sole block header of some arena in this pool. Large-pool path.
    pub fn find_large(&self, candidate: NonNull<BlockHeader>) -> Option<NonNull<BlockHeader>> {
        for arena in self.arenas() {
            // SAFETY: `arena` is a live member of this pool's chain.
            if unsafe { arena.as_ref().blocks } == Some(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Large-pool free: unlinks the arena whose sole block header sits at
    /// `candidate` and returns it for the caller to unmap. Handles unlinking
    /// the head specially.
    pub fn take_large_arena(&mut self, candidate: NonNull<BlockHeader>) -> Option<NonNull<ArenaHeader>> {
        let mut prev: Option<NonNull<ArenaHeader>> = None;
        let mut cursor = self.head;
        while let Some(arena) = cursor {
            // SAFETY: `arena` is a live member of this pool's chain.
            let (blocks, next) = unsafe { (arena.as_ref().blocks, arena.as_ref().next) };
            if blocks == Some(candidate) {
                match prev {
                    None => self.head = next,
                    Some(mut p) => {
                        // SAFETY: `p` is the previous live arena in the chain.
                        unsafe {
                            p.as_mut().next = next;
                        }
                    }
                }
                return Some(arena);
            }
            prev = Some(arena);
            cursor = next;
        }
        None
    }
}

struct ArenaIter {
    next: Option<NonNull<ArenaHeader>>,
}

impl Iterator for ArenaIter {
    type Item = NonNull<ArenaHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        // SAFETY: `current` is a live member of the chain being iterated.
        self.next = unsafe { current.as_ref().next };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host;

    fn new_log() -> LifecycleLog {
        LifecycleLog::new()
    }

    #[test]
    fn first_allocation_creates_an_arena() {
        let mut pool = Pool::new();
        let mut log = new_log();
        let capacity = 8 * host::page_size();
        let ptr = pool
            .allocate(PoolId::Tiny, 16, capacity, &mut log)
            .expect("first allocation should succeed");
        assert_eq!(ptr.as_ptr() as usize % 16, 0);
        assert!(pool.head().is_some());
    }

    #[test]
    fn freeing_and_reallocating_same_size_reuses_the_block() {
        let mut pool = Pool::new();
        let mut log = new_log();
        let capacity = 8 * host::page_size();
        let first = pool.allocate(PoolId::Tiny, 16, capacity, &mut log).unwrap();
        // SAFETY: `first` is a live payload pointer from this pool.
        let header = unsafe { BlockHeader::header_from_payload(first) };
        assert!(pool.mark_free(header));
        let second = pool.allocate(PoolId::Tiny, 16, capacity, &mut log).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tail_extension_places_distinct_blocks_before_new_arena() {
        let mut pool = Pool::new();
        let mut log = new_log();
        let capacity = 8 * host::page_size();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let ptr = pool.allocate(PoolId::Tiny, 64, capacity, &mut log).unwrap();
            assert!(seen.insert(ptr.as_ptr() as usize));
        }
    }

    #[test]
    fn large_pool_take_arena_unlinks_head_and_nonhead() {
        let mut pool = Pool::new();
        let mut log = new_log();
        let cap1 = 4096 + 128;
        let cap2 = 8192 + 128;
        let p1 = pool.allocate(PoolId::Large, 4096, cap1, &mut log).unwrap();
        let p2 = pool.allocate(PoolId::Large, 8192, cap2, &mut log).unwrap();
        // SAFETY: both are live payload pointers from distinct Large arenas.
        let h1 = unsafe { BlockHeader::header_from_payload(p1) };
        let h2 = unsafe { BlockHeader::header_from_payload(p2) };
        // p2's arena is the pool head (most recently inserted).
        let taken_head = pool.take_large_arena(h2).expect("head arena must be found");
        // SAFETY: test-owned arena, not referenced elsewhere.
        unsafe {
            ArenaHeader::destroy(taken_head);
        }
        let taken_tail = pool.take_large_arena(h1).expect("remaining arena must be found");
        // SAFETY: test-owned arena, not referenced elsewhere.
        unsafe {
            ArenaHeader::destroy(taken_tail);
        }
        assert!(pool.head().is_none());
    }
}
