//! The allocator core: owns the three pools and the global lock.

use std::io::{self, Write};
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::align::align;
use crate::arena::ArenaHeader;
use crate::block::BlockHeader;
use crate::classify::{classify, PoolId};
use crate::log::{LifecycleLevel, LifecycleLog, LifecycleRecord};
use crate::pool::Pool;

/// The three pool heads plus the structured lifecycle log, all guarded by
/// one lock.
struct AllocatorState {
    tiny: Pool,
    small: Pool,
    large: Pool,
    log: LifecycleLog,
}

impl AllocatorState {
    const fn new() -> Self {
        Self {
            tiny: Pool::new(),
            small: Pool::new(),
            large: Pool::new(),
            log: LifecycleLog::new(),
        }
    }

    /// Borrows the pool for `id` and the lifecycle log as two disjoint
    /// mutable borrows of distinct fields, so callers can pass the log into
    /// a pool method without the borrow checker seeing a conflict.
    fn pool_and_log_mut(&mut self, id: PoolId) -> (&mut Pool, &mut LifecycleLog) {
        let pool = match id {
            PoolId::Tiny => &mut self.tiny,
            PoolId::Small => &mut self.small,
            PoolId::Large => &mut self.large,
        };
        (pool, &mut self.log)
    }

    fn pool(&self, id: PoolId) -> &Pool {
        match id {
            PoolId::Tiny => &self.tiny,
            PoolId::Small => &self.small,
            PoolId::Large => &self.large,
        }
    }
}

/// A size-segregated pool allocator.
///
/// Intended usage is as a single `static` per process (see [`Allocator::new`]
/// for why a `const fn` constructor is load-bearing here), but nothing
/// prevents instantiating more than one for testing or embedding.
pub struct Allocator {
    state: Mutex<AllocatorState>,
}

// SAFETY: every pointer `Allocator` ever touches lives behind `state`'s
// mutex; no raw link is read or written without holding it, so sharing an
// `Allocator` across threads is sound even though its internals are built
// from raw pointers.
unsafe impl Send for Allocator {}
// SAFETY: see `Send` above — the mutex is the sole access path.
unsafe impl Sync for Allocator {}

impl Allocator {
    /// Builds an allocator with empty pools. `const fn` so a process-wide
    /// singleton can be a plain `static`, initialized at load time rather
    /// than lazily — `parking_lot::Mutex::new` is itself `const`.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(AllocatorState::new()),
        }
    }

    /// `allocate(n)` (§4.E.1): classify, align, delegate to the pool.
    pub fn allocate(&self, n: usize) -> Option<NonNull<u8>> {
        if n == 0 {
            return None;
        }
        let mut state = self.state.lock();
        allocate_locked(&mut state, n)
    }

    /// `callocate(count, size)` (§4.E.4): overflow-checked `count * size`,
    /// allocated under one lock hold, then explicitly zeroed.
    pub fn callocate(&self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        if total == 0 {
            return None;
        }
        let mut state = self.state.lock();
        let ptr = allocate_locked(&mut state, total)?;
        // SAFETY: `allocate_locked` guarantees at least `total` writable
        // bytes at `ptr`, still exclusively held behind `state`.
        unsafe {
            ptr.as_ptr().write_bytes(0, total);
        }
        Some(ptr)
    }

    /// `free(ptr)` (§4.E.2): resolve by linear scan, Tiny then Small then
    /// Large; no-op on an unrecognized pointer.
    pub fn free(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };
        let mut state = self.state.lock();
        free_locked(&mut state, ptr);
    }

    /// `reallocate(ptr, n)` (§4.E.3).
    ///
    /// Holds the lock for the whole operation rather than calling the public
    /// `allocate`/`free` (which would try to re-lock the same non-reentrant
    /// mutex): resolving the old size, growing into a new block, copying the
    /// live bytes, and retiring the old block all happen under one critical
    /// section, so no other thread can observe or reclaim `ptr` in between.
    pub fn reallocate(&self, ptr: Option<NonNull<u8>>, n: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            if n == 0 {
                return None;
            }
            let mut state = self.state.lock();
            return allocate_locked(&mut state, n);
        };
        let mut state = self.state.lock();

        if n == 0 {
            free_locked(&mut state, ptr);
            return None;
        }

        // SAFETY: resolving the header is a pure address computation; it is
        // only dereferenced by `find`/`find_large`, which validate the
        // address against a live chain before reading it.
        let candidate = unsafe { BlockHeader::header_from_payload(ptr) };
        let old_size = state
            .pool(PoolId::Tiny)
            .find(candidate)
            .or_else(|| state.pool(PoolId::Small).find(candidate))
            .map(|header| {
                // SAFETY: `find` only returns headers it confirmed live
                // inside one of this allocator's own arenas.
                unsafe { header.as_ref().size }
            })
            .or_else(|| {
                state
                    .pool(PoolId::Large)
                    .find_large(candidate)
                    .map(|_| {
                        // SAFETY: `find_large` confirmed `candidate` is a
                        // live Large block header.
                        unsafe { candidate.as_ref().size }
                    })
            });

        let Some(old_size) = old_size else {
            // Unknown pointer: must not dereference, must not free, must
            // return null (§4.E.3, scenario d).
            state.log.record(
                LifecycleLevel::Warn,
                "reallocate",
                "unknown_pointer",
                Some(ptr.as_ptr() as usize),
                Some(n),
                None,
                "noop",
                "pointer not owned by any pool",
            );
            return None;
        };

        let Some(aligned) = align(n) else {
            return None;
        };
        if aligned <= old_size {
            return Some(ptr);
        }

        let new_ptr = allocate_locked(&mut state, n)?;
        // SAFETY: `ptr` is a live payload of at least `old_size` bytes and
        // `new_ptr` is a freshly allocated, disjoint buffer of at least
        // `min(old_size, n)` bytes; `old_size < align(n) <= new block size`
        // so the copy length never exceeds either buffer.
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                new_ptr.as_ptr(),
                old_size.min(n),
            );
        }
        free_locked(&mut state, ptr);
        Some(new_ptr)
    }

    /// `show_alloc_mem()` (§4.F): writes the stable dump format to `sink`.
    pub fn dump_to<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        let state = self.state.lock();
        let mut total = 0usize;
        for (label, pool) in [
            ("TINY", &state.tiny),
            ("SMALL", &state.small),
            ("LARGE", &state.large),
        ] {
            let head_addr = pool
                .head()
                .map(|h| h.as_ptr() as usize)
                .unwrap_or(0);
            writeln!(sink, "{label} : {head_addr:#x}")?;
            total += dump_pool_blocks(pool, sink)?;
        }
        writeln!(sink, "Total : {total} bytes")
    }

    /// Drains every lifecycle record recorded so far.
    pub fn drain_lifecycle_logs(&self) -> Vec<LifecycleRecord> {
        self.state.lock().log.drain()
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "global-alloc")]
unsafe impl std::alloc::GlobalAlloc for Allocator {
    unsafe fn alloc(&self, layout: std::alloc::Layout) -> *mut u8 {
        self.allocate(layout.size())
            .map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: std::alloc::Layout) {
        self.free(NonNull::new(ptr));
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: std::alloc::Layout, new_size: usize) -> *mut u8 {
        self.reallocate(NonNull::new(ptr), new_size)
            .map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }
}

/// Core of `allocate`, operating on an already-locked [`AllocatorState`].
/// Never calls back into a public `Allocator` method, so it is safe to
/// invoke from other locked contexts such as `reallocate`.
fn allocate_locked(state: &mut AllocatorState, n: usize) -> Option<NonNull<u8>> {
    let Some(aligned) = align(n) else {
        state.log.record(
            LifecycleLevel::Warn,
            "allocate",
            "overflow",
            None,
            Some(n),
            None,
            "denied",
            "align(n) would overflow",
        );
        return None;
    };
    let (pool_id, capacity) = classify(n, aligned);
    let result = {
        let (pool, log) = state.pool_and_log_mut(pool_id);
        pool.allocate(pool_id, aligned, capacity, log)
    };
    match result {
        Ok(ptr) => {
            state.log.record(
                LifecycleLevel::Trace,
                "allocate",
                "alloc",
                Some(ptr.as_ptr() as usize),
                Some(n),
                Some(pool_id),
                "success",
                format!("aligned={aligned}"),
            );
            Some(ptr)
        }
        Err(err) => {
            state.log.record(
                LifecycleLevel::Error,
                "allocate",
                "alloc",
                None,
                Some(n),
                Some(pool_id),
                "oom",
                format!("{err}"),
            );
            None
        }
    }
}

/// Core of `free`, operating on an already-locked [`AllocatorState`]. See
/// [`allocate_locked`] for why this never re-enters a public method.
fn free_locked(state: &mut AllocatorState, ptr: NonNull<u8>) {
    // SAFETY: if `ptr` was issued by this allocator, the header immediately
    // precedes it; if it wasn't, `candidate` is never dereferenced below
    // except through address comparison inside `mark_free`/
    // `take_large_arena`, both of which only compare addresses already
    // present in a live chain before touching memory.
    let candidate = unsafe { BlockHeader::header_from_payload(ptr) };

    if state.tiny.mark_free(candidate) {
        log_free(&mut state.log, ptr, PoolId::Tiny, "success");
        return;
    }
    if state.small.mark_free(candidate) {
        log_free(&mut state.log, ptr, PoolId::Small, "success");
        return;
    }
    if let Some(arena) = state.large.take_large_arena(candidate) {
        // SAFETY: `arena` was just unlinked from the large pool and is not
        // reachable from anywhere else.
        unsafe {
            ArenaHeader::destroy(arena);
        }
        log_free(&mut state.log, ptr, PoolId::Large, "success_unmapped");
        return;
    }
    log_free(&mut state.log, ptr, PoolId::Large, "unknown_pointer_noop");
}

fn log_free(log: &mut LifecycleLog, ptr: NonNull<u8>, pool: PoolId, outcome: &'static str) {
    log.record(
        LifecycleLevel::Trace,
        "free",
        "free",
        Some(ptr.as_ptr() as usize),
        None,
        Some(pool),
        outcome,
        "",
    );
}

fn dump_pool_blocks<W: Write>(pool: &Pool, sink: &mut W) -> io::Result<usize> {
    let mut subtotal = 0usize;
    let mut cursor = pool.head();
    while let Some(arena) = cursor {
        // SAFETY: `arena` is a live member of `pool`'s chain.
        let mut block_cursor = unsafe { arena.as_ref().blocks };
        while let Some(block) = block_cursor {
            // SAFETY: `block` is a live header inside `arena`.
            let (is_free, size, next) = unsafe {
                let b = block.as_ref();
                (b.is_free, b.size, b.next)
            };
            if !is_free {
                // SAFETY: `block` is a live, in-use header.
                let payload_start = unsafe { BlockHeader::payload_ptr(block).as_ptr() as usize };
                let payload_end = payload_start + size;
                writeln!(sink, "{payload_start:#x} - {payload_end:#x} : {size} bytes")?;
                subtotal += size;
            }
            block_cursor = next;
        }
        // SAFETY: `arena` is a live member of `pool`'s chain.
        cursor = unsafe { arena.as_ref().next };
    }
    Ok(subtotal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_allocate_returns_none() {
        let alloc = Allocator::new();
        assert!(alloc.allocate(0).is_none());
    }

    #[test]
    fn free_null_is_a_noop() {
        let alloc = Allocator::new();
        alloc.free(None);
        alloc.free(None);
    }

    #[test]
    fn classifier_boundaries_select_the_right_pool() {
        let alloc = Allocator::new();
        let tiny = alloc.allocate(128).unwrap();
        let small_low = alloc.allocate(129).unwrap();
        let small_high = alloc.allocate(2048).unwrap();
        let large = alloc.allocate(2049).unwrap();

        let state = alloc.state.lock();
        assert!(state.tiny.find(unsafe { BlockHeader::header_from_payload(tiny) }).is_some());
        assert!(state.small.find(unsafe { BlockHeader::header_from_payload(small_low) }).is_some());
        assert!(state.small.find(unsafe { BlockHeader::header_from_payload(small_high) }).is_some());
        assert!(state.large.find_large(unsafe { BlockHeader::header_from_payload(large) }).is_some());
    }

    #[test]
    fn tiny_churn_returns_pool_to_zero_live_bytes() {
        let alloc = Allocator::new();
        for _ in 0..1024 {
            let p = alloc.allocate(1024).unwrap();
            // SAFETY: freshly allocated, at least 1024 writable bytes.
            unsafe {
                p.as_ptr().write(42);
            }
            alloc.free(Some(p));
        }
        let mut dump = Vec::new();
        alloc.dump_to(&mut dump).unwrap();
        let text = String::from_utf8(dump).unwrap();
        let small_section = text
            .split("SMALL :")
            .nth(1)
            .unwrap()
            .split("LARGE :")
            .next()
            .unwrap();
        assert_eq!(small_section.lines().count(), 0);
    }

    #[test]
    fn tiny_saturation_allocates_distinct_nonoverlapping_blocks() {
        let alloc = Allocator::new();
        let mut ptrs = Vec::new();
        for _ in 0..1024 {
            ptrs.push(alloc.allocate(1024).unwrap().as_ptr() as usize);
        }
        let mut sorted = ptrs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ptrs.len());
    }

    #[test]
    fn large_realloc_grow_unmaps_the_old_arena() {
        let alloc = Allocator::new();
        let p = alloc.allocate(16 << 20).unwrap();
        let grown = alloc.reallocate(Some(p), 128 << 20).unwrap();
        assert_ne!(grown.as_ptr(), p.as_ptr());
        // SAFETY: `grown` is a live 128 MiB payload.
        unsafe {
            grown.as_ptr().add((127usize << 20) as usize).write(7);
        }
    }

    #[test]
    fn bad_free_and_bad_realloc_are_silent_noops() {
        let alloc = Allocator::new();
        let p = alloc.allocate(16).unwrap();
        // SAFETY: offsetting within the 16-byte payload, never dereferenced
        // as a `BlockHeader` by the allocator except through address
        // comparison inside `free`/`reallocate`.
        let bad = unsafe { NonNull::new_unchecked(p.as_ptr().add(5)) };
        alloc.free(Some(bad));
        assert!(alloc.reallocate(Some(bad), 10).is_none());

        let mut dump = Vec::new();
        alloc.dump_to(&mut dump).unwrap();
        let text = String::from_utf8(dump).unwrap();
        assert!(text.contains("16 bytes"));
    }

    #[test]
    fn reallocate_null_behaves_as_allocate() {
        let alloc = Allocator::new();
        assert!(alloc.reallocate(None, 64).is_some());
    }

    #[test]
    fn reallocate_to_zero_frees_and_returns_none() {
        let alloc = Allocator::new();
        let p = alloc.allocate(64).unwrap();
        assert!(alloc.reallocate(Some(p), 0).is_none());
    }

    #[test]
    fn callocate_zeroes_reused_memory() {
        let alloc = Allocator::new();
        let p = alloc.callocate(16, 1).unwrap();
        // SAFETY: freshly zeroed 16-byte payload.
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 16) };
        assert!(bytes.iter().all(|&b| b == 0));
        alloc.free(Some(p));

        // SAFETY: writing into a still-live payload before freeing it.
        unsafe {
            p.as_ptr().write_bytes(0xAA, 16);
        }
        let q = alloc.callocate(16, 1).unwrap();
        // SAFETY: freshly zeroed 16-byte payload (may be the reused block).
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), 16) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn calloc_overflow_returns_none() {
        let alloc = Allocator::new();
        assert!(alloc.callocate(usize::MAX, 2).is_none());
    }

    #[test]
    fn deterministic_stress_trace_preserves_invariants() {
        fn lcg(state: &mut u64) -> u64 {
            *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            *state
        }

        let alloc = Allocator::new();
        let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();
        let mut rng = 0xA5A5_5A5A_DEAD_BEEFu64;

        for _ in 0..1500 {
            let r = lcg(&mut rng);
            match r % 3 {
                0 => {
                    let size = ((r >> 8) as usize % (256 * 1024)).max(1);
                    if let Some(ptr) = alloc.allocate(size) {
                        live.push((ptr, size));
                    }
                }
                1 if !live.is_empty() => {
                    let idx = (r as usize) % live.len();
                    let (ptr, _) = live.swap_remove(idx);
                    alloc.free(Some(ptr));
                }
                2 if !live.is_empty() => {
                    let idx = (r as usize) % live.len();
                    let (ptr, _) = live[idx];
                    let new_size = ((r >> 16) as usize % (256 * 1024)).max(1);
                    if let Some(new_ptr) = alloc.reallocate(Some(ptr), new_size) {
                        live[idx] = (new_ptr, new_size);
                    }
                }
                _ => {}
            }
        }

        let mut addrs: Vec<usize> = live.iter().map(|(p, _)| p.as_ptr() as usize).collect();
        addrs.sort_unstable();
        let before = addrs.len();
        addrs.dedup();
        assert_eq!(addrs.len(), before, "no two live pointers may share an address");

        for (ptr, _) in live {
            alloc.free(Some(ptr));
        }
    }
}
