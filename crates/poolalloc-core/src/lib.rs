//! # poolalloc-core
//!
//! A size-segregated pool allocator: Tiny/Small/Large request classification,
//! mmap-backed arenas carrying an intrusive singly-linked chain of block
//! headers, and the single global lock that makes allocate/free/reallocate
//! safe under arbitrary multi-threaded load.
//!
//! Pointer-to-metadata resolution happens by linear scan rather than a side
//! table: a payload pointer is walked back to its `BlockHeader` by subtracting
//! the header size, then confirmed by scanning the owning pool's arena
//! chains. This keeps the design's invariants self-contained in the mapped
//! memory itself.

#![allow(unsafe_code)]

pub mod align;
pub mod allocator;
pub mod arena;
pub mod block;
pub mod classify;
pub mod host;
pub mod log;
pub mod pool;

pub use allocator::Allocator;
pub use classify::PoolId;
pub use host::HostMapError;
pub use log::{LifecycleLevel, LifecycleRecord};
