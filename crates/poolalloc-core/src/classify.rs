//! Mapping a request size to one of the three pools and an arena capacity.

use crate::arena::ArenaHeader;
use crate::block::BlockHeader;
use crate::host;

/// Exactly 128 bytes and below.
pub const TINY_THRESHOLD: usize = 128;
/// Exactly 2048 bytes and below (and above [`TINY_THRESHOLD`]).
pub const SMALL_THRESHOLD: usize = 2048;

/// Which of the three pools a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolId {
    Tiny,
    Small,
    Large,
}

impl PoolId {
    /// The pool's fixed label in the introspection dump.
    pub fn label(self) -> &'static str {
        match self {
            PoolId::Tiny => "TINY",
            PoolId::Small => "SMALL",
            PoolId::Large => "LARGE",
        }
    }
}

/// Classifies a raw (pre-alignment) request size and returns the pool it
/// belongs to along with that pool's fixed arena capacity.
///
/// `n == 0` is never reached in practice — `allocate` short-circuits before
/// classification — so this function resolves it to Tiny's pool id and
/// capacity without it being an externally observable branch.
pub fn classify(n: usize, aligned: usize) -> (PoolId, usize) {
    if n <= TINY_THRESHOLD {
        (PoolId::Tiny, 8 * host::page_size())
    } else if n <= SMALL_THRESHOLD {
        (PoolId::Small, 52 * host::page_size())
    } else {
        let capacity = aligned
            + std::mem::size_of::<BlockHeader>()
            + std::mem::size_of::<ArenaHeader>();
        (PoolId::Large, capacity)
    }
}
