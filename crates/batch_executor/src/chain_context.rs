//! Chain Context (spec.md §4.2): an immutable-ish snapshot threaded through
//! execution, apart from the associated state cache being swapped at
//! well-defined points (post-failure rollback rebuild, spec.md §4.8.b).

use crate::state_cache::TieredStateCache;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub previous_block_hash: Vec<u8>,
    pub height: i64,
    pub time: u64,
}

#[derive(Clone)]
pub struct ChainContext {
    pub previous_block_hash: Vec<u8>,
    pub previous_block_height: i64,
    pub state_cache: TieredStateCache,
}

impl ChainContext {
    pub fn new(previous_block_hash: Vec<u8>, previous_block_height: i64, state_cache: TieredStateCache) -> Self {
        Self { previous_block_hash, previous_block_height, state_cache }
    }

    /// Returns a logically new `ChainContext` bound to a different state cache.
    /// The executor relies on this to rebind after a post-failure rollback
    /// rebuild (spec.md §4.8.b).
    pub fn with_state_cache(&self, state_cache: TieredStateCache) -> Self {
        Self {
            previous_block_hash: self.previous_block_hash.clone(),
            previous_block_height: self.previous_block_height,
            state_cache,
        }
    }
}
