//! # compact-hamt
//!
//! A compact hash array mapped trie for `i64` keys, backed by a quick-fit slab
//! allocator.
//!
//! Every trie slot is a fixed two-word entry carved out of
//! allocator pages. Nodes hold a 32-symbol presence bitmap and a handle to a
//! hole-free child block; when a node grows, a block one entry larger is taken
//! from the allocator, filled, swapped in, and the old block goes back on the
//! free list of its size class. Once all 64 hash bits are consumed, colliding
//! keys share a linear-scan bucket.
//!
//! ## Example
//!
//! ```rust
//! use compact_hamt::HamtMap;
//!
//! let mut map = HamtMap::new();
//! map.insert(5, 100).unwrap();
//! map.insert(5, 200).unwrap();
//! map.insert(-7, 1).unwrap();
//!
//! assert_eq!(map.len(), 2);
//! assert_eq!(map.get(5), Some(&200));
//! assert_eq!(map.get(6), None);
//! ```

#![forbid(unsafe_code)]

mod config;
mod entry;
mod error;
mod map;
mod quickfit;

pub use config::{Config, HashFn, DEFAULT_PAGE_BYTES};
pub use error::{Error, Result};
pub use map::{HamtMap, Iter};
pub use quickfit::{AllocStats, BlockRef};

pub type Key = i64;
pub type Value = i64;

/// Bits of hash consumed per trie level.
pub const SYMBOL_WIDTH: u32 = 5;
/// Distinct symbols per level; also the largest node and allocator block.
pub const CARDINALITY: usize = 1 << SYMBOL_WIDTH;
/// Hash width. Walks that reach this shift switch to buckets.
pub const HASH_BITS: u32 = 64;

/// Default key transform: flip the sign bit.
///
/// A bijection, so the trie shape follows the key distribution directly and
/// two distinct keys never fully collide.
#[inline]
pub fn sign_flip(key: Key) -> u64 {
    (key as u64) ^ (1 << 63)
}

#[cfg(test)]
mod proptests;
