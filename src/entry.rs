//! The two-word trie slot and its interpretations.
//!
//! Every slot handed out by the allocator is an [`Entry`] of two `u64` words:
//!
//! | variant | `word`            | `link`                         |
//! |---------|-------------------|--------------------------------|
//! | leaf    | key bits          | value index (bit 63 clear)     |
//! | node    | presence bitmap   | bit 63 \| child block index    |
//! | bucket  | pair count        | bit 63 \| pair block index     |
//! | header  | block entry count | live marker or free-list link  |
//!
//! Bit 63 of `link` separates leaves from linked entries. Whether a linked entry
//! is a node or a bucket depends only on how many hash bits the walk has
//! consumed, so [`Entry::view`] takes the current shift.

use std::fmt;

use crate::quickfit::{BlockHeader, BlockRef, BlockState, Slot};
use crate::{Key, CARDINALITY, HASH_BITS, SYMBOL_WIDTH};

const LINK_TAG: u64 = 1 << 63;
const INDEX_MASK: u64 = !LINK_TAG;
/// `link` of a live block header. Unreachable for leaves and linked entries.
const HEADER_LIVE: u64 = u64::MAX;

const SYMBOL_MASK: u64 = CARDINALITY as u64 - 1;

/// Number of node levels before the hash is exhausted and buckets take over.
pub(crate) const MAX_NODE_LEVELS: usize = (HASH_BITS as usize).div_ceil(SYMBOL_WIDTH as usize);

/// Symbol selecting the child at the level reached after `shift` bits.
#[inline]
pub(crate) fn symbol(hash: u64, shift: u32) -> u32 {
    debug_assert!(shift < HASH_BITS);
    ((hash >> shift) & SYMBOL_MASK) as u32
}

/// Presence mask over the symbol alphabet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bitmap(u64);

impl Bitmap {
    pub(crate) const EMPTY: Self = Self(0);

    #[inline]
    pub(crate) fn with(self, symbol: u32) -> Self {
        debug_assert!((symbol as usize) < CARDINALITY);
        Self(self.0 | (1 << symbol))
    }

    #[inline]
    pub(crate) fn contains(self, symbol: u32) -> bool {
        self.0 & (1 << symbol) != 0
    }

    /// Compacted child index of `symbol`: the number of set bits below it.
    #[inline]
    pub(crate) fn index_of(self, symbol: u32) -> usize {
        (self.0 & ((1u64 << symbol) - 1)).count_ones() as usize
    }

    #[inline]
    pub(crate) fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Set symbols in ascending order.
    #[cfg(test)]
    pub(crate) fn symbols(self) -> impl Iterator<Item = u32> {
        let mut rest = self.0;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let sym = rest.trailing_zeros();
            rest &= rest - 1;
            Some(sym)
        })
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({:#034b})", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    word: u64,
    link: u64,
}

/// An [`Entry`] decoded for a given trie depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum View {
    Leaf { key: Key, value: usize },
    Node { bitmap: Bitmap, base: BlockRef },
    Bucket { len: usize, base: BlockRef },
}

impl Entry {
    #[inline]
    pub(crate) fn leaf(key: Key, value: usize) -> Self {
        debug_assert!((value as u64) & LINK_TAG == 0);
        Self {
            word: key as u64,
            link: value as u64,
        }
    }

    #[inline]
    pub(crate) fn node(bitmap: Bitmap, base: BlockRef) -> Self {
        Self {
            word: bitmap.0,
            link: LINK_TAG | base.index() as u64,
        }
    }

    #[inline]
    pub(crate) fn bucket(len: usize, base: BlockRef) -> Self {
        Self {
            word: len as u64,
            link: LINK_TAG | base.index() as u64,
        }
    }

    #[inline]
    pub(crate) fn is_leaf(self) -> bool {
        self.link & LINK_TAG == 0
    }

    /// Decode this entry as seen after `shift` hash bits have been consumed.
    ///
    /// Linked entries at `shift >= HASH_BITS` are buckets; above that they are
    /// nodes. Must not be called on a block header.
    #[inline]
    pub(crate) fn view(self, shift: u32) -> View {
        debug_assert_ne!(self.link, HEADER_LIVE, "block header reached during traversal");
        if self.is_leaf() {
            return View::Leaf {
                key: self.word as Key,
                value: self.link as usize,
            };
        }
        let base = BlockRef::from_index((self.link & INDEX_MASK) as usize)
            .unwrap_or_else(|_| panic!("corrupt link {:#x}", self.link));
        if shift >= HASH_BITS {
            View::Bucket {
                len: self.word as usize,
                base,
            }
        } else {
            View::Node {
                bitmap: Bitmap(self.word),
                base,
            }
        }
    }
}

impl Slot for Entry {
    #[inline]
    fn from_header(header: BlockHeader) -> Self {
        let link = match header.state {
            BlockState::Live => HEADER_LIVE,
            BlockState::Free { next } => LINK_TAG | next.map_or(0, |b| b.index() as u64 + 1),
        };
        Self {
            word: u64::from(header.entries),
            link,
        }
    }

    #[inline]
    fn to_header(self) -> BlockHeader {
        let entries = u32::try_from(self.word).unwrap_or(0);
        if self.link == HEADER_LIVE {
            return BlockHeader {
                entries,
                state: BlockState::Live,
            };
        }
        if self.is_leaf() {
            return BlockHeader::VACANT;
        }
        let next = match self.link & INDEX_MASK {
            0 => None,
            n => BlockRef::from_index(n as usize - 1).ok(),
        };
        BlockHeader {
            entries,
            state: BlockState::Free { next },
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leaf() {
            write!(f, "Leaf({} -> #{})", self.word as Key, self.link)
        } else {
            write!(f, "Linked({:#x}, {:#x})", self.word, self.link)
        }
    }
}
