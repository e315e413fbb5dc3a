use thiserror::Error;

use crate::quickfit::BlockRef;

/// Errors surfaced by the allocator and, through it, by map insertion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A block was requested with an entry count outside `1..=max`.
    #[error("block of {requested} entries is outside the supported range 1..={max}")]
    Capacity { requested: usize, max: usize },
    /// A handle passed to `release`, or found at the head of a free list,
    /// does not name a block in the expected state.
    #[error("{0:?} does not refer to a block in the expected state")]
    InvalidHandle(BlockRef),
    /// The page cannot hold a header plus a maximum-size block.
    #[error("page of {page_entries} slots cannot hold a block of {max_block_entries} entries")]
    PageTooSmall {
        page_entries: usize,
        max_block_entries: usize,
    },
    /// Growing would exceed the configured page count.
    #[error("allocator page limit of {max_pages} reached")]
    PageLimit { max_pages: usize },
    /// Block handles are 32-bit slot indices and the index space is used up.
    #[error("allocator slot index space exhausted")]
    AddressSpaceExhausted,
}

pub type Result<T> = std::result::Result<T, Error>;
