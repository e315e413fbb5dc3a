//! Quick-fit slab allocator.
//!
//! Pages are fixed-size slabs of slots, bump-carved into blocks. A block is one
//! header slot followed by `entries` payload slots and never spans pages. Each
//! block size `1..=max_block_entries` has its own free list, threaded through
//! the headers of released blocks. Blocks of different sizes are never merged
//! and pages are never returned.
//!
//! Layout of a page:
//!
//! ```text
//! [hdr][payload 0..n1][hdr][payload 0..n2] ... [unused tail]
//! ```
//!
//! A [`BlockRef`] is the global index of the first payload slot, so the header
//! always sits at `index - 1`.

use std::fmt;

use crate::error::{Error, Result};

// =============================================================================
// Block handles and headers
// =============================================================================

/// Handle to an allocated block: the global slot index of its first payload slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(u32);

impl BlockRef {
    #[inline]
    pub(crate) fn from_index(index: usize) -> Result<Self> {
        u32::try_from(index)
            .map(Self)
            .map_err(|_| Error::AddressSpaceExhausted)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockRef({})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockState {
    Live,
    /// Released; `next` is the following block on the same size-class list.
    Free { next: Option<BlockRef> },
}

/// Per-block bookkeeping, stored in the slot just before the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub(crate) entries: u32,
    pub(crate) state: BlockState,
}

impl BlockHeader {
    /// What a never-carved slot decodes as. Zero entries never validates.
    pub(crate) const VACANT: Self = Self {
        entries: 0,
        state: BlockState::Free { next: None },
    };

    #[inline]
    fn live(entries: usize) -> Self {
        Self {
            entries: entries as u32,
            state: BlockState::Live,
        }
    }
}

/// A fixed-size slot the allocator can hand out in runs.
///
/// Implementors must be able to store a [`BlockHeader`] in one slot and read it
/// back. Decoding a slot that was never written as a header may return any
/// header value, but must not return `BlockState::Live` unless the slot was
/// encoded from a live header.
pub(crate) trait Slot: Copy {
    fn from_header(header: BlockHeader) -> Self;
    fn to_header(self) -> BlockHeader;
}

// =============================================================================
// Allocator
// =============================================================================

/// Usage counters for the quick-fit allocator behind a map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub pages: usize,
    pub page_entries: usize,
    pub live_blocks: usize,
    pub free_blocks: usize,
    /// Bytes held by pages, including headers and abandoned page tails.
    pub reserved_bytes: usize,
}

pub(crate) struct QuickFit<T> {
    pages: Vec<Box<[T]>>,
    page_entries: usize,
    max_block_entries: usize,
    /// Upper bound on `pages.len()`, if any.
    max_pages: Option<usize>,
    /// Next unused slot in the last page.
    cursor: usize,
    /// `free[n - 1]` heads the free list of `n`-entry blocks.
    free: Vec<Option<BlockRef>>,
    live_blocks: usize,
    free_blocks: usize,
}

impl<T: Slot> QuickFit<T> {
    pub(crate) fn new(
        page_entries: usize,
        max_block_entries: usize,
        max_pages: Option<usize>,
    ) -> Result<Self> {
        if max_block_entries == 0 {
            return Err(Error::Capacity {
                requested: 0,
                max: 0,
            });
        }
        if page_entries < max_block_entries + 1 {
            return Err(Error::PageTooSmall {
                page_entries,
                max_block_entries,
            });
        }
        tracing::debug!(
            page_entries,
            max_block_entries,
            ?max_pages,
            "quick-fit allocator created"
        );
        Ok(Self {
            pages: Vec::new(),
            page_entries,
            max_block_entries,
            max_pages,
            cursor: 0,
            free: vec![None; max_block_entries],
            live_blocks: 0,
            free_blocks: 0,
        })
    }

    pub(crate) fn stats(&self) -> AllocStats {
        AllocStats {
            pages: self.pages.len(),
            page_entries: self.page_entries,
            live_blocks: self.live_blocks,
            free_blocks: self.free_blocks,
            reserved_bytes: self.pages.len() * self.page_entries * std::mem::size_of::<T>(),
        }
    }

    /// Allocate a block of exactly `entries` payload slots.
    ///
    /// Payload contents are unspecified: a recycled block still holds whatever
    /// its previous owner wrote.
    pub(crate) fn allocate(&mut self, entries: usize) -> Result<BlockRef> {
        if entries == 0 || entries > self.max_block_entries {
            return Err(Error::Capacity {
                requested: entries,
                max: self.max_block_entries,
            });
        }

        if let Some(block) = self.free[entries - 1] {
            let header = self.header(block);
            let next = match header.state {
                BlockState::Free { next } if header.entries as usize == entries => next,
                _ => return Err(Error::InvalidHandle(block)),
            };
            self.free[entries - 1] = next;
            self.set_header(block, BlockHeader::live(entries));
            self.free_blocks -= 1;
            self.live_blocks += 1;
            tracing::trace!(?block, entries, "quick-fit reuse");
            return Ok(block);
        }

        self.carve(entries)
    }

    /// Return a block to the free list of its size class.
    pub(crate) fn release(&mut self, block: BlockRef) -> Result<()> {
        let header = self.live_header(block)?;
        let class = header.entries as usize - 1;
        self.set_header(
            block,
            BlockHeader {
                entries: header.entries,
                state: BlockState::Free {
                    next: self.free[class],
                },
            },
        );
        self.free[class] = Some(block);
        self.live_blocks -= 1;
        self.free_blocks += 1;
        Ok(())
    }

    /// Number of payload slots in a live block.
    pub(crate) fn block_len(&self, block: BlockRef) -> Result<usize> {
        self.live_header(block).map(|h| h.entries as usize)
    }

    #[inline]
    pub(crate) fn slot(&self, block: BlockRef, i: usize) -> &T {
        debug_assert!(self.in_block(block, i), "slot {i} outside {block:?}");
        let (page, offset) = self.locate(block.index() + i);
        &self.pages[page][offset]
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, block: BlockRef, i: usize) -> &mut T {
        debug_assert!(self.in_block(block, i), "slot {i} outside {block:?}");
        let (page, offset) = self.locate(block.index() + i);
        &mut self.pages[page][offset]
    }

    /// Copy `count` slots from `src[src_start..]` into `dst[dst_start..]`.
    pub(crate) fn copy_slots(
        &mut self,
        src: BlockRef,
        src_start: usize,
        dst: BlockRef,
        dst_start: usize,
        count: usize,
    ) {
        for i in 0..count {
            let value = *self.slot(src, src_start + i);
            *self.slot_mut(dst, dst_start + i) = value;
        }
    }

    fn in_block(&self, block: BlockRef, i: usize) -> bool {
        self.block_len(block).is_ok_and(|len| i < len)
    }

    #[inline]
    fn locate(&self, index: usize) -> (usize, usize) {
        (index / self.page_entries, index % self.page_entries)
    }

    #[inline]
    fn header(&self, block: BlockRef) -> BlockHeader {
        let (page, offset) = self.locate(block.index() - 1);
        self.pages[page][offset].to_header()
    }

    #[inline]
    fn set_header(&mut self, block: BlockRef, header: BlockHeader) {
        let (page, offset) = self.locate(block.index() - 1);
        self.pages[page][offset] = T::from_header(header);
    }

    fn live_header(&self, block: BlockRef) -> Result<BlockHeader> {
        let (page, offset) = self.locate(block.index());
        let carved = match self.pages.len().checked_sub(1) {
            Some(last) if page < last => true,
            Some(last) if page == last => offset < self.cursor,
            _ => false,
        };
        if !carved || offset == 0 {
            return Err(Error::InvalidHandle(block));
        }

        let header = self.pages[page][offset - 1].to_header();
        let entries = header.entries as usize;
        let fits = (1..=self.max_block_entries).contains(&entries)
            && offset + entries <= self.page_entries;
        if header.state != BlockState::Live || !fits {
            return Err(Error::InvalidHandle(block));
        }
        Ok(header)
    }

    fn carve(&mut self, entries: usize) -> Result<BlockRef> {
        let needed = entries + 1;
        if self.pages.is_empty() || self.page_entries - self.cursor < needed {
            self.grow()?;
        }

        let page = self.pages.len() - 1;
        let block = BlockRef::from_index(page * self.page_entries + self.cursor + 1)?;
        self.pages[page][self.cursor] = T::from_header(BlockHeader::live(entries));
        self.cursor += needed;
        self.live_blocks += 1;
        Ok(block)
    }

    fn grow(&mut self) -> Result<()> {
        if let Some(max_pages) = self.max_pages {
            if self.pages.len() >= max_pages {
                return Err(Error::PageLimit { max_pages });
            }
        }
        let end = (self.pages.len() + 1) * self.page_entries;
        if end > u32::MAX as usize {
            return Err(Error::AddressSpaceExhausted);
        }
        let page = vec![T::from_header(BlockHeader::VACANT); self.page_entries];
        self.pages.push(page.into_boxed_slice());
        self.cursor = 0;
        tracing::debug!(pages = self.pages.len(), "quick-fit page added");
        Ok(())
    }
}

impl<T> fmt::Debug for QuickFit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuickFit")
            .field("pages", &self.pages.len())
            .field("page_entries", &self.page_entries)
            .field("max_block_entries", &self.max_block_entries)
            .field("live_blocks", &self.live_blocks)
            .field("free_blocks", &self.free_blocks)
            .finish()
    }
}
