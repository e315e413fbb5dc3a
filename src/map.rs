use std::fmt;
use std::fmt::Write as _;
use std::mem;

use crate::config::{Config, HashFn};
use crate::entry::{symbol, Bitmap, Entry, View, MAX_NODE_LEVELS};
use crate::error::Result;
use crate::quickfit::{AllocStats, BlockRef, QuickFit};
use crate::{Key, Value, CARDINALITY, HASH_BITS, SYMBOL_WIDTH};

// =============================================================================
// Trie storage
// =============================================================================

/// Allocator and root, created together by the first insertion.
pub(crate) struct Trie {
    pub(crate) alloc: QuickFit<Entry>,
    /// One-entry block holding the root entry.
    pub(crate) root: BlockRef,
}

impl Trie {
    fn plant(config: &Config, leaf: Entry) -> Result<Self> {
        let mut alloc = QuickFit::new(config.page_entries(), CARDINALITY, config.max_pages)?;
        let root = alloc.allocate(1)?;
        *alloc.slot_mut(root, 0) = leaf;
        Ok(Self { alloc, root })
    }

    #[inline]
    pub(crate) fn root_entry(&self) -> Entry {
        *self.alloc.slot(self.root, 0)
    }

    fn value_index(&self, hash: u64, key: Key) -> Option<usize> {
        let mut entry = self.root_entry();
        let mut shift = 0;
        loop {
            match entry.view(shift) {
                View::Leaf { key: k, value } => return (k == key).then_some(value),
                View::Bucket { len, base } => {
                    return self.bucket_find(base, len, key);
                }
                View::Node { bitmap, base } => {
                    let sym = symbol(hash, shift);
                    if !bitmap.contains(sym) {
                        return None;
                    }
                    entry = *self.alloc.slot(base, bitmap.index_of(sym));
                    shift += SYMBOL_WIDTH;
                }
            }
        }
    }

    fn bucket_find(&self, base: BlockRef, len: usize, key: Key) -> Option<usize> {
        (0..len).find_map(|i| match self.alloc.slot(base, i).view(HASH_BITS) {
            View::Leaf { key: k, value } if k == key => Some(value),
            _ => None,
        })
    }

    /// Insert or update. Returns the previous value when `key` was present.
    ///
    /// New blocks are fully written before the parent entry is relinked, and the
    /// replaced block is released only afterwards.
    fn insert(
        &mut self,
        hash_fn: HashFn,
        key: Key,
        value: Value,
        values: &mut Vec<Value>,
    ) -> Result<Option<Value>> {
        let hash = hash_fn(key);
        let (mut block, mut idx) = (self.root, 0usize);
        let mut shift = 0u32;

        loop {
            let entry = *self.alloc.slot(block, idx);
            match entry.view(shift) {
                View::Leaf {
                    key: existing,
                    value: slot,
                } => {
                    if existing == key {
                        return Ok(Some(mem::replace(&mut values[slot], value)));
                    }
                    let fresh = Entry::leaf(key, values.len());
                    let split = self.split(shift, entry, hash_fn(existing), fresh, hash)?;
                    *self.alloc.slot_mut(block, idx) = split;
                    values.push(value);
                    return Ok(None);
                }
                View::Bucket { len, base } => {
                    if let Some(slot) = self.bucket_find(base, len, key) {
                        return Ok(Some(mem::replace(&mut values[slot], value)));
                    }
                    let grown = self.alloc.allocate(len + 1)?;
                    self.alloc.copy_slots(base, 0, grown, 0, len);
                    *self.alloc.slot_mut(grown, len) = Entry::leaf(key, values.len());
                    *self.alloc.slot_mut(block, idx) = Entry::bucket(len + 1, grown);
                    values.push(value);
                    self.alloc.release(base)?;
                    return Ok(None);
                }
                View::Node { bitmap, base } => {
                    let sym = symbol(hash, shift);
                    let at = bitmap.index_of(sym);
                    if bitmap.contains(sym) {
                        (block, idx) = (base, at);
                        shift += SYMBOL_WIDTH;
                        continue;
                    }

                    let children = bitmap.len();
                    let grown = self.alloc.allocate(children + 1)?;
                    self.alloc.copy_slots(base, 0, grown, 0, at);
                    *self.alloc.slot_mut(grown, at) = Entry::leaf(key, values.len());
                    self.alloc.copy_slots(base, at, grown, at + 1, children - at);
                    *self.alloc.slot_mut(block, idx) = Entry::node(bitmap.with(sym), grown);
                    values.push(value);
                    self.alloc.release(base)?;
                    return Ok(None);
                }
            }
        }
    }

    /// Build the subtree replacing leaf `old` once `new` lands on it at `shift`.
    ///
    /// Shared symbols become a chain of single-child nodes ending in a
    /// two-child node at the first differing symbol, or in a two-pair bucket
    /// if the hashes never differ. Built bottom-up; the caller links the
    /// returned entry in place of `old`. On failure every block carved so far
    /// is released again.
    fn split(
        &mut self,
        shift: u32,
        old: Entry,
        old_hash: u64,
        new: Entry,
        new_hash: u64,
    ) -> Result<Entry> {
        let mut carved = Vec::with_capacity(MAX_NODE_LEVELS + 1);
        let built = self.build_split(shift, old, old_hash, new, new_hash, &mut carved);
        if built.is_err() {
            tracing::trace!(blocks = carved.len(), "leaf split rolled back");
            for block in carved {
                self.alloc.release(block)?;
            }
        }
        built
    }

    fn build_split(
        &mut self,
        mut shift: u32,
        old: Entry,
        old_hash: u64,
        new: Entry,
        new_hash: u64,
        carved: &mut Vec<BlockRef>,
    ) -> Result<Entry> {
        let mut shared = [0u32; MAX_NODE_LEVELS];
        let mut depth = 0;

        let mut entry = loop {
            if shift >= HASH_BITS {
                let base = self.alloc.allocate(2)?;
                carved.push(base);
                *self.alloc.slot_mut(base, 0) = old;
                *self.alloc.slot_mut(base, 1) = new;
                break Entry::bucket(2, base);
            }

            let (a, b) = (symbol(old_hash, shift), symbol(new_hash, shift));
            if a != b {
                // Children are ordered by symbol so popcount indexing holds.
                let (first, second) = if a < b { (old, new) } else { (new, old) };
                let base = self.alloc.allocate(2)?;
                carved.push(base);
                *self.alloc.slot_mut(base, 0) = first;
                *self.alloc.slot_mut(base, 1) = second;
                break Entry::node(Bitmap::EMPTY.with(a).with(b), base);
            }

            shared[depth] = a;
            depth += 1;
            shift += SYMBOL_WIDTH;
        };

        tracing::trace!(depth, shift, "leaf split");

        for &sym in shared[..depth].iter().rev() {
            let base = self.alloc.allocate(1)?;
            carved.push(base);
            *self.alloc.slot_mut(base, 0) = entry;
            entry = Entry::node(Bitmap::EMPTY.with(sym), base);
        }
        Ok(entry)
    }
}

// =============================================================================
// HamtMap
// =============================================================================

/// A hash array mapped trie from `i64` keys to `i64` values.
///
/// Insert, update and lookup only; keys are never removed. The allocator is
/// created by the first insertion and keeps every page it ever carves until
/// the map is dropped.
pub struct HamtMap {
    pub(crate) config: Config,
    pub(crate) trie: Option<Trie>,
    /// Value arena. Leaves hold indices into it.
    pub(crate) values: Vec<Value>,
    pub(crate) len: usize,
}

impl HamtMap {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            trie: None,
            values: Vec::new(),
            len: 0,
        }
    }

    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of distinct keys stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: Key) -> Option<&Value> {
        self.value_index(key).map(|i| &self.values[i])
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut Value> {
        let i = self.value_index(key)?;
        Some(&mut self.values[i])
    }

    pub fn contains_key(&self, key: Key) -> bool {
        self.value_index(key).is_some()
    }

    /// Insert `key` or overwrite its value, returning the value it replaced.
    ///
    /// Fails only if the allocator cannot supply a block, in which case the
    /// map is left unchanged. With a hash that maps more than
    /// [`CARDINALITY`] keys to one value the overflowing bucket reports
    /// [`Error::Capacity`](crate::Error::Capacity).
    pub fn insert(&mut self, key: Key, value: Value) -> Result<Option<Value>> {
        match self.trie.as_mut() {
            None => {
                let leaf = Entry::leaf(key, self.values.len());
                self.trie = Some(Trie::plant(&self.config, leaf)?);
                self.values.push(value);
                self.len = 1;
                Ok(None)
            }
            Some(trie) => {
                let old = trie.insert(self.config.hash, key, value, &mut self.values)?;
                if old.is_none() {
                    self.len += 1;
                }
                Ok(old)
            }
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        let mut stack = Vec::new();
        if let Some(trie) = &self.trie {
            stack.push((trie.root_entry(), 0));
        }
        Iter {
            map: self,
            stack,
            remaining: self.len,
        }
    }

    /// `None` until the first insertion creates the allocator.
    pub fn allocator_stats(&self) -> Option<AllocStats> {
        self.trie.as_ref().map(|t| t.alloc.stats())
    }

    /// Bytes reserved by allocator pages and the value arena.
    pub fn memory_usage(&self) -> usize {
        let pages = self
            .allocator_stats()
            .map_or(0, |stats| stats.reserved_bytes);
        pages + self.values.capacity() * mem::size_of::<Value>()
    }

    /// Level-order rendering of the trie, one `[L<depth>]` line per level.
    pub fn dump(&self) -> String {
        let Some(trie) = &self.trie else {
            return "<empty>".to_string();
        };

        let mut out = String::from("=== HamtMap ===");
        let mut level = vec![trie.root_entry()];
        let mut shift = 0u32;
        let mut depth = 0usize;
        while !level.is_empty() {
            let _ = write!(out, "\n[L{depth}]");
            let mut next = Vec::new();
            for entry in level {
                match entry.view(shift) {
                    View::Leaf { key, value } => {
                        let _ = write!(out, " leaf({key}={})", self.values[value]);
                    }
                    View::Node { bitmap, base } => {
                        let _ = write!(out, " node({})", bitmap.len());
                        next.extend((0..bitmap.len()).map(|i| *trie.alloc.slot(base, i)));
                    }
                    View::Bucket { len, base } => {
                        let _ = write!(out, " bucket({len})");
                        next.extend((0..len).map(|i| *trie.alloc.slot(base, i)));
                    }
                }
            }
            level = next;
            shift += SYMBOL_WIDTH;
            depth += 1;
        }
        out
    }

    fn value_index(&self, key: Key) -> Option<usize> {
        let trie = self.trie.as_ref()?;
        trie.value_index((self.config.hash)(key), key)
    }
}

impl Default for HamtMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HamtMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a HamtMap {
    type Item = (Key, &'a Value);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over `(key, &value)` in trie order: depth first, children by
/// ascending symbol, bucket pairs in insertion order.
pub struct Iter<'a> {
    map: &'a HamtMap,
    stack: Vec<(Entry, u32)>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (Key, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        let trie = self.map.trie.as_ref()?;
        while let Some((entry, shift)) = self.stack.pop() {
            match entry.view(shift) {
                View::Leaf { key, value } => {
                    self.remaining -= 1;
                    return Some((key, &self.map.values[value]));
                }
                View::Node { bitmap, base } => {
                    for i in (0..bitmap.len()).rev() {
                        self.stack
                            .push((*trie.alloc.slot(base, i), shift + SYMBOL_WIDTH));
                    }
                }
                View::Bucket { len, base } => {
                    for i in (0..len).rev() {
                        self.stack.push((*trie.alloc.slot(base, i), shift));
                    }
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}
