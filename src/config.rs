use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::{sign_flip, Key, CARDINALITY};

/// Default allocator page size in bytes.
pub const DEFAULT_PAGE_BYTES: usize = 4096;

/// Key-to-hash transform used to pick symbols.
pub type HashFn = fn(Key) -> u64;

/// Configuration for a [`HamtMap`](crate::HamtMap).
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Size of each allocator page. Must hold a block header plus
    /// [`CARDINALITY`] entries.
    pub page_bytes: usize,
    /// Cap on allocator pages. Insertions that need another page fail with
    /// [`Error::PageLimit`] and leave the map unchanged.
    pub max_pages: Option<usize>,
    /// Hash applied to every key. Distinct keys with equal hashes end up in a
    /// bucket once all 64 bits are consumed.
    pub hash: HashFn,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_bytes: DEFAULT_PAGE_BYTES,
            max_pages: None,
            hash: sign_flip,
        }
    }
}

impl Config {
    #[inline]
    pub fn page_entries(&self) -> usize {
        self.page_bytes / std::mem::size_of::<Entry>()
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_entries() < CARDINALITY + 1 {
            return Err(Error::PageTooSmall {
                page_entries: self.page_entries(),
                max_block_entries: CARDINALITY,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_page() {
        let config = Config::default();
        assert_eq!(config.page_entries(), 256);
        assert_eq!(config.max_pages, None);
        assert!(config.validate().is_ok());
        assert_eq!((config.hash)(0), 1 << 63);
    }

    #[test]
    fn test_page_too_small() {
        let config = Config {
            page_bytes: 32 * 16,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(Error::PageTooSmall {
                page_entries: 32,
                max_block_entries: CARDINALITY
            })
        );
        let smallest = Config {
            page_bytes: 33 * 16,
            ..Config::default()
        };
        assert!(smallest.validate().is_ok());
    }
}
