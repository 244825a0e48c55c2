//! In-process page provider.
//!
//! The heap lives in one growable byte buffer. Address `base + i` names
//! byte `i` of the buffer, so addresses stay stable across growth even when
//! the buffer reallocates.

use crate::config::{ArenaConfig, ConfigError};
use crate::page::{GrowError, PageProvider};

/// Growable byte arena handing out fixed-size pages.
#[derive(Debug, Clone)]
pub struct PageArena {
    config: ArenaConfig,
    bytes: Vec<u8>,
}

impl PageArena {
    /// Creates an empty arena; no page is handed out until [`grow`](PageProvider::grow).
    pub fn new(config: ArenaConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            bytes: Vec::new(),
        })
    }

    /// Creates an empty arena with the process-wide configuration.
    #[must_use]
    pub fn from_env() -> Self {
        // `arena_config()` only yields validated geometry.
        Self {
            config: crate::config::arena_config(),
            bytes: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Pages handed out so far.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.bytes.len() / self.config.page_size
    }

    /// Largest heap this arena will grow to.
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.config.max_bytes()
    }
}

impl Default for PageArena {
    fn default() -> Self {
        Self {
            config: ArenaConfig::default(),
            bytes: Vec::new(),
        }
    }
}

impl PageProvider for PageArena {
    fn heap_start(&self) -> usize {
        self.config.base
    }

    fn heap_end(&self) -> usize {
        self.config.base + self.bytes.len()
    }

    fn page_size(&self) -> usize {
        self.config.page_size
    }

    fn grow(&mut self) -> Result<usize, GrowError> {
        if self.page_count() >= self.config.max_pages {
            return Err(GrowError::LimitReached {
                max_bytes: self.max_bytes(),
            });
        }
        let old_end = self.heap_end();
        let new_len = self
            .bytes
            .len()
            .checked_add(self.config.page_size)
            .ok_or(GrowError::AddressOverflow)?;
        old_end
            .checked_add(self.config.page_size)
            .ok_or(GrowError::AddressOverflow)?;
        self.bytes.resize(new_len, 0);
        Ok(old_end)
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_geometry() {
        let config = ArenaConfig::default().with_max_pages(0);
        assert_eq!(PageArena::new(config).unwrap_err(), ConfigError::NoPages);
    }

    #[test]
    fn grow_returns_previous_end() {
        let mut arena = PageArena::new(ArenaConfig::default()).unwrap();
        let start = arena.heap_start();
        assert_eq!(arena.grow().unwrap(), start);
        assert_eq!(arena.grow().unwrap(), start + 4096);
        assert_eq!(arena.heap_end(), start + 8192);
        assert_eq!(arena.page_count(), 2);
        assert_eq!(arena.bytes().len(), 8192);
    }

    #[test]
    fn grow_stops_at_limit() {
        let mut arena = PageArena::new(ArenaConfig::default().with_max_pages(2)).unwrap();
        arena.grow().unwrap();
        arena.grow().unwrap();
        assert_eq!(
            arena.grow(),
            Err(GrowError::LimitReached { max_bytes: 8192 })
        );
        assert_eq!(arena.page_count(), 2);
    }

    #[test]
    fn contents_survive_growth() {
        let mut arena = PageArena::new(ArenaConfig::default()).unwrap();
        let first = arena.grow().unwrap();
        arena.store_u64(first + 64, 0xDEAD_BEEF_CAFE_F00D);
        arena.grow().unwrap();
        assert_eq!(arena.load_u64(first + 64), 0xDEAD_BEEF_CAFE_F00D);
    }

    #[test]
    fn grow_detects_address_overflow() {
        let config = ArenaConfig {
            base: usize::MAX - 0xFFF,
            page_size: 4096,
            max_pages: 4,
        };
        let mut arena = PageArena::new(config).unwrap();
        assert_eq!(arena.grow(), Err(GrowError::AddressOverflow));
        assert!(arena.is_empty());
    }

    #[test]
    fn default_matches_default_config() {
        let arena = PageArena::default();
        assert_eq!(arena.config(), &ArenaConfig::default());
        assert_eq!(arena.page_size(), 4096);
        assert_eq!(arena.max_bytes(), 4096 * 1024);
    }
}
