//! Runtime configuration.
//!
//! Read from the environment on first use and cached thereafter:
//! - `TAGHEAP_PAGE_SIZE`: bytes added per heap growth (default 4096)
//! - `TAGHEAP_MAX_PAGES`: growth limit of the page arena (default 1024)
//! - `TAGHEAP_QUICK_LISTS`: number of quick-cache size classes (default 10)
//! - `TAGHEAP_QUICK_DEPTH`: entries a quick cache holds before it is flushed (default 5)
//! - `TAGHEAP_FATAL`: reaction to a heap-invariant violation, `abort` (default) or `panic`
//! - `TAGHEAP_LOG`: `on` (default) or `off` for allocator lifecycle records
//!
//! Unparseable values fall back to the defaults; an arena geometry that fails
//! [`ArenaConfig::validate`] falls back to [`ArenaConfig::default`].

use std::sync::OnceLock;

use thiserror::Error;

/// Alignment every page size and arena base must honour.
pub const PAGE_ALIGNMENT: usize = 16;

/// Smallest page that can hold the heap sentinels plus one free block.
pub const MIN_PAGE_SIZE: usize = 128;

/// Rejected arena geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("page size {0} is not a multiple of 16")]
    MisalignedPageSize(usize),
    #[error("page size {0} is below the minimum of 128")]
    PageTooSmall(usize),
    #[error("arena base {0:#x} must be non-zero and 16-byte aligned")]
    BadBase(usize),
    #[error("arena must allow at least one page")]
    NoPages,
}

/// Geometry of a [`PageArena`](crate::arena::PageArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Address of the first heap byte. Never zero, so zero can mean null.
    pub base: usize,
    /// Bytes added by each growth step.
    pub page_size: usize,
    /// Growth limit; the heap never exceeds `page_size * max_pages` bytes.
    pub max_pages: usize,
}

impl ArenaConfig {
    pub const DEFAULT_BASE: usize = 0x1000;
    pub const DEFAULT_PAGE_SIZE: usize = 4096;
    pub const DEFAULT_MAX_PAGES: usize = 1024;

    /// Returns a copy limited to `max_pages` pages.
    #[must_use]
    pub const fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Returns a copy with a different page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Largest heap this geometry allows, in bytes.
    #[must_use]
    pub const fn max_bytes(&self) -> usize {
        self.page_size.saturating_mul(self.max_pages)
    }

    /// Checks that the geometry can host a heap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base == 0 || self.base % PAGE_ALIGNMENT != 0 {
            return Err(ConfigError::BadBase(self.base));
        }
        if self.page_size % PAGE_ALIGNMENT != 0 {
            return Err(ConfigError::MisalignedPageSize(self.page_size));
        }
        if self.page_size < MIN_PAGE_SIZE {
            return Err(ConfigError::PageTooSmall(self.page_size));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::NoPages);
        }
        Ok(())
    }

    /// Builds a geometry from a variable lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(page_size) = parse_usize(lookup("TAGHEAP_PAGE_SIZE")) {
            config.page_size = page_size;
        }
        if let Some(max_pages) = parse_usize(lookup("TAGHEAP_MAX_PAGES")) {
            config.max_pages = max_pages;
        }
        if config.validate().is_err() {
            return Self::default();
        }
        config
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            base: Self::DEFAULT_BASE,
            page_size: Self::DEFAULT_PAGE_SIZE,
            max_pages: Self::DEFAULT_MAX_PAGES,
        }
    }
}

/// Reaction to a heap-invariant violation detected while freeing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalPolicy {
    /// Log the violation and abort the process.
    #[default]
    Abort,
    /// Log the violation and panic. For unwinding hosts and tests.
    Panic,
}

impl FatalPolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "abort" | "default" | "strict" => Self::Abort,
            "panic" | "unwind" | "test" => Self::Panic,
            _ => Self::Abort,
        }
    }
}

/// Allocation policy knobs for a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Number of quick-cache size classes, starting at the minimum block size.
    pub quick_list_count: usize,
    /// Entries per quick cache; zero disables the caches.
    pub quick_list_depth: usize,
    /// Reaction to an invalid free.
    pub fatal_policy: FatalPolicy,
    /// Whether lifecycle records are kept.
    pub lifecycle_logging: bool,
}

impl HeapConfig {
    pub const DEFAULT_QUICK_LISTS: usize = 10;
    pub const DEFAULT_QUICK_DEPTH: usize = 5;

    #[must_use]
    pub const fn with_fatal_policy(mut self, fatal_policy: FatalPolicy) -> Self {
        self.fatal_policy = fatal_policy;
        self
    }

    #[must_use]
    pub const fn with_quick_lists(mut self, count: usize, depth: usize) -> Self {
        self.quick_list_count = count;
        self.quick_list_depth = depth;
        self
    }

    #[must_use]
    pub const fn with_lifecycle_logging(mut self, enabled: bool) -> Self {
        self.lifecycle_logging = enabled;
        self
    }

    /// Builds a policy from a variable lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(count) = parse_usize(lookup("TAGHEAP_QUICK_LISTS")) {
            config.quick_list_count = count;
        }
        if let Some(depth) = parse_usize(lookup("TAGHEAP_QUICK_DEPTH")) {
            config.quick_list_depth = depth;
        }
        if let Some(policy) = lookup("TAGHEAP_FATAL") {
            config.fatal_policy = FatalPolicy::from_str_loose(&policy);
        }
        if let Some(enabled) = lookup("TAGHEAP_LOG").as_deref().and_then(parse_switch) {
            config.lifecycle_logging = enabled;
        }
        config
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            quick_list_count: Self::DEFAULT_QUICK_LISTS,
            quick_list_depth: Self::DEFAULT_QUICK_DEPTH,
            fatal_policy: FatalPolicy::default(),
            lifecycle_logging: true,
        }
    }
}

fn parse_usize(raw: Option<String>) -> Option<usize> {
    raw?.trim().parse().ok()
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Some(true),
        "off" | "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

static ARENA_CONFIG: OnceLock<ArenaConfig> = OnceLock::new();
static HEAP_CONFIG: OnceLock<HeapConfig> = OnceLock::new();

/// Get the configured arena geometry (reads env vars on first call, caches thereafter).
#[must_use]
pub fn arena_config() -> ArenaConfig {
    *ARENA_CONFIG.get_or_init(|| ArenaConfig::from_lookup(env_lookup))
}

/// Get the configured heap policy (reads env vars on first call, caches thereafter).
#[must_use]
pub fn heap_config() -> HeapConfig {
    *HEAP_CONFIG.get_or_init(|| HeapConfig::from_lookup(env_lookup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn parse_fatal_policies() {
        assert_eq!(FatalPolicy::from_str_loose("abort"), FatalPolicy::Abort);
        assert_eq!(FatalPolicy::from_str_loose("ABORT"), FatalPolicy::Abort);
        assert_eq!(FatalPolicy::from_str_loose("strict"), FatalPolicy::Abort);
        assert_eq!(FatalPolicy::from_str_loose("panic"), FatalPolicy::Panic);
        assert_eq!(FatalPolicy::from_str_loose("Unwind"), FatalPolicy::Panic);
        assert_eq!(FatalPolicy::from_str_loose("bogus"), FatalPolicy::Abort);
    }

    #[test]
    fn default_is_abort() {
        assert_eq!(FatalPolicy::default(), FatalPolicy::Abort);
        assert_eq!(HeapConfig::default().fatal_policy, FatalPolicy::Abort);
    }

    #[test]
    fn default_geometry_is_valid() {
        let config = ArenaConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.max_bytes(), 4096 * 1024);
    }

    #[test]
    fn validate_rejects_bad_geometry() {
        let base = ArenaConfig::default();
        assert_eq!(
            base.with_page_size(4100).validate(),
            Err(ConfigError::MisalignedPageSize(4100))
        );
        assert_eq!(
            base.with_page_size(64).validate(),
            Err(ConfigError::PageTooSmall(64))
        );
        assert_eq!(base.with_max_pages(0).validate(), Err(ConfigError::NoPages));
        let zero_base = ArenaConfig { base: 0, ..base };
        assert_eq!(zero_base.validate(), Err(ConfigError::BadBase(0)));
        let odd_base = ArenaConfig { base: 0x1008, ..base };
        assert_eq!(odd_base.validate(), Err(ConfigError::BadBase(0x1008)));
    }

    #[test]
    fn arena_lookup_overrides_defaults() {
        let config = ArenaConfig::from_lookup(lookup_from(&[
            ("TAGHEAP_PAGE_SIZE", "8192"),
            ("TAGHEAP_MAX_PAGES", " 4 "),
        ]));
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.max_pages, 4);
        assert_eq!(config.base, ArenaConfig::DEFAULT_BASE);
    }

    #[test]
    fn arena_lookup_falls_back_on_invalid_geometry() {
        let config = ArenaConfig::from_lookup(lookup_from(&[("TAGHEAP_PAGE_SIZE", "100")]));
        assert_eq!(config, ArenaConfig::default());

        let config = ArenaConfig::from_lookup(lookup_from(&[("TAGHEAP_MAX_PAGES", "lots")]));
        assert_eq!(config, ArenaConfig::default());
    }

    #[test]
    fn heap_lookup_overrides_defaults() {
        let config = HeapConfig::from_lookup(lookup_from(&[
            ("TAGHEAP_QUICK_LISTS", "4"),
            ("TAGHEAP_QUICK_DEPTH", "0"),
            ("TAGHEAP_FATAL", "panic"),
            ("TAGHEAP_LOG", "off"),
        ]));
        assert_eq!(config.quick_list_count, 4);
        assert_eq!(config.quick_list_depth, 0);
        assert_eq!(config.fatal_policy, FatalPolicy::Panic);
        assert!(!config.lifecycle_logging);
    }

    #[test]
    fn heap_lookup_ignores_garbage_switch() {
        let config = HeapConfig::from_lookup(lookup_from(&[("TAGHEAP_LOG", "maybe")]));
        assert!(config.lifecycle_logging);
    }

    #[test]
    fn builders_chain() {
        let config = HeapConfig::default()
            .with_quick_lists(2, 3)
            .with_fatal_policy(FatalPolicy::Panic)
            .with_lifecycle_logging(false);
        assert_eq!(config.quick_list_count, 2);
        assert_eq!(config.quick_list_depth, 3);
        assert_eq!(config.fatal_policy, FatalPolicy::Panic);
        assert!(!config.lifecycle_logging);
    }
}
