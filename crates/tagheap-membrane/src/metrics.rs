//! Atomic counters for heap observability.
//!
//! All counters use relaxed ordering; they are diagnostic, not
//! synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-heap operation counters.
pub struct HeapMetrics {
    /// Successful allocations.
    pub allocations: AtomicU64,
    /// Successful deallocations.
    pub deallocations: AtomicU64,
    /// Successful resizes, including shrink-to-zero.
    pub resizes: AtomicU64,
    /// Allocations served from a quick cache.
    pub quick_hits: AtomicU64,
    /// Allocations whose size class had no cached block.
    pub quick_misses: AtomicU64,
    /// Full quick caches emptied into the general free list.
    pub quick_flushes: AtomicU64,
    /// Free blocks split into an allocated piece and a remainder.
    pub splits: AtomicU64,
    /// Neighbour merges of free blocks.
    pub coalesces: AtomicU64,
    /// Pages obtained from the provider.
    pub page_grows: AtomicU64,
    /// Requests refused for lack of memory.
    pub oom_failures: AtomicU64,
    /// Deallocations that failed validation.
    pub invalid_frees: AtomicU64,
    /// Resizes that failed validation.
    pub invalid_resizes: AtomicU64,
}

impl HeapMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            resizes: AtomicU64::new(0),
            quick_hits: AtomicU64::new(0),
            quick_misses: AtomicU64::new(0),
            quick_flushes: AtomicU64::new(0),
            splits: AtomicU64::new(0),
            coalesces: AtomicU64::new(0),
            page_grows: AtomicU64::new(0),
            oom_failures: AtomicU64::new(0),
            invalid_frees: AtomicU64::new(0),
            invalid_resizes: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: Self::get(&self.allocations),
            deallocations: Self::get(&self.deallocations),
            resizes: Self::get(&self.resizes),
            quick_hits: Self::get(&self.quick_hits),
            quick_misses: Self::get(&self.quick_misses),
            quick_flushes: Self::get(&self.quick_flushes),
            splits: Self::get(&self.splits),
            coalesces: Self::get(&self.coalesces),
            page_grows: Self::get(&self.page_grows),
            oom_failures: Self::get(&self.oom_failures),
            invalid_frees: Self::get(&self.invalid_frees),
            invalid_resizes: Self::get(&self.invalid_resizes),
        }
    }
}

impl Default for HeapMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HeapMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Point-in-time snapshot of all heap counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub deallocations: u64,
    pub resizes: u64,
    pub quick_hits: u64,
    pub quick_misses: u64,
    pub quick_flushes: u64,
    pub splits: u64,
    pub coalesces: u64,
    pub page_grows: u64,
    pub oom_failures: u64,
    pub invalid_frees: u64,
    pub invalid_resizes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = HeapMetrics::new();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_works() {
        let m = HeapMetrics::new();
        HeapMetrics::inc(&m.allocations);
        HeapMetrics::inc(&m.allocations);
        HeapMetrics::inc(&m.quick_flushes);
        let snap = m.snapshot();
        assert_eq!(snap.allocations, 2);
        assert_eq!(snap.quick_flushes, 1);
        assert_eq!(snap.deallocations, 0);
    }

    #[test]
    fn snapshot_serializes_every_counter() {
        let m = HeapMetrics::new();
        HeapMetrics::inc(&m.page_grows);
        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(json["page_grows"], 1);
        assert_eq!(json.as_object().unwrap().len(), 12);
    }
}
