//! Core allocator state.
//!
//! [`HeapState`] owns the page provider, the general free list, the quick
//! caches and the bookkeeping for one heap. It is the only place allocation
//! policy lives; block formatting is in `layout`, growth and merging in
//! `heap`, pointer checks in `validate`.

use serde::Serialize;
use tagheap_membrane::{
    FatalPolicy, HeapConfig, HeapMetrics, MetricsSnapshot, PageArena, PageProvider,
};

use super::error::HeapError;
use super::free_list::FreeList;
use super::layout::{padded_size, payload_of, read_tag};
use super::quick_list::QuickLists;
use crate::errno;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    pub level: HeapLogLevel,
    /// API symbol (`allocate`, `deallocate`, `resize`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `page_grow`, `heap_stats`, ...).
    pub event: &'static str,
    /// Payload address involved in the event.
    pub address: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Quick-cache class of the block, when it has one.
    pub size_class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: live allocations.
    pub active_count: usize,
    /// Snapshot: bytes requested by live allocations.
    pub requested_bytes: usize,
    /// Snapshot: general free list length.
    pub free_list_len: usize,
    /// Snapshot: blocks held by quick caches.
    pub quick_cached: usize,
    /// Snapshot: operation counters.
    pub counters: MetricsSnapshot,
}

impl HeapLogRecord {
    /// Renders the record as one line of JSON.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One heap and everything needed to manage it.
pub struct HeapState<P: PageProvider = PageArena> {
    pub(super) pages: P,
    pub(super) config: HeapConfig,
    pub(super) free_list: FreeList,
    pub(super) quick_lists: QuickLists,
    pub(super) metrics: HeapMetrics,
    pub(super) initialized: bool,
    /// Live allocations.
    pub(super) active_count: usize,
    /// Sum of `requested_size` over live allocations.
    pub(super) requested_bytes: usize,
    next_decision_id: u64,
    lifecycle_logs: Vec<HeapLogRecord>,
}

impl<P: PageProvider> HeapState<P> {
    /// Creates an uninitialized heap; the first allocation requests the first page.
    pub fn new(pages: P, config: HeapConfig) -> Self {
        Self {
            pages,
            quick_lists: QuickLists::new(config.quick_list_count, config.quick_list_depth),
            config,
            free_list: FreeList::new(),
            metrics: HeapMetrics::new(),
            initialized: false,
            active_count: 0,
            requested_bytes: 0,
            next_decision_id: 1,
            lifecycle_logs: Vec::new(),
        }
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn record_lifecycle(
        &mut self,
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        address: Option<usize>,
        size: Option<usize>,
        size_class: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        if !self.config.lifecycle_logging {
            return;
        }
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("core::heap::{}::{:016x}", symbol, decision_id);
        self.lifecycle_logs.push(HeapLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            address,
            size,
            size_class,
            outcome,
            details: details.into(),
            active_count: self.active_count,
            requested_bytes: self.requested_bytes,
            free_list_len: self.free_list.len(),
            quick_cached: self.quick_lists.total_cached(),
            counters: self.metrics.snapshot(),
        });
    }

    fn record_heap_stats(&mut self, symbol: &'static str) {
        if !self.config.lifecycle_logging {
            return;
        }
        let heap_bytes = self.pages.heap_end() - self.pages.heap_start();
        self.record_lifecycle(
            HeapLogLevel::Debug,
            symbol,
            "heap_stats",
            None,
            None,
            None,
            "snapshot",
            format!(
                "heap_bytes={};free_list_len={};quick_cached={}",
                heap_bytes,
                self.free_list.len(),
                self.quick_lists.total_cached()
            ),
        );
    }

    /// Allocates `size` bytes and returns the payload address.
    ///
    /// Sets `ENOMEM` when the heap cannot grow far enough. A zero-size
    /// request returns `None` and leaves errno alone.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        match self.try_allocate(size) {
            Ok(address) => Some(address),
            Err(err) => {
                if let Some(code) = err.errno() {
                    errno::set_errno(code);
                }
                None
            }
        }
    }

    pub fn try_allocate(&mut self, size: usize) -> Result<usize, HeapError> {
        if size == 0 {
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "allocate",
                "alloc_zero",
                None,
                Some(0),
                None,
                "noop",
                "zero_size_request",
            );
            return Err(HeapError::ZeroSize);
        }
        let result = match padded_size(size) {
            Some(block_size) => self.allocate_block(size, block_size),
            None => Err(HeapError::out_of_memory(size)),
        };
        match result {
            Ok((block, path)) => {
                self.active_count += 1;
                self.requested_bytes += size;
                HeapMetrics::inc(&self.metrics.allocations);
                let tag = read_tag(&self.pages, block);
                let class = self.quick_lists.class_for(tag.size);
                self.record_lifecycle(
                    HeapLogLevel::Trace,
                    "allocate",
                    "alloc",
                    Some(payload_of(block)),
                    Some(size),
                    class,
                    "success",
                    format!("path={path} block_size={}", tag.size),
                );
                self.record_heap_stats("allocate");
                Ok(payload_of(block))
            }
            Err(err) => {
                HeapMetrics::inc(&self.metrics.oom_failures);
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    "allocate",
                    "alloc",
                    None,
                    Some(size),
                    None,
                    "oom",
                    err.to_string(),
                );
                self.record_heap_stats("allocate");
                Err(err)
            }
        }
    }

    /// Frees the block whose payload starts at `address`.
    ///
    /// An invalid address is fatal; see [`FatalPolicy`].
    pub fn deallocate(&mut self, address: usize) {
        if let Err(err) = self.try_deallocate(address) {
            self.fatal(&err);
        }
    }

    /// Frees the block at `address`, reporting an invalid address instead of
    /// terminating.
    pub fn try_deallocate(&mut self, address: usize) -> Result<(), HeapError> {
        let block = match self.validate_allocated(address) {
            Ok(block) => block,
            Err(err) => {
                HeapMetrics::inc(&self.metrics.invalid_frees);
                self.record_lifecycle(
                    HeapLogLevel::Error,
                    "deallocate",
                    "invalid_free",
                    Some(address),
                    None,
                    None,
                    "rejected",
                    err.to_string(),
                );
                self.record_heap_stats("deallocate");
                return Err(err);
            }
        };
        let tag = read_tag(&self.pages, block);
        let path = self.release_block(block);
        self.forget(tag.requested);
        HeapMetrics::inc(&self.metrics.deallocations);
        let class = self.quick_lists.class_for(tag.size);
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "deallocate",
            "free",
            Some(address),
            Some(tag.requested),
            class,
            "success",
            format!("path={path} block_size={}", tag.size),
        );
        self.record_heap_stats("deallocate");
        Ok(())
    }

    /// Resizes the allocation at `address` to `new_size` bytes.
    ///
    /// Returns the (possibly moved) payload address. `new_size == 0` frees
    /// the block and returns `None`. An invalid address sets `EINVAL`, a
    /// failed move sets `ENOMEM`; in both cases the block is untouched.
    pub fn resize(&mut self, address: usize, new_size: usize) -> Option<usize> {
        match self.try_resize(address, new_size) {
            Ok(moved) => moved,
            Err(err) => {
                if let Some(code) = err.errno() {
                    errno::set_errno(code);
                }
                None
            }
        }
    }

    pub fn try_resize(
        &mut self,
        address: usize,
        new_size: usize,
    ) -> Result<Option<usize>, HeapError> {
        let block = match self.validate_allocated(address) {
            Ok(block) => block,
            Err(err) => {
                HeapMetrics::inc(&self.metrics.invalid_resizes);
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    "resize",
                    "invalid_resize",
                    Some(address),
                    Some(new_size),
                    None,
                    "rejected",
                    err.to_string(),
                );
                self.record_heap_stats("resize");
                return Err(err);
            }
        };
        let tag = read_tag(&self.pages, block);

        if new_size == 0 {
            let path = self.release_block(block);
            self.forget(tag.requested);
            HeapMetrics::inc(&self.metrics.resizes);
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "resize",
                "resize_zero_as_free",
                Some(address),
                Some(0),
                None,
                "freed",
                format!("path={path} old_size={}", tag.requested),
            );
            self.record_heap_stats("resize");
            return Ok(None);
        }

        let Some(new_block_size) = padded_size(new_size) else {
            let err = HeapError::out_of_memory(new_size);
            return Err(self.resize_failed(address, new_size, err));
        };

        if new_block_size <= tag.size {
            let split = self.shrink_in_place(block, new_block_size, new_size);
            self.requested_bytes = self.requested_bytes - tag.requested + new_size;
            HeapMetrics::inc(&self.metrics.resizes);
            self.record_lifecycle(
                HeapLogLevel::Trace,
                "resize",
                "resize_in_place",
                Some(address),
                Some(new_size),
                self.quick_lists.class_for(new_block_size),
                "success",
                format!(
                    "old_size={} block_size={} split={split}",
                    tag.requested,
                    read_tag(&self.pages, block).size
                ),
            );
            self.record_heap_stats("resize");
            return Ok(Some(address));
        }

        let new_block = match self.allocate_block(new_size, new_block_size) {
            Ok((new_block, _)) => new_block,
            Err(err) => return Err(self.resize_failed(address, new_size, err)),
        };
        let moved = payload_of(new_block);
        self.pages
            .copy_within(address, moved, tag.requested.min(new_size));
        let path = self.release_block(block);
        self.requested_bytes = self.requested_bytes - tag.requested + new_size;
        HeapMetrics::inc(&self.metrics.resizes);
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "resize",
            "resize_move",
            Some(moved),
            Some(new_size),
            self.quick_lists.class_for(new_block_size),
            "success",
            format!(
                "old_address={address:#x} old_size={} old_block_path={path}",
                tag.requested
            ),
        );
        self.record_heap_stats("resize");
        Ok(Some(moved))
    }

    fn resize_failed(&mut self, address: usize, new_size: usize, err: HeapError) -> HeapError {
        HeapMetrics::inc(&self.metrics.oom_failures);
        self.record_lifecycle(
            HeapLogLevel::Warn,
            "resize",
            "resize",
            Some(address),
            Some(new_size),
            None,
            "oom",
            err.to_string(),
        );
        self.record_heap_stats("resize");
        err
    }

    fn forget(&mut self, requested: usize) {
        self.active_count = self.active_count.saturating_sub(1);
        self.requested_bytes = self.requested_bytes.saturating_sub(requested);
    }

    #[cold]
    fn fatal(&self, err: &HeapError) -> ! {
        match self.config.fatal_policy {
            FatalPolicy::Abort => {
                if let Some(line) = self
                    .lifecycle_logs
                    .last()
                    .and_then(|record| record.to_json_line().ok())
                {
                    eprintln!("{line}");
                }
                eprintln!("tagheap: fatal: {err}");
                std::process::abort()
            }
            FatalPolicy::Panic => panic!("tagheap: fatal: {err}"),
        }
    }

    /// The caller-visible bytes of a live allocation.
    pub fn payload(&self, address: usize) -> Result<&[u8], HeapError> {
        let block = self.validate_allocated(address)?;
        let requested = read_tag(&self.pages, block).requested;
        Ok(self.pages.span(address, requested))
    }

    /// Mutable access to the caller-visible bytes of a live allocation.
    pub fn payload_mut(&mut self, address: usize) -> Result<&mut [u8], HeapError> {
        let block = self.validate_allocated(address)?;
        let requested = read_tag(&self.pages, block).requested;
        Ok(self.pages.span_mut(address, requested))
    }

    /// `requested_size` recorded for a live allocation.
    pub fn usable_size(&self, address: usize) -> Result<usize, HeapError> {
        let block = self.validate_allocated(address)?;
        Ok(read_tag(&self.pages, block).requested)
    }

    #[must_use]
    pub fn pages(&self) -> &P {
        &self.pages
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &HeapMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Live allocations.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Bytes requested by live allocations.
    #[must_use]
    pub fn requested_bytes(&self) -> usize {
        self.requested_bytes
    }

    /// Returns a view of allocator lifecycle log records.
    pub fn lifecycle_logs(&self) -> &[HeapLogRecord] {
        &self.lifecycle_logs
    }

    /// Drains allocator lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<HeapLogRecord> {
        std::mem::take(&mut self.lifecycle_logs)
    }
}

impl HeapState<PageArena> {
    /// Heap over a default [`PageArena`] with default policy.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(PageArena::default(), HeapConfig::default())
    }

    /// Heap configured from the `TAGHEAP_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(PageArena::from_env(), tagheap_membrane::config::heap_config())
    }
}

impl Default for HeapState<PageArena> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<P: PageProvider + std::fmt::Debug> std::fmt::Debug for HeapState<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapState")
            .field("pages", &self.pages)
            .field("config", &self.config)
            .field("initialized", &self.initialized)
            .field("active_count", &self.active_count)
            .field("requested_bytes", &self.requested_bytes)
            .field("free_list_len", &self.free_list.len())
            .field("quick_cached", &self.quick_lists.total_cached())
            .finish_non_exhaustive()
    }
}
