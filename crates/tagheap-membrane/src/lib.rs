//! Backing-memory membrane for tagheap.
//!
//! Everything the allocator core touches that is not allocation policy lives
//! here. The core sees the heap only through this crate, so every byte it
//! reads or writes passes a bounds check first.
//!
//! # Architecture
//!
//! - **Page provider** (`page`): growth contract plus checked loads and stores
//! - **Page arena** (`arena`): in-process provider backed by a growable buffer
//! - **Configuration** (`config`): arena geometry and heap policy
//! - **Metrics** (`metrics`): atomic counters for observability

#![deny(unsafe_code)]

pub mod arena;
pub mod config;
pub mod metrics;
pub mod page;

pub use arena::PageArena;
pub use config::{ArenaConfig, ConfigError, FatalPolicy, HeapConfig};
pub use metrics::{HeapMetrics, MetricsSnapshot};
pub use page::{GrowError, PageProvider};
