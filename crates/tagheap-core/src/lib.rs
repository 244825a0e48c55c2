//! # tagheap-core
//!
//! A segregated-fit, boundary-tag heap allocator written in safe Rust.
//!
//! The heap is a range of addresses handed out by a page provider from
//! `tagheap-membrane`; every header, footer and link is read and written
//! through bounds-checked accessors. No `unsafe` code is permitted at the
//! crate level.

#![deny(unsafe_code)]

pub mod errno;
pub mod malloc;

pub use malloc::{
    BlockInfo, BlockState, HeapError, HeapLogLevel, HeapLogRecord, HeapState, HeapSummary,
    PointerFault, SharedHeap,
};
pub use tagheap_membrane::{ArenaConfig, FatalPolicy, HeapConfig, PageArena, PageProvider};
