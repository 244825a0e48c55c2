//! Memory allocation.
//!
//! A boundary-tag allocator over one growable heap:
//! - Exact-size quick caches for small blocks, flushed when full
//! - A first-fit general free list with splitting and immediate coalescing
//! - Growth one page at a time through a [`PageProvider`](tagheap_membrane::PageProvider)

pub mod allocator;
pub mod error;
pub mod free_list;
mod heap;
pub mod layout;
pub mod quick_list;
pub mod shared;
mod validate;
pub mod walk;

pub use allocator::{HeapLogLevel, HeapLogRecord, HeapState};
pub use error::{HeapError, PointerFault};
pub use free_list::FreeList;
pub use quick_list::QuickLists;
pub use shared::SharedHeap;
pub use walk::{BlockInfo, BlockState, HeapSummary};
