//! Heap walk and invariant checker.
//!
//! Read-only diagnostics: every block in address order, the contents of the
//! general list and each quick cache, and a full consistency check that
//! reports the first violation it finds.

use std::collections::HashSet;

use serde::Serialize;
use tagheap_membrane::PageProvider;

use super::allocator::HeapState;
use super::error::HeapError;
use super::free_list::SENTINEL;
use super::layout::{
    BlockTag, EPILOGUE_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE, PROLOGUE_PADDING, PROLOGUE_SIZE,
    ROW_ALIGNMENT, footer_of, payload_of, read_tag,
};
use super::quick_list::QuickLists;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    Allocated,
    Free,
    /// Held by a quick cache: marked allocated with no requested size.
    Cached,
}

/// One block as seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Header address.
    pub address: usize,
    pub payload: usize,
    pub size: usize,
    pub requested_size: usize,
    pub prev_allocated: bool,
    pub state: BlockState,
}

impl BlockInfo {
    fn from_tag(address: usize, tag: BlockTag) -> Self {
        let state = match (tag.allocated, tag.requested) {
            (false, _) => BlockState::Free,
            (true, 0) => BlockState::Cached,
            (true, _) => BlockState::Allocated,
        };
        Self {
            address,
            payload: payload_of(address),
            size: tag.size,
            requested_size: tag.requested,
            prev_allocated: tag.prev_allocated,
            state,
        }
    }
}

/// Totals gathered by [`HeapState::check_invariants`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapSummary {
    /// Bytes between heap start and heap end, sentinels included.
    pub heap_bytes: usize,
    pub blocks: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub requested_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub cached_blocks: usize,
    pub cached_bytes: usize,
    pub largest_free: usize,
}

impl<P: PageProvider> HeapState<P> {
    /// Every block between the sentinels, in address order.
    ///
    /// Stops early at a tag that cannot be followed.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        let mut out = Vec::new();
        if !self.initialized {
            return out;
        }
        let epilogue = self.pages.heap_end() - EPILOGUE_SIZE;
        let mut at = self.pages.heap_start() + PROLOGUE_SIZE;
        while at < epilogue {
            let tag = read_tag(&self.pages, at);
            if tag.size < MIN_BLOCK_SIZE || tag.size > epilogue - at {
                break;
            }
            out.push(BlockInfo::from_tag(at, tag));
            at += tag.size;
        }
        out
    }

    /// Blocks on the general free list, head first.
    pub fn free_list_blocks(&self) -> Vec<BlockInfo> {
        self.free_list
            .blocks(&self.pages)
            .into_iter()
            .map(|block| BlockInfo::from_tag(block, read_tag(&self.pages, block)))
            .collect()
    }

    /// Blocks in quick cache `index`, most recent first.
    pub fn quick_list_blocks(&self, index: usize) -> Vec<BlockInfo> {
        self.quick_lists
            .blocks(&self.pages, index)
            .into_iter()
            .map(|block| BlockInfo::from_tag(block, read_tag(&self.pages, block)))
            .collect()
    }

    /// Verifies block tags, sentinels, list and cache membership and the
    /// live-allocation bookkeeping.
    pub fn check_invariants(&self) -> Result<HeapSummary, HeapError> {
        let mut summary = HeapSummary::default();
        if !self.initialized {
            if self.free_list.len() != 0 || self.quick_lists.total_cached() != 0 {
                return Err(HeapError::corrupted(0, "lists populated before initialization"));
            }
            return Ok(summary);
        }
        let start = self.pages.heap_start();
        let end = self.pages.heap_end();
        summary.heap_bytes = end - start;

        let prologue = start + PROLOGUE_PADDING;
        let prologue_tag = BlockTag::allocated(MIN_BLOCK_SIZE, 0, false);
        if read_tag(&self.pages, prologue) != prologue_tag
            || read_tag(&self.pages, footer_of(prologue, MIN_BLOCK_SIZE)) != prologue_tag
        {
            return Err(HeapError::corrupted(prologue, "prologue damaged"));
        }

        let epilogue = end - EPILOGUE_SIZE;
        let mut free_blocks = HashSet::new();
        let mut cached_blocks = HashSet::new();
        let mut prev_allocated = true;
        let mut at = start + PROLOGUE_SIZE;
        while at < epilogue {
            let tag = read_tag(&self.pages, at);
            if tag.size % ROW_ALIGNMENT != 0 || tag.size < MIN_BLOCK_SIZE {
                return Err(HeapError::corrupted(at, format!("bad block size {}", tag.size)));
            }
            if tag.size > epilogue - at {
                return Err(HeapError::corrupted(at, "block runs past the epilogue"));
            }
            if tag.prev_allocated != prev_allocated {
                return Err(HeapError::corrupted(at, "previous-allocated flag out of sync"));
            }
            if tag.allocated {
                if tag.requested == 0 {
                    cached_blocks.insert(at);
                    summary.cached_blocks += 1;
                    summary.cached_bytes += tag.size;
                } else {
                    if tag.requested + HEADER_SIZE > tag.size {
                        return Err(HeapError::corrupted(at, "requested size exceeds block"));
                    }
                    summary.allocated_blocks += 1;
                    summary.allocated_bytes += tag.size;
                    summary.requested_bytes += tag.requested;
                }
            } else {
                if !prev_allocated {
                    return Err(HeapError::corrupted(at, "adjacent free blocks"));
                }
                if tag.requested != 0 {
                    return Err(HeapError::corrupted(at, "free block with requested size"));
                }
                if read_tag(&self.pages, footer_of(at, tag.size)) != tag {
                    return Err(HeapError::corrupted(at, "footer differs from header"));
                }
                free_blocks.insert(at);
                summary.free_blocks += 1;
                summary.free_bytes += tag.size;
                summary.largest_free = summary.largest_free.max(tag.size);
            }
            summary.blocks += 1;
            prev_allocated = tag.allocated;
            at += tag.size;
        }
        if at != epilogue {
            return Err(HeapError::corrupted(at, "walk did not land on the epilogue"));
        }
        let epilogue_tag = read_tag(&self.pages, epilogue);
        if epilogue_tag != BlockTag::epilogue(prev_allocated) {
            return Err(HeapError::corrupted(epilogue, "epilogue damaged"));
        }

        self.check_free_list(&free_blocks)?;
        self.check_quick_lists(&cached_blocks)?;

        if summary.allocated_blocks != self.active_count {
            return Err(HeapError::corrupted(
                0,
                format!(
                    "{} allocated blocks but {} live allocations",
                    summary.allocated_blocks, self.active_count
                ),
            ));
        }
        if summary.requested_bytes != self.requested_bytes {
            return Err(HeapError::corrupted(0, "requested byte total drifted"));
        }
        Ok(summary)
    }

    fn check_free_list(&self, free_blocks: &HashSet<usize>) -> Result<(), HeapError> {
        let listed = self.free_list.blocks(&self.pages);
        if listed.len() != self.free_list.len() {
            return Err(HeapError::corrupted(
                listed.last().copied().unwrap_or(0),
                format!(
                    "free list walk found {} entries, expected {}",
                    listed.len(),
                    self.free_list.len()
                ),
            ));
        }
        let mut prev = SENTINEL;
        for &block in &listed {
            if !free_blocks.contains(&block) {
                return Err(HeapError::corrupted(block, "listed block is not a free block"));
            }
            if self.free_list.links(&self.pages, block).1 != prev {
                return Err(HeapError::corrupted(block, "free list back link broken"));
            }
            prev = block;
        }
        if self.free_list.links(&self.pages, SENTINEL).1 != prev {
            return Err(HeapError::corrupted(prev, "free list tail link broken"));
        }
        let unique: HashSet<usize> = listed.iter().copied().collect();
        if unique.len() != free_blocks.len() {
            return Err(HeapError::corrupted(0, "free block missing from the free list"));
        }
        Ok(())
    }

    fn check_quick_lists(&self, cached_blocks: &HashSet<usize>) -> Result<(), HeapError> {
        let mut seen = HashSet::new();
        for index in 0..self.quick_lists.count() {
            let blocks = self.quick_lists.blocks(&self.pages, index);
            if blocks.len() != self.quick_lists.len(index)
                || blocks.len() > self.quick_lists.depth()
            {
                return Err(HeapError::corrupted(
                    0,
                    format!("quick cache {index} length mismatch"),
                ));
            }
            for block in blocks {
                if !cached_blocks.contains(&block) || !seen.insert(block) {
                    return Err(HeapError::corrupted(
                        block,
                        "quick cache entry is not a cached block",
                    ));
                }
                if read_tag(&self.pages, block).size != QuickLists::class_size(index) {
                    return Err(HeapError::corrupted(block, "quick cache entry in the wrong class"));
                }
            }
        }
        if seen.len() != cached_blocks.len() {
            return Err(HeapError::corrupted(0, "cached block missing from its quick cache"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::malloc::layout::{BlockTag, write_tag};

    #[test]
    fn uninitialized_heap_is_empty_and_valid() {
        let state = HeapState::with_defaults();
        assert!(state.blocks().is_empty());
        assert_eq!(state.check_invariants(), Ok(HeapSummary::default()));
    }

    #[test]
    fn walk_reports_states() {
        let mut state = HeapState::with_defaults();
        let a = state.allocate(8).unwrap();
        let b = state.allocate(100).unwrap();
        state.allocate(8).unwrap();
        state.deallocate(a);

        let blocks = state.blocks();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].state, BlockState::Cached);
        assert_eq!(blocks[0].payload, a);
        assert_eq!(blocks[1].state, BlockState::Allocated);
        assert_eq!(blocks[1].payload, b);
        assert_eq!(blocks[1].requested_size, 100);
        assert_eq!(blocks[3].state, BlockState::Free);

        let summary = state.check_invariants().unwrap();
        assert_eq!(summary.blocks, 4);
        assert_eq!(summary.allocated_blocks, 2);
        assert_eq!(summary.cached_blocks, 1);
        assert_eq!(summary.free_blocks, 1);
        assert_eq!(summary.heap_bytes, 4096);
        assert_eq!(
            summary.allocated_bytes + summary.cached_bytes + summary.free_bytes,
            4096 - 48
        );
        assert_eq!(state.quick_list_blocks(0)[0].address, a - 8);
        assert_eq!(state.free_list_blocks().len(), 1);
    }

    #[test]
    fn detects_flag_drift() {
        let mut state = HeapState::with_defaults();
        let ptr = state.allocate(64).unwrap();
        write_tag(&mut state.pages, ptr - 8, BlockTag::allocated(80, 64, false));
        assert!(matches!(
            state.check_invariants(),
            Err(HeapError::Corrupted { .. })
        ));
    }

    #[test]
    fn detects_footer_mismatch() {
        let mut state = HeapState::with_defaults();
        state.allocate(64).unwrap();
        let free = state.free_list_blocks()[0];
        state.pages.store_u64(
            footer_of(free.address, free.size),
            BlockTag::free(free.size, false).encode(),
        );
        let err = state.check_invariants().unwrap_err();
        assert!(err.to_string().contains("footer"));
    }

    #[test]
    fn detects_bookkeeping_drift() {
        let mut state = HeapState::with_defaults();
        state.allocate(64).unwrap();
        state.active_count = 2;
        assert!(state.check_invariants().is_err());
    }
}
