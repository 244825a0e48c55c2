//! Pointer validation for deallocate, resize and payload access.

use tagheap_membrane::PageProvider;

use super::allocator::HeapState;
use super::error::{HeapError, PointerFault};
use super::layout::{
    EPILOGUE_SIZE, FOOTER_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE, PROLOGUE_SIZE, ROW_ALIGNMENT,
    read_tag,
};

impl<P: PageProvider> HeapState<P> {
    /// Checks that `address` is the payload of a live allocated block and
    /// returns the block's header address.
    pub(super) fn validate_allocated(&self, address: usize) -> Result<usize, HeapError> {
        let fault = |reason| HeapError::InvalidPointer { address, reason };
        if address == 0 {
            return Err(fault(PointerFault::Null));
        }
        if !self.initialized {
            return Err(fault(PointerFault::Uninitialized));
        }
        if address % ROW_ALIGNMENT != 0 {
            return Err(fault(PointerFault::Misaligned));
        }

        let first_block = self.pages.heap_start() + PROLOGUE_SIZE;
        let epilogue = self.pages.heap_end() - EPILOGUE_SIZE;
        let block = address.wrapping_sub(HEADER_SIZE);
        if address < HEADER_SIZE || block < first_block || block >= epilogue {
            return Err(fault(PointerFault::OutOfBounds));
        }

        let tag = read_tag(&self.pages, block);
        if !tag.allocated {
            return Err(fault(PointerFault::NotAllocated));
        }
        if tag.requested == 0 {
            return Err(fault(PointerFault::Cached));
        }
        if tag.size % ROW_ALIGNMENT != 0
            || tag.size < MIN_BLOCK_SIZE
            || tag.size > epilogue - block
        {
            return Err(fault(PointerFault::BadBlockSize));
        }
        if tag.requested + HEADER_SIZE > tag.size {
            return Err(fault(PointerFault::RequestedSizeMismatch));
        }
        if !tag.prev_allocated && !self.free_predecessor_is_consistent(block, first_block) {
            return Err(fault(PointerFault::PrevFlagMismatch));
        }
        Ok(block)
    }

    /// A block claiming a free predecessor must be preceded by a free
    /// footer whose header is identical and lies inside the heap.
    fn free_predecessor_is_consistent(&self, block: usize, first_block: usize) -> bool {
        let footer = read_tag(&self.pages, block - FOOTER_SIZE);
        if footer.allocated || footer.size < MIN_BLOCK_SIZE || footer.size % ROW_ALIGNMENT != 0 {
            return false;
        }
        let Some(prev) = block.checked_sub(footer.size) else {
            return false;
        };
        prev >= first_block && read_tag(&self.pages, prev) == footer
    }
}
