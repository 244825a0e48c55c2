//! Heap bootstrap, growth, splitting and coalescing.

use tagheap_membrane::{HeapMetrics, PageProvider};

use super::allocator::{HeapLogLevel, HeapState};
use super::error::HeapError;
use super::layout::{
    BlockTag, EPILOGUE_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, PROLOGUE_PADDING, PROLOGUE_SIZE,
    ROW_ALIGNMENT, SENTINEL_OVERHEAD, footer_of, payload_of, previous_block, read_tag,
    set_prev_allocated, set_requested_size, write_allocated_block, write_free_block, write_tag,
};

impl<P: PageProvider> HeapState<P> {
    /// Finds or makes a block of `block_size` bytes and marks it allocated
    /// for `requested` bytes. Returns the header address and the path taken.
    pub(super) fn allocate_block(
        &mut self,
        requested: usize,
        block_size: usize,
    ) -> Result<(usize, &'static str), HeapError> {
        if !self.initialized {
            self.bootstrap(requested)?;
        }
        let class = self.quick_lists.class_for(block_size);
        let mut counted_miss = false;
        loop {
            if let Some(index) = class {
                if let Some(block) = self.quick_lists.pop(&self.pages, index) {
                    set_requested_size(&mut self.pages, block, requested);
                    HeapMetrics::inc(&self.metrics.quick_hits);
                    return Ok((block, "quick_list_hit"));
                }
                if !counted_miss {
                    HeapMetrics::inc(&self.metrics.quick_misses);
                    counted_miss = true;
                }
            }
            if let Some(block) = self.free_list.first_fit(&self.pages, block_size) {
                self.free_list.remove(&mut self.pages, block);
                self.place(block, block_size, requested);
                return Ok((block, "free_list_fit"));
            }
            self.extend(requested)?;
        }
    }

    /// Lays out the sentinels and the first free block on the first page.
    fn bootstrap(&mut self, requested: usize) -> Result<(), HeapError> {
        self.request_page(requested)?;
        let start = self.pages.heap_start();
        let end = self.pages.heap_end();
        let span = end - start;
        if start % ROW_ALIGNMENT != 0
            || span % ROW_ALIGNMENT != 0
            || span < SENTINEL_OVERHEAD + MIN_BLOCK_SIZE
        {
            self.record_lifecycle(
                HeapLogLevel::Error,
                "allocate",
                "heap_init",
                Some(start),
                Some(span),
                None,
                "unusable_geometry",
                format!("start={start:#x} end={end:#x}"),
            );
            return Err(HeapError::out_of_memory(requested));
        }

        let prologue = start + PROLOGUE_PADDING;
        let prologue_tag = BlockTag::allocated(MIN_BLOCK_SIZE, 0, false);
        self.pages.fill(start, PROLOGUE_PADDING, 0);
        write_tag(&mut self.pages, prologue, prologue_tag);
        self.pages
            .store_u64(footer_of(prologue, MIN_BLOCK_SIZE), prologue_tag.encode());

        let first = start + PROLOGUE_SIZE;
        let epilogue = end - EPILOGUE_SIZE;
        write_free_block(&mut self.pages, first, epilogue - first, true);
        write_tag(&mut self.pages, epilogue, BlockTag::epilogue(false));
        self.free_list.insert_head(&mut self.pages, first);
        self.initialized = true;

        self.record_lifecycle(
            HeapLogLevel::Info,
            "allocate",
            "heap_init",
            Some(payload_of(first)),
            Some(epilogue - first),
            None,
            "initialized",
            format!("heap_start={start:#x} heap_end={end:#x}"),
        );
        Ok(())
    }

    /// Adds one page at the old epilogue and merges it with a free
    /// predecessor before inserting it into the general list.
    fn extend(&mut self, requested: usize) -> Result<(), HeapError> {
        let span = self.pages.heap_end() - self.pages.heap_start();
        if span.saturating_add(self.pages.page_size()) > MAX_BLOCK_SIZE {
            self.record_lifecycle(
                HeapLogLevel::Warn,
                "allocate",
                "page_grow",
                None,
                Some(requested),
                None,
                "span_limit",
                format!("heap_bytes={span}"),
            );
            return Err(HeapError::out_of_memory(requested));
        }
        let page = self.request_page(requested)?;
        let old_epilogue = page - EPILOGUE_SIZE;
        let prev_allocated = read_tag(&self.pages, old_epilogue).prev_allocated;
        let new_epilogue = self.pages.heap_end() - EPILOGUE_SIZE;

        write_free_block(
            &mut self.pages,
            old_epilogue,
            new_epilogue - old_epilogue,
            prev_allocated,
        );
        write_tag(&mut self.pages, new_epilogue, BlockTag::epilogue(false));
        let merged = self.absorb_preceding(old_epilogue);
        self.free_list.insert_head(&mut self.pages, merged);

        let merged_size = read_tag(&self.pages, merged).size;
        self.record_lifecycle(
            HeapLogLevel::Info,
            "allocate",
            "page_grow",
            Some(page),
            Some(self.pages.page_size()),
            None,
            "grown",
            format!(
                "heap_end={:#x} free_block_size={merged_size}",
                self.pages.heap_end()
            ),
        );
        Ok(())
    }

    fn request_page(&mut self, requested: usize) -> Result<usize, HeapError> {
        match self.pages.grow() {
            Ok(page) => {
                HeapMetrics::inc(&self.metrics.page_grows);
                Ok(page)
            }
            Err(err) => {
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    "allocate",
                    "page_grow",
                    None,
                    Some(requested),
                    None,
                    "refused",
                    err.to_string(),
                );
                Err(HeapError::from_grow(err, requested))
            }
        }
    }

    /// Marks a free block (already off the list) allocated, splitting off
    /// the tail when it is big enough to stand alone.
    fn place(&mut self, block: usize, block_size: usize, requested: usize) {
        let tag = read_tag(&self.pages, block);
        let remainder = tag.size - block_size;
        if remainder >= MIN_BLOCK_SIZE {
            write_allocated_block(
                &mut self.pages,
                block,
                block_size,
                requested,
                tag.prev_allocated,
            );
            let rest = block + block_size;
            write_free_block(&mut self.pages, rest, remainder, true);
            self.free_list.insert_head(&mut self.pages, rest);
            HeapMetrics::inc(&self.metrics.splits);
        } else {
            write_allocated_block(
                &mut self.pages,
                block,
                tag.size,
                requested,
                tag.prev_allocated,
            );
            set_prev_allocated(&mut self.pages, block + tag.size, true);
        }
    }

    /// Returns a validated allocated block to the heap: into its quick
    /// cache when it has one, otherwise coalesced into the general list.
    pub(super) fn release_block(&mut self, block: usize) -> &'static str {
        let tag = read_tag(&self.pages, block);
        if let Some(index) = self.quick_lists.class_for(tag.size) {
            let mut path = "quick_list_store";
            if self.quick_lists.is_full(index) {
                self.flush_quick_list(index);
                path = "quick_list_flush_store";
            }
            // A flushed predecessor may have cleared this block's flag.
            let prev_allocated = read_tag(&self.pages, block).prev_allocated;
            write_tag(
                &mut self.pages,
                block,
                BlockTag::allocated(tag.size, 0, prev_allocated),
            );
            self.quick_lists.push(&mut self.pages, index, block);
            return path;
        }
        write_free_block(&mut self.pages, block, tag.size, tag.prev_allocated);
        let merged = self.coalesce(block);
        self.free_list.insert_head(&mut self.pages, merged);
        "free_list_insert"
    }

    /// Empties one quick cache into the general list, coalescing each entry.
    fn flush_quick_list(&mut self, index: usize) {
        let drained = self.quick_lists.drain(&self.pages, index);
        for &block in &drained {
            let tag = read_tag(&self.pages, block);
            write_free_block(&mut self.pages, block, tag.size, tag.prev_allocated);
            let merged = self.coalesce(block);
            self.free_list.insert_head(&mut self.pages, merged);
        }
        HeapMetrics::inc(&self.metrics.quick_flushes);
        self.record_lifecycle(
            HeapLogLevel::Info,
            "deallocate",
            "quick_list_flush",
            None,
            None,
            Some(index),
            "flushed",
            format!("entries={}", drained.len()),
        );
    }

    /// Merges a free-formatted block (not on the list) with both free
    /// neighbours. Returns the header of the merged block.
    fn coalesce(&mut self, block: usize) -> usize {
        let merged = self.absorb_preceding(block);
        self.absorb_following(merged);
        merged
    }

    fn absorb_preceding(&mut self, block: usize) -> usize {
        let tag = read_tag(&self.pages, block);
        if tag.prev_allocated {
            return block;
        }
        let prev = previous_block(&self.pages, block);
        let prev_tag = read_tag(&self.pages, prev);
        self.free_list.remove(&mut self.pages, prev);
        write_free_block(
            &mut self.pages,
            prev,
            prev_tag.size + tag.size,
            prev_tag.prev_allocated,
        );
        HeapMetrics::inc(&self.metrics.coalesces);
        prev
    }

    /// Merges `block` with a free successor, then clears the
    /// previous-allocated flag of whatever follows.
    fn absorb_following(&mut self, block: usize) {
        let tag = read_tag(&self.pages, block);
        let next = block + tag.size;
        let next_tag = read_tag(&self.pages, next);
        let mut size = tag.size;
        if !next_tag.allocated {
            self.free_list.remove(&mut self.pages, next);
            size += next_tag.size;
            write_free_block(&mut self.pages, block, size, tag.prev_allocated);
            HeapMetrics::inc(&self.metrics.coalesces);
        }
        set_prev_allocated(&mut self.pages, block + size, false);
    }

    /// Shrinks an allocated block to `block_size`, releasing the tail to the
    /// general list when it can stand alone. Returns whether it split.
    pub(super) fn shrink_in_place(
        &mut self,
        block: usize,
        block_size: usize,
        requested: usize,
    ) -> bool {
        let tag = read_tag(&self.pages, block);
        let remainder = tag.size - block_size;
        if remainder < MIN_BLOCK_SIZE {
            set_requested_size(&mut self.pages, block, requested);
            return false;
        }
        write_allocated_block(
            &mut self.pages,
            block,
            block_size,
            requested,
            tag.prev_allocated,
        );
        let rest = block + block_size;
        write_free_block(&mut self.pages, rest, remainder, true);
        self.absorb_following(rest);
        self.free_list.insert_head(&mut self.pages, rest);
        HeapMetrics::inc(&self.metrics.splits);
        true
    }
}
