//! Segregated quick caches.
//!
//! One LIFO cache per exact block size: class `i` holds blocks of
//! `MIN_BLOCK_SIZE + ROW_ALIGNMENT * i` bytes. Cached blocks stay marked
//! allocated, so they are never coalesced while they sit here. Each cache is
//! a singly linked stack threaded through the payloads (`next` at offset 0,
//! zero terminates).

use tagheap_membrane::PageProvider;

use super::layout::{MIN_BLOCK_SIZE, ROW_ALIGNMENT, payload_of};

/// One size class.
#[derive(Debug, Clone, Default)]
struct QuickList {
    head: usize,
    len: usize,
}

impl QuickList {
    fn pop<P: PageProvider + ?Sized>(&mut self, pages: &P) -> Option<usize> {
        if self.head == 0 {
            return None;
        }
        let block = self.head;
        self.head = pages.load_addr(payload_of(block));
        self.len -= 1;
        Some(block)
    }

    fn push<P: PageProvider + ?Sized>(&mut self, pages: &mut P, block: usize) {
        pages.store_addr(payload_of(block), self.head);
        self.head = block;
        self.len += 1;
    }

    fn blocks<P: PageProvider + ?Sized>(&self, pages: &P) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len);
        let mut node = self.head;
        while node != 0 && out.len() <= self.len {
            out.push(node);
            if !pages.contains(payload_of(node), 8) {
                break;
            }
            node = pages.load_addr(payload_of(node));
        }
        out
    }
}

/// All quick caches of one heap.
#[derive(Debug, Clone)]
pub struct QuickLists {
    lists: Vec<QuickList>,
    depth: usize,
    total_cached: usize,
}

impl QuickLists {
    /// `count` size classes holding up to `depth` blocks each.
    #[must_use]
    pub fn new(count: usize, depth: usize) -> Self {
        Self {
            lists: vec![QuickList::default(); count],
            depth,
            total_cached: 0,
        }
    }

    /// Block size served by class `index`.
    #[must_use]
    pub const fn class_size(index: usize) -> usize {
        MIN_BLOCK_SIZE + ROW_ALIGNMENT * index
    }

    /// Class caching blocks of exactly `block_size` bytes, if any.
    #[must_use]
    pub fn class_for(&self, block_size: usize) -> Option<usize> {
        if self.depth == 0 || block_size < MIN_BLOCK_SIZE || block_size % ROW_ALIGNMENT != 0 {
            return None;
        }
        let index = (block_size - MIN_BLOCK_SIZE) / ROW_ALIGNMENT;
        (index < self.lists.len()).then_some(index)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.lists.len()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Pops the most recently cached block of class `index`.
    pub fn pop<P: PageProvider + ?Sized>(&mut self, pages: &P, index: usize) -> Option<usize> {
        let block = self.lists.get_mut(index)?.pop(pages)?;
        self.total_cached -= 1;
        Some(block)
    }

    /// Caches `block` in class `index`.
    ///
    /// Returns `true` if the block was cached, `false` if the class is full
    /// or does not exist.
    pub fn push<P: PageProvider + ?Sized>(
        &mut self,
        pages: &mut P,
        index: usize,
        block: usize,
    ) -> bool {
        if self.is_full(index) {
            return false;
        }
        self.lists[index].push(pages, block);
        self.total_cached += 1;
        true
    }

    /// Returns true if class `index` cannot take another block.
    #[must_use]
    pub fn is_full(&self, index: usize) -> bool {
        self.lists
            .get(index)
            .is_none_or(|list| list.len >= self.depth)
    }

    #[must_use]
    pub fn len(&self, index: usize) -> usize {
        self.lists.get(index).map_or(0, |list| list.len)
    }

    /// Cached blocks across all classes.
    #[must_use]
    pub fn total_cached(&self) -> usize {
        self.total_cached
    }

    /// Empties class `index`, returning its blocks most recent first.
    pub fn drain<P: PageProvider + ?Sized>(&mut self, pages: &P, index: usize) -> Vec<usize> {
        let mut drained = Vec::new();
        while let Some(block) = self.pop(pages, index) {
            drained.push(block);
        }
        drained
    }

    /// Blocks of class `index`, most recent first.
    pub fn blocks<P: PageProvider + ?Sized>(&self, pages: &P, index: usize) -> Vec<usize> {
        self.lists
            .get(index)
            .map_or_else(Vec::new, |list| list.blocks(pages))
    }
}
