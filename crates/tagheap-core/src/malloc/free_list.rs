//! General free list.
//!
//! Circular, doubly linked and unordered. Links live in the payload of each
//! free block (`next` at offset 0, `prev` at offset 8). The list head is a
//! sentinel node that is never a heap address; its own links are kept in
//! the [`FreeList`] value.

use tagheap_membrane::PageProvider;

use super::layout::{LINK_SIZE, payload_of, read_tag};

/// Address that stands for the sentinel node.
pub const SENTINEL: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct FreeList {
    head_next: usize,
    head_prev: usize,
    len: usize,
}

fn next_link(block: usize) -> usize {
    payload_of(block)
}

fn prev_link(block: usize) -> usize {
    payload_of(block) + LINK_SIZE
}

impl FreeList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head_next: SENTINEL,
            head_prev: SENTINEL,
            len: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Most recently inserted block.
    #[must_use]
    pub fn head(&self) -> Option<usize> {
        (self.head_next != SENTINEL).then_some(self.head_next)
    }

    /// `(next, prev)` links of `node`.
    pub fn links<P: PageProvider + ?Sized>(&self, pages: &P, node: usize) -> (usize, usize) {
        if node == SENTINEL {
            (self.head_next, self.head_prev)
        } else {
            (pages.load_addr(next_link(node)), pages.load_addr(prev_link(node)))
        }
    }

    fn set_next<P: PageProvider + ?Sized>(&mut self, pages: &mut P, node: usize, value: usize) {
        if node == SENTINEL {
            self.head_next = value;
        } else {
            pages.store_addr(next_link(node), value);
        }
    }

    fn set_prev<P: PageProvider + ?Sized>(&mut self, pages: &mut P, node: usize, value: usize) {
        if node == SENTINEL {
            self.head_prev = value;
        } else {
            pages.store_addr(prev_link(node), value);
        }
    }

    /// Pushes `block` right after the sentinel.
    pub fn insert_head<P: PageProvider + ?Sized>(&mut self, pages: &mut P, block: usize) {
        let first = self.head_next;
        self.set_next(pages, block, first);
        self.set_prev(pages, block, SENTINEL);
        self.set_prev(pages, first, block);
        self.head_next = block;
        self.len += 1;
    }

    /// Unlinks `block` and nulls its link fields.
    pub fn remove<P: PageProvider + ?Sized>(&mut self, pages: &mut P, block: usize) {
        let (next, prev) = self.links(pages, block);
        self.set_next(pages, prev, next);
        self.set_prev(pages, next, prev);
        pages.store_addr(next_link(block), 0);
        pages.store_addr(prev_link(block), 0);
        self.len = self.len.saturating_sub(1);
    }

    /// First block from the head whose size is at least `size`.
    pub fn first_fit<P: PageProvider + ?Sized>(&self, pages: &P, size: usize) -> Option<usize> {
        let mut node = self.head_next;
        while node != SENTINEL {
            if read_tag(pages, node).size >= size {
                return Some(node);
            }
            node = pages.load_addr(next_link(node));
        }
        None
    }

    /// Blocks in list order, head first.
    ///
    /// The walk stops after `len + 1` entries or at the first link that
    /// leaves the heap, so a damaged list shows up as a length mismatch
    /// instead of an endless loop.
    pub fn blocks<P: PageProvider + ?Sized>(&self, pages: &P) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len);
        let mut node = self.head_next;
        while node != SENTINEL && out.len() <= self.len {
            out.push(node);
            if !pages.contains(next_link(node), 2 * LINK_SIZE) {
                break;
            }
            node = pages.load_addr(next_link(node));
        }
        out
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}
