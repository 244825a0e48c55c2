//! Page-provider contract.
//!
//! The allocator never maps memory itself. It sees the heap as the address
//! range `[heap_start, heap_end)` and asks for one more page when it runs
//! dry. Addresses are plain `usize` values; a provider exposes the bytes of
//! the current range and this trait supplies checked little-endian loads and
//! stores on top of them.
//!
//! An address outside the current range is never a recoverable condition:
//! the allocator only dereferences addresses it has already validated, so a
//! miss here means the heap metadata is corrupt. The accessors panic with the
//! offending address instead of reading garbage.

use std::ops::Range;

use thiserror::Error;

/// Reasons a provider refuses to grow the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GrowError {
    /// The configured maximum heap size would be exceeded.
    #[error("heap limit of {max_bytes} bytes reached")]
    LimitReached { max_bytes: usize },
    /// The next page would not fit in the address space.
    #[error("heap address space exhausted")]
    AddressOverflow,
}

/// Backing memory for one heap.
pub trait PageProvider {
    /// First address of the heap.
    fn heap_start(&self) -> usize;

    /// One past the last address of the heap.
    fn heap_end(&self) -> usize;

    /// Bytes added by each successful [`grow`](Self::grow).
    fn page_size(&self) -> usize;

    /// Extends the heap by one page.
    ///
    /// Returns the address of the new page, which is the heap end before
    /// the call.
    fn grow(&mut self) -> Result<usize, GrowError>;

    /// The bytes of `[heap_start, heap_end)`.
    fn bytes(&self) -> &[u8];

    /// Mutable view of `[heap_start, heap_end)`.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Returns true before the first page has been handed out.
    fn is_empty(&self) -> bool {
        self.heap_start() == self.heap_end()
    }

    /// Translates `[addr, addr + len)` into an index range of [`bytes`](Self::bytes).
    fn index_range(&self, addr: usize, len: usize) -> Option<Range<usize>> {
        let start = addr.checked_sub(self.heap_start())?;
        let end = start.checked_add(len)?;
        (end <= self.bytes().len()).then_some(start..end)
    }

    /// Returns true if `[addr, addr + len)` lies inside the heap.
    fn contains(&self, addr: usize, len: usize) -> bool {
        self.index_range(addr, len).is_some()
    }

    /// Bounds-checked view of `len` bytes at `addr`.
    #[track_caller]
    fn span(&self, addr: usize, len: usize) -> &[u8] {
        match self.index_range(addr, len) {
            Some(range) => &self.bytes()[range],
            None => out_of_bounds(addr, len, self.heap_start(), self.heap_end()),
        }
    }

    /// Bounds-checked mutable view of `len` bytes at `addr`.
    #[track_caller]
    fn span_mut(&mut self, addr: usize, len: usize) -> &mut [u8] {
        match self.index_range(addr, len) {
            Some(range) => &mut self.bytes_mut()[range],
            None => out_of_bounds(addr, len, self.heap_start(), self.heap_end()),
        }
    }

    #[track_caller]
    fn load_u32(&self, addr: usize) -> u32 {
        let mut raw = [0_u8; 4];
        raw.copy_from_slice(self.span(addr, 4));
        u32::from_le_bytes(raw)
    }

    #[track_caller]
    fn store_u32(&mut self, addr: usize, value: u32) {
        self.span_mut(addr, 4).copy_from_slice(&value.to_le_bytes());
    }

    #[track_caller]
    fn load_u64(&self, addr: usize) -> u64 {
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(self.span(addr, 8));
        u64::from_le_bytes(raw)
    }

    #[track_caller]
    fn store_u64(&mut self, addr: usize, value: u64) {
        self.span_mut(addr, 8).copy_from_slice(&value.to_le_bytes());
    }

    /// Loads an address stored as an 8-byte little-endian word.
    ///
    /// Values that do not fit in `usize` saturate to `usize::MAX`.
    #[track_caller]
    fn load_addr(&self, addr: usize) -> usize {
        usize::try_from(self.load_u64(addr)).unwrap_or(usize::MAX)
    }

    /// Stores an address as an 8-byte little-endian word.
    #[track_caller]
    fn store_addr(&mut self, addr: usize, value: usize) {
        self.store_u64(addr, value as u64);
    }

    /// Copies `len` bytes from `src` to `dst`; the ranges may overlap.
    #[track_caller]
    fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        if len == 0 {
            return;
        }
        let Some(from) = self.index_range(src, len) else {
            out_of_bounds(src, len, self.heap_start(), self.heap_end())
        };
        let Some(to) = self.index_range(dst, len) else {
            out_of_bounds(dst, len, self.heap_start(), self.heap_end())
        };
        self.bytes_mut().copy_within(from, to.start);
    }

    /// Sets `len` bytes at `addr` to `byte`.
    #[track_caller]
    fn fill(&mut self, addr: usize, len: usize, byte: u8) {
        self.span_mut(addr, len).fill(byte);
    }
}

#[cold]
#[track_caller]
fn out_of_bounds(addr: usize, len: usize, start: usize, end: usize) -> ! {
    panic!("heap access out of bounds: {len} bytes at {addr:#x} outside [{start:#x}, {end:#x})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::PageArena;
    use crate::config::ArenaConfig;

    fn one_page() -> PageArena {
        let mut arena = PageArena::new(ArenaConfig::default()).unwrap();
        arena.grow().unwrap();
        arena
    }

    #[test]
    fn empty_until_first_grow() {
        let mut arena = PageArena::new(ArenaConfig::default()).unwrap();
        assert!(arena.is_empty());
        arena.grow().unwrap();
        assert!(!arena.is_empty());
    }

    #[test]
    fn words_are_little_endian() {
        let mut arena = one_page();
        let base = arena.heap_start();
        arena.store_u32(base, 0x0403_0201);
        assert_eq!(arena.span(base, 4), &[1, 2, 3, 4]);
        assert_eq!(arena.load_u32(base), 0x0403_0201);

        arena.store_u64(base + 8, 0x0807_0605_0403_0201);
        assert_eq!(arena.load_u64(base + 8), 0x0807_0605_0403_0201);
    }

    #[test]
    fn addresses_round_trip() {
        let mut arena = one_page();
        let base = arena.heap_start();
        arena.store_addr(base + 16, base + 128);
        assert_eq!(arena.load_addr(base + 16), base + 128);
        arena.store_addr(base + 16, usize::MAX);
        assert_eq!(arena.load_addr(base + 16), usize::MAX);
    }

    #[test]
    fn contains_respects_both_edges() {
        let arena = one_page();
        let start = arena.heap_start();
        let end = arena.heap_end();
        assert!(arena.contains(start, 8));
        assert!(arena.contains(end - 8, 8));
        assert!(!arena.contains(end - 4, 8));
        assert!(!arena.contains(start - 1, 1));
        assert!(!arena.contains(usize::MAX, 2));
    }

    #[test]
    fn copy_within_handles_overlap() {
        let mut arena = one_page();
        let base = arena.heap_start();
        arena.span_mut(base, 6).copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        arena.copy_within(base, base + 2, 4);
        assert_eq!(arena.span(base, 6), &[1, 2, 1, 2, 3, 4]);
    }

    #[test]
    fn fill_sets_every_byte() {
        let mut arena = one_page();
        let base = arena.heap_start();
        arena.fill(base + 32, 16, 0xAB);
        assert!(arena.span(base + 32, 16).iter().all(|&b| b == 0xAB));
    }

    #[test]
    #[should_panic(expected = "heap access out of bounds")]
    fn load_past_end_panics() {
        let arena = one_page();
        let _ = arena.load_u64(arena.heap_end() - 4);
    }

    #[test]
    #[should_panic(expected = "heap access out of bounds")]
    fn store_below_start_panics() {
        let mut arena = one_page();
        let below = arena.heap_start() - 8;
        arena.store_u32(below, 1);
    }
}
