//! Block layout and boundary-tag encoding.
//!
//! Every block starts with an 8-byte header:
//!
//! ```text
//!  0               4               8
//!  +---------------+---------------+----------------------------+
//!  | size | flags  | requested     | payload / links ...        |
//!  +---------------+---------------+----------------------------+
//! ```
//!
//! `size` is a multiple of [`ROW_ALIGNMENT`], so its low bits carry
//! [`THIS_BLOCK_ALLOCATED`] and [`PREV_BLOCK_ALLOCATED`]. Free blocks repeat
//! the header in their last 8 bytes (the footer) so the following block can
//! find its predecessor; allocated blocks have no footer.
//!
//! The heap itself is bracketed by sentinels:
//!
//! ```text
//! heap_start                                               heap_end
//! | pad 8 | prologue 32 (hdr..ftr) | blocks ... | epilogue 8 |
//! ```

use tagheap_membrane::PageProvider;

/// Bytes in a block header.
pub const HEADER_SIZE: usize = 8;
/// Bytes in a free block's footer.
pub const FOOTER_SIZE: usize = 8;
/// Bytes in one free-list link.
pub const LINK_SIZE: usize = 8;
/// Alignment of block sizes and payload addresses.
pub const ROW_ALIGNMENT: usize = 16;
/// Header, footer and two links.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + FOOTER_SIZE + 2 * LINK_SIZE;

pub const THIS_BLOCK_ALLOCATED: u32 = 0x1;
pub const PREV_BLOCK_ALLOCATED: u32 = 0x2;
pub const FLAG_MASK: u32 = THIS_BLOCK_ALLOCATED | PREV_BLOCK_ALLOCATED;
pub const BLOCK_SIZE_MASK: u32 = !FLAG_MASK;

/// Largest block size the 32-bit size field can hold.
pub const MAX_BLOCK_SIZE: usize = 0xFFFF_FFF0;

/// Padding before the prologue that puts every payload on a row boundary.
pub const PROLOGUE_PADDING: usize = 8;
/// Padding plus the prologue block.
pub const PROLOGUE_SIZE: usize = PROLOGUE_PADDING + MIN_BLOCK_SIZE;
/// The epilogue is a bare header.
pub const EPILOGUE_SIZE: usize = HEADER_SIZE;
/// Heap bytes consumed by the two sentinels.
pub const SENTINEL_OVERHEAD: usize = PROLOGUE_SIZE + EPILOGUE_SIZE;

/// Decoded header (or footer) of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockTag {
    /// Total block size in bytes, header included.
    pub size: usize,
    /// Bytes the caller asked for; zero for free and cached blocks.
    pub requested: usize,
    pub allocated: bool,
    pub prev_allocated: bool,
}

impl BlockTag {
    #[must_use]
    pub const fn free(size: usize, prev_allocated: bool) -> Self {
        Self {
            size,
            requested: 0,
            allocated: false,
            prev_allocated,
        }
    }

    #[must_use]
    pub const fn allocated(size: usize, requested: usize, prev_allocated: bool) -> Self {
        Self {
            size,
            requested,
            allocated: true,
            prev_allocated,
        }
    }

    /// The zero-size allocated header that ends the heap.
    #[must_use]
    pub const fn epilogue(prev_allocated: bool) -> Self {
        Self::allocated(0, 0, prev_allocated)
    }

    #[must_use]
    pub const fn is_epilogue(&self) -> bool {
        self.size == 0 && self.allocated
    }

    /// Packs the tag into its 8-byte on-heap form.
    #[must_use]
    pub fn encode(&self) -> u64 {
        debug_assert!(self.size <= MAX_BLOCK_SIZE, "block size {:#x}", self.size);
        debug_assert!(self.requested <= MAX_BLOCK_SIZE, "requested {:#x}", self.requested);
        let mut word = (self.size as u32) & BLOCK_SIZE_MASK;
        if self.allocated {
            word |= THIS_BLOCK_ALLOCATED;
        }
        if self.prev_allocated {
            word |= PREV_BLOCK_ALLOCATED;
        }
        (u64::from(self.requested as u32) << 32) | u64::from(word)
    }

    #[must_use]
    pub fn decode(raw: u64) -> Self {
        let word = raw as u32;
        Self {
            size: (word & BLOCK_SIZE_MASK) as usize,
            requested: (raw >> 32) as usize,
            allocated: word & THIS_BLOCK_ALLOCATED != 0,
            prev_allocated: word & PREV_BLOCK_ALLOCATED != 0,
        }
    }
}

/// Block size needed to serve `requested` bytes.
///
/// Adds the header, rounds up to the row alignment and raises the result to
/// the minimum block size. `None` when the result would not fit the size
/// field.
#[must_use]
pub fn padded_size(requested: usize) -> Option<usize> {
    let size = requested
        .checked_add(HEADER_SIZE)?
        .checked_next_multiple_of(ROW_ALIGNMENT)?
        .max(MIN_BLOCK_SIZE);
    (size <= MAX_BLOCK_SIZE).then_some(size)
}

#[must_use]
pub const fn payload_of(block: usize) -> usize {
    block + HEADER_SIZE
}

#[must_use]
pub const fn footer_of(block: usize, size: usize) -> usize {
    block + size - FOOTER_SIZE
}

pub fn read_tag<P: PageProvider + ?Sized>(pages: &P, addr: usize) -> BlockTag {
    BlockTag::decode(pages.load_u64(addr))
}

/// Writes a header at `block`, leaving any footer alone.
pub fn write_tag<P: PageProvider + ?Sized>(pages: &mut P, block: usize, tag: BlockTag) {
    pages.store_u64(block, tag.encode());
}

/// Formats a free block: identical header and footer.
pub fn write_free_block<P: PageProvider + ?Sized>(
    pages: &mut P,
    block: usize,
    size: usize,
    prev_allocated: bool,
) {
    let raw = BlockTag::free(size, prev_allocated).encode();
    pages.store_u64(block, raw);
    pages.store_u64(footer_of(block, size), raw);
}

pub fn write_allocated_block<P: PageProvider + ?Sized>(
    pages: &mut P,
    block: usize,
    size: usize,
    requested: usize,
    prev_allocated: bool,
) {
    write_tag(pages, block, BlockTag::allocated(size, requested, prev_allocated));
}

pub fn set_requested_size<P: PageProvider + ?Sized>(pages: &mut P, block: usize, requested: usize) {
    let tag = read_tag(pages, block);
    write_tag(pages, block, BlockTag { requested, ..tag });
}

/// Header address of the block that follows `block`.
pub fn next_block<P: PageProvider + ?Sized>(pages: &P, block: usize) -> usize {
    block + read_tag(pages, block).size
}

/// Header address of the block before `block`, found through its footer.
///
/// Only meaningful when the predecessor is free.
pub fn previous_block<P: PageProvider + ?Sized>(pages: &P, block: usize) -> usize {
    block - read_tag(pages, block - FOOTER_SIZE).size
}

/// Rewrites the previous-allocated flag of `block`, footer included when free.
pub fn set_prev_allocated<P: PageProvider + ?Sized>(
    pages: &mut P,
    block: usize,
    prev_allocated: bool,
) {
    let tag = read_tag(pages, block);
    if tag.prev_allocated == prev_allocated {
        return;
    }
    let updated = BlockTag {
        prev_allocated,
        ..tag
    };
    write_tag(pages, block, updated);
    if !tag.allocated {
        pages.store_u64(footer_of(block, tag.size), updated.encode());
    }
}

/// Copies the allocation state of `block` into its successor's flag.
pub fn propagate_state<P: PageProvider + ?Sized>(pages: &mut P, block: usize) {
    let tag = read_tag(pages, block);
    set_prev_allocated(pages, block + tag.size, tag.allocated);
}
