//! Boundary tags: the size-and-flags word at the start (and, for free blocks,
//! the end) of every block on the heap.
//!
//! ```text
//!   USED: +---------------+   FREE: +---------------+
//!         |    header     |         |    header     |
//!         +---------------+         +---------------+
//!         |    payload    |         |     next      |
//!         |      ...      |         +---------------+
//!         |               |         |     prev      |
//!         |               |         +---------------+
//!         |               |         |      ...      |
//!         |               |         +---------------+
//!         |               |         |    footer     |
//!         +---------------+         +---------------+
//! ```
//!
//! Sizes are multiples of `ALIGNMENT`, which leaves the low bits of the word
//! free to hold the `Used` and `PrecedingUsed` tags.

use core::fmt;

use static_assertions::const_assert;

/// An address on the heap, in the address space of the arena.
pub type Addr = usize;

/// Every boundary tag, link and heap-level slot is one word.
pub const WORD_SIZE: usize = 8;

/// Block sizes (and therefore payload addresses) are multiples of this.
pub const ALIGNMENT: usize = 8;

/// Header, next link, prev link and footer.
pub const MIN_BLOCK_SIZE: usize = 4 * WORD_SIZE;

const_assert!(core::mem::size_of::<usize>() <= WORD_SIZE);
const_assert!(MIN_BLOCK_SIZE % ALIGNMENT == 0);
const_assert!(ALIGNMENT.is_power_of_two());
// Both tags must fit below the alignment.
const_assert!(ALIGNMENT > 0b11);

/// A single-bit flag stored in the low bits of a boundary tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tag {
    /// This block is handed out to a caller.
    Used = 0b01,
    /// The block immediately before this one in memory is handed out.
    PrecedingUsed = 0b10,
}

impl Tag {
    const fn mask(self) -> usize {
        self as usize
    }
}

/// Strip the tag bits from a raw boundary tag, leaving the block size.
pub const fn extract_size(raw: usize) -> usize {
    raw & !(ALIGNMENT - 1)
}

/// Round `value` up to the next multiple of `ALIGNMENT`. Returns `None` on
/// overflow.
pub fn align_up(value: usize) -> Option<usize> {
    Some(value.checked_add(ALIGNMENT - 1)? & !(ALIGNMENT - 1))
}

/// The size of the block needed to hold `requested` payload bytes: one word
/// of header, rounded up to the alignment, and never below `MIN_BLOCK_SIZE`.
/// Returns `None` on overflow.
pub fn block_size(requested: usize) -> Option<usize> {
    let with_header = align_up(requested.checked_add(WORD_SIZE)?)?;
    Some(with_header.max(MIN_BLOCK_SIZE))
}

/// A decoded boundary tag: an aligned block size with two flags.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SizeAndTags(usize);

impl SizeAndTags {
    /// The word at the top of the heap: no size, and marked used so forward
    /// scans stop there.
    pub const SENTINEL: SizeAndTags = SizeAndTags(Tag::Used as usize);

    /// A free block of `size` bytes whose predecessor is free.
    pub fn new(size: usize) -> Self {
        debug_assert_eq!(size % ALIGNMENT, 0, "unaligned block size {}", size);
        SizeAndTags(size)
    }

    pub const fn from_raw(raw: usize) -> Self {
        SizeAndTags(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    pub const fn size(self) -> usize {
        extract_size(self.0)
    }

    pub const fn has(self, tag: Tag) -> bool {
        self.0 & tag.mask() != 0
    }

    #[must_use]
    pub const fn with(self, tag: Tag) -> Self {
        SizeAndTags(self.0 | tag.mask())
    }

    #[must_use]
    pub const fn without(self, tag: Tag) -> Self {
        SizeAndTags(self.0 & !tag.mask())
    }

    /// Set or clear `tag` depending on `on`.
    #[must_use]
    pub const fn set(self, tag: Tag, on: bool) -> Self {
        if on {
            self.with(tag)
        } else {
            self.without(tag)
        }
    }

    pub const fn is_used(self) -> bool {
        self.has(Tag::Used)
    }

    pub const fn preceding_used(self) -> bool {
        self.has(Tag::PrecedingUsed)
    }
}

impl fmt::Debug for SizeAndTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SizeAndTags({}{}{})",
            self.size(),
            if self.is_used() { " used" } else { "" },
            if self.preceding_used() {
                " preceding-used"
            } else {
                ""
            },
        )
    }
}

/// Word-granular access to heap memory.
///
/// Implementations must check that `addr..addr + WORD_SIZE` lies inside the
/// heap and panic otherwise; the allocator relies on that rather than on
/// trusting its own arithmetic.
pub trait Words {
    fn load(&self, addr: Addr) -> usize;
    fn store(&mut self, addr: Addr, value: usize);
}

/// Decode the header at `addr`.
pub fn read<M: Words + ?Sized>(mem: &M, addr: Addr) -> SizeAndTags {
    SizeAndTags(mem.load(addr))
}

/// Decode the footer of the block that ends right before `addr`.
///
/// Only meaningful if that block is free; used blocks have no footer.
pub fn read_footer_before<M: Words + ?Sized>(mem: &M, addr: Addr) -> SizeAndTags {
    SizeAndTags(mem.load(addr - WORD_SIZE))
}

/// Write `tags` to the header at `addr` only.
pub fn encode_header<M: Words + ?Sized>(mem: &mut M, addr: Addr, tags: SizeAndTags) {
    mem.store(addr, tags.raw());
}

/// Write `tags` to the header at `addr` and to the footer at the end of the
/// block.
///
/// Callers writing a used block must not rely on the footer afterwards: it
/// lies inside the payload.
pub fn encode<M: Words + ?Sized>(mem: &mut M, addr: Addr, tags: SizeAndTags) {
    debug_assert!(
        tags.size() >= WORD_SIZE,
        "can't place a footer in a block of size {}",
        tags.size()
    );
    mem.store(addr, tags.raw());
    mem.store(addr + tags.size() - WORD_SIZE, tags.raw());
}

// Rewrite an existing tag. The footer is only refreshed for free blocks: the
// last word of a used block is payload, and the sentinel has no body at all.
fn retag<M: Words + ?Sized>(mem: &mut M, addr: Addr, tags: SizeAndTags) {
    if tags.is_used() || tags.size() == 0 {
        encode_header(mem, addr, tags);
    } else {
        encode(mem, addr, tags);
    }
}

/// Clear `tag` on the block at `addr`.
pub fn clear_flag<M: Words + ?Sized>(mem: &mut M, addr: Addr, tag: Tag) {
    let tags = read(mem, addr).without(tag);
    retag(mem, addr, tags);
}

/// Set `tag` on the block at `addr`.
pub fn set_flag<M: Words + ?Sized>(mem: &mut M, addr: Addr, tag: Tag) {
    let tags = read(mem, addr).with(tag);
    retag(mem, addr, tags);
}
