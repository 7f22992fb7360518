//! The allocator proper: a heap of boundary-tagged blocks inside an
//! [`Arena`](../arena/trait.Arena.html).
//!
//! ```text
//!   lowest_address                                        highest_address
//!   |                                                                   |
//!   +------+--------------+--------------+-----+--------------+---------+
//!   | head | block        | block        | ... | block        | sentinel|
//!   +------+--------------+--------------+-----+--------------+---------+
//! ```
//!
//! `head` is the first block of the free list; the sentinel is a used block
//! of size 0 that stops forward walks.
//!
//! A `Heap` is single-threaded: every operation takes `&mut self`. To share
//! one, wrap it in a [`LockedHeap`](../locked/struct.LockedHeap.html).

use core::fmt;
use core::ops::Range;

use log::{debug, trace};

use crate::arena::{round_up, Arena};
use crate::block::{self, block_size, Addr, SizeAndTags, Tag, ALIGNMENT, MIN_BLOCK_SIZE, WORD_SIZE};
use crate::coalesce::coalesce;
use crate::error::HeapError;
use crate::freelist::{FreeIter, FreeList};

/// What `release` did with a pointer.
///
/// Releasing something that isn't a live allocation is tolerated and does
/// nothing, but the outcome says which case it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The block was freed (and possibly merged with its neighbours).
    Freed,
    IgnoredNull,
    /// The pointer can't be the payload of a block on this heap.
    IgnoredOutOfRange,
    /// The block is already free; most likely a double free.
    IgnoredAlreadyFree,
}

impl Release {
    pub fn is_freed(self) -> bool {
        self == Release::Freed
    }
}

/// A block as found by walking the heap in memory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub addr: Addr,
    pub size: usize,
    pub used: bool,
    pub preceding_used: bool,
}

impl BlockInfo {
    /// The address handed out to callers for this block.
    pub fn payload(&self) -> Addr {
        self.addr + WORD_SIZE
    }

    /// The address of the block after this one.
    pub fn end(&self) -> Addr {
        self.addr.saturating_add(self.size)
    }
}

/// Iterator over the blocks of a heap, lowest address first.
pub struct Blocks<'h, A> {
    arena: &'h A,
    pub(crate) cursor: Addr,
    sentinel: Addr,
}

impl<'h, A: Arena> Iterator for Blocks<'h, A> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.cursor >= self.sentinel {
            return None;
        }
        let tags = block::read(self.arena, self.cursor);
        if tags.size() == 0 {
            // A premature sentinel; the checker reports it.
            return None;
        }
        let info = BlockInfo {
            addr: self.cursor,
            size: tags.size(),
            used: tags.is_used(),
            preceding_used: tags.preceding_used(),
        };
        self.cursor = info.end();
        Some(info)
    }
}

/// A heap with an explicit free list, living in an arena of type `A`.
///
/// Allocation is first-fit over a LIFO free list, splitting off whatever is
/// left when the remainder can stand alone as a block. Release merges the
/// block with free neighbours immediately, so no two free blocks are ever
/// adjacent.
///
/// Note: It never returns memory to the arena; that is not implemented.
pub struct Heap<A> {
    arena: A,
    free: FreeList,
}

impl<A: Arena> Heap<A> {
    /// Set up a heap in an empty arena.
    ///
    /// The heap starts with a single minimum-sized free block and grows on
    /// demand.
    pub fn init(mut arena: A) -> Result<Self, HeapError<A::Err>> {
        if !arena.is_empty() {
            return Err(HeapError::ArenaNotEmpty);
        }
        let lo = arena.lowest_address();
        if lo % ALIGNMENT != 0 {
            return Err(HeapError::MisalignedBase(lo));
        }
        let page_size = arena.page_size();
        if page_size % ALIGNMENT != 0 || page_size < MIN_BLOCK_SIZE {
            return Err(HeapError::BadPageSize(page_size));
        }

        // Head slot, one minimum block, sentinel.
        let init_size = WORD_SIZE + MIN_BLOCK_SIZE + WORD_SIZE;
        let base = arena
            .extend(init_size)
            .map_err(|source| HeapError::Exhausted {
                requested: init_size,
                source,
            })?;
        debug_assert_eq!(base, lo);

        let free = FreeList::at(lo);
        let first = lo + WORD_SIZE;
        // Nothing precedes the first block, which counts as used.
        block::encode(
            &mut arena,
            first,
            SizeAndTags::new(MIN_BLOCK_SIZE).with(Tag::PrecedingUsed),
        );
        block::encode_header(&mut arena, first + MIN_BLOCK_SIZE, SizeAndTags::SENTINEL);
        free.set_head(&mut arena, None);
        free.insert_at_head(&mut arena, first);

        debug!(
            "Initialized heap at {:#x} with page size {}",
            lo, page_size
        );
        Ok(Heap { arena, free })
    }

    // Reattach to an arena that already holds a heap, without checking it.
    #[cfg(test)]
    pub(crate) fn from_parts(arena: A) -> Self {
        let free = FreeList::at(arena.lowest_address());
        Heap { arena, free }
    }

    pub fn arena(&self) -> &A {
        &self.arena
    }

    /// Tear down the heap, handing back the arena and everything in it.
    pub fn into_arena(self) -> A {
        self.arena
    }

    /// The addresses covered by the heap, including the head slot and the
    /// sentinel.
    pub fn bounds(&self) -> Range<Addr> {
        self.arena.lowest_address()..self.arena.highest_address()
    }

    pub(crate) fn sentinel(&self) -> Addr {
        self.arena.highest_address() - WORD_SIZE
    }

    pub(crate) fn free_list(&self) -> &FreeList {
        &self.free
    }

    /// The size of the block `allocate(requested)` would carve out, or `None`
    /// if the request is too large.
    pub fn block_size(requested: usize) -> Option<usize> {
        block_size(requested)
    }

    /// Walk all blocks in memory order.
    pub fn blocks(&self) -> Blocks<'_, A> {
        Blocks {
            arena: &self.arena,
            cursor: self.arena.lowest_address() + WORD_SIZE,
            sentinel: self.sentinel(),
        }
    }

    /// Walk the free list, most recently freed first.
    pub fn free_blocks(&self) -> FreeIter<'_, A> {
        self.free.iter(&self.arena)
    }

    /// Allocate at least `size` bytes, returning the address of the payload.
    ///
    /// Returns `Ok(None)` for a zero-sized request. Grows the arena when no
    /// free block is large enough; if the arena can't grow, that is the end
    /// of the road and `HeapError::Exhausted` comes back.
    pub fn allocate(&mut self, size: usize) -> Result<Option<Addr>, HeapError<A::Err>> {
        if size == 0 {
            return Ok(None);
        }
        let req_size = block_size(size).ok_or(HeapError::RequestTooLarge(size))?;

        loop {
            if let Some(block) = self.free.search_first_fit(&self.arena, req_size) {
                self.split(block, req_size);
                return Ok(Some(block + WORD_SIZE));
            }
            // A growth always leaves a big enough block at the head of the
            // list, so this loops at most once.
            self.grow(req_size)?;
        }
    }

    /// Give the block whose payload is at `ptr` back to the heap.
    ///
    /// Null, out-of-range and already free pointers are ignored.
    pub fn release(&mut self, ptr: Option<Addr>) -> Release {
        let ptr = match ptr {
            None => return Release::IgnoredNull,
            Some(ptr) => ptr,
        };
        let block = match self.block_of(ptr) {
            None => {
                debug!("Ignoring release of {:#x}: not on the heap", ptr);
                return Release::IgnoredOutOfRange;
            }
            Some(block) => block,
        };

        let tags = block::read(&self.arena, block);
        if !tags.is_used() {
            debug!("Ignoring release of {:#x}: already free", ptr);
            return Release::IgnoredAlreadyFree;
        }
        debug_assert!(
            tags.size() >= MIN_BLOCK_SIZE && block + tags.size() <= self.sentinel(),
            "corrupt header at {:#x}: {:?}",
            block,
            tags
        );

        block::clear_flag(&mut self.arena, block, Tag::Used);
        let following = block + tags.size();
        if following < self.arena.highest_address() {
            block::clear_flag(&mut self.arena, following, Tag::PrecedingUsed);
        }

        trace!("Releasing {:#x}:{}", block, tags.size());
        self.free.insert_at_head(&mut self.arena, block);
        coalesce(&mut self.arena, &self.free, block);
        Release::Freed
    }

    /// The bytes owned by the caller for the allocation at `ptr`, or `None`
    /// if `ptr` isn't a live allocation.
    pub fn payload(&self, ptr: Addr) -> Option<&[u8]> {
        let range = self.payload_range(ptr)?;
        Some(&self.arena.memory()[range])
    }

    pub fn payload_mut(&mut self, ptr: Addr) -> Option<&mut [u8]> {
        let range = self.payload_range(ptr)?;
        Some(&mut self.arena.memory_mut()[range])
    }

    // Index range into `memory()` of the payload at `ptr`.
    fn payload_range(&self, ptr: Addr) -> Option<Range<usize>> {
        let block = self.block_of(ptr)?;
        let tags = block::read(&self.arena, block);
        if !tags.is_used() || tags.size() < MIN_BLOCK_SIZE {
            return None;
        }
        if block.checked_add(tags.size())? > self.sentinel() {
            return None;
        }
        let start = ptr - self.arena.lowest_address();
        Some(start..start + tags.size() - WORD_SIZE)
    }

    // The header address for a payload pointer, if one could be there.
    fn block_of(&self, ptr: Addr) -> Option<Addr> {
        let lo = self.arena.lowest_address();
        let block = ptr.checked_sub(WORD_SIZE)?;
        if block < lo + WORD_SIZE || block >= self.sentinel() {
            return None;
        }
        if (block - lo) % ALIGNMENT != 0 {
            return None;
        }
        Some(block)
    }

    // Carve `req_size` bytes off the front of the free block at `block`.
    fn split(&mut self, block: Addr, req_size: usize) {
        let top = self.arena.highest_address();
        let mem = &mut self.arena;

        let tags = block::read(mem, block);
        debug_assert!(!tags.is_used() && tags.size() >= req_size);
        // Free blocks never follow free blocks.
        debug_assert!(tags.preceding_used());

        let leftover = tags.size() - req_size;
        if leftover >= MIN_BLOCK_SIZE {
            // The remainder follows the piece being handed out, so its
            // predecessor is used. It takes over the list slot of `block`.
            let rest = block + req_size;
            block::encode(
                mem,
                rest,
                SizeAndTags::new(leftover).with(Tag::PrecedingUsed),
            );
            self.free.replace(mem, block, rest);
            block::encode_header(
                mem,
                block,
                SizeAndTags::new(req_size)
                    .with(Tag::Used)
                    .with(Tag::PrecedingUsed),
            );
            trace!(
                "Split {:#x}:{} into {} used and {:#x}:{} free",
                block,
                tags.size(),
                req_size,
                rest,
                leftover
            );
        } else {
            self.free.remove(mem, block);
            block::encode_header(mem, block, tags.with(Tag::Used));
            let following = block + tags.size();
            if following < top {
                block::set_flag(mem, following, Tag::PrecedingUsed);
            }
            trace!("Using all of {:#x}:{}", block, tags.size());
        }
    }

    // Get at least `min_bytes` more from the arena, as one free block.
    fn grow(&mut self, min_bytes: usize) -> Result<(), HeapError<A::Err>> {
        let bytes = round_up(min_bytes, self.arena.page_size())
            .ok_or(HeapError::RequestTooLarge(min_bytes))?;
        let old_top = self
            .arena
            .extend(bytes)
            .map_err(|source| HeapError::Exhausted {
                requested: bytes,
                source,
            })?;

        // The new block starts where the old sentinel was, and takes over its
        // knowledge of whether the last block is used.
        let block = old_top - WORD_SIZE;
        let preceding_used = block::read(&self.arena, block).preceding_used();
        block::encode(
            &mut self.arena,
            block,
            SizeAndTags::new(bytes).set(Tag::PrecedingUsed, preceding_used),
        );
        block::encode_header(&mut self.arena, block + bytes, SizeAndTags::SENTINEL);

        self.free.insert_at_head(&mut self.arena, block);
        let merged = coalesce(&mut self.arena, &self.free, block);
        debug!(
            "Grew heap by {} bytes at {:#x}; free block now at {:#x}",
            bytes, block, merged
        );
        Ok(())
    }
}

// Formats an optional link as an address or "nil".
struct Link(Option<Addr>);

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{:#x}", addr),
            None => write!(f, "nil"),
        }
    }
}

impl<A: Arena> fmt::Display for Heap<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Heap(head: {}", Link(self.free.head(&self.arena)))?;
        for info in self.blocks() {
            if info.used {
                write!(f, ", Used({:#x}, {})", info.addr, info.size)?;
            } else {
                write!(
                    f,
                    ", Free({:#x}, {}, next: {}, prev: {})",
                    info.addr,
                    info.size,
                    Link(FreeList::next(&self.arena, info.addr)),
                    Link(FreeList::prev(&self.arena, info.addr)),
                )?;
            }
        }
        write!(f, ")")
    }
}
