use crate::block::{self, Addr, Words, WORD_SIZE};

// Offsets of the links inside a free block. They overlay the first payload
// words, so they are only meaningful while the block is tagged free.
const NEXT_OFFSET: usize = WORD_SIZE;
const PREV_OFFSET: usize = 2 * WORD_SIZE;

// No block header can live at address 0 (at most the head slot can), so 0
// stands in for "no link".
const NIL: usize = 0;

fn decode_link(raw: usize) -> Option<Addr> {
    if raw == NIL {
        None
    } else {
        Some(raw)
    }
}

fn encode_link(link: Option<Addr>) -> usize {
    link.unwrap_or(NIL)
}

/// A `FreeList` is a doubly-linked list threaded through the free blocks of a
/// heap.
///
/// The list owns no memory: its head lives in a slot on the heap itself (the
/// heap's first word), and its links live inside the free blocks. This struct
/// only remembers where the head slot is.
///
/// Insertion is LIFO, and searches are first-fit from the head.
///
/// Invariants, maintained by the heap:
///
/// - every listed block is tagged free, and every free block is listed;
/// - `prev` of the head is nil, and for every other block `prev.next` is the
///   block itself.
#[derive(Copy, Clone, Debug)]
pub struct FreeList {
    head_slot: Addr,
}

impl FreeList {
    /// A list whose head is stored at `head_slot`.
    pub const fn at(head_slot: Addr) -> Self {
        FreeList { head_slot }
    }

    pub fn head<M: Words + ?Sized>(&self, mem: &M) -> Option<Addr> {
        decode_link(mem.load(self.head_slot))
    }

    /// Point the head slot at `block`, with no other bookkeeping.
    pub fn set_head<M: Words + ?Sized>(&self, mem: &mut M, block: Option<Addr>) {
        mem.store(self.head_slot, encode_link(block));
    }

    pub fn is_empty<M: Words + ?Sized>(&self, mem: &M) -> bool {
        self.head(mem).is_none()
    }

    /// The block after `block` in list order.
    pub fn next<M: Words + ?Sized>(mem: &M, block: Addr) -> Option<Addr> {
        debug_assert_free(mem, block);
        decode_link(mem.load(block + NEXT_OFFSET))
    }

    /// The block before `block` in list order.
    pub fn prev<M: Words + ?Sized>(mem: &M, block: Addr) -> Option<Addr> {
        debug_assert_free(mem, block);
        decode_link(mem.load(block + PREV_OFFSET))
    }

    fn set_next<M: Words + ?Sized>(mem: &mut M, block: Addr, next: Option<Addr>) {
        debug_assert_free(mem, block);
        mem.store(block + NEXT_OFFSET, encode_link(next));
    }

    fn set_prev<M: Words + ?Sized>(mem: &mut M, block: Addr, prev: Option<Addr>) {
        debug_assert_free(mem, block);
        mem.store(block + PREV_OFFSET, encode_link(prev));
    }

    /// Walk the list from the head and return the first block of at least
    /// `min_size` bytes.
    pub fn search_first_fit<M: Words + ?Sized>(&self, mem: &M, min_size: usize) -> Option<Addr> {
        self.iter(mem)
            .find(|&block| block::read(mem, block).size() >= min_size)
    }

    /// Push `block` onto the front of the list. `block` must already be tagged
    /// free and must not be listed.
    pub fn insert_at_head<M: Words + ?Sized>(&self, mem: &mut M, block: Addr) {
        let old_head = self.head(mem);
        Self::set_next(mem, block, old_head);
        Self::set_prev(mem, block, None);
        if let Some(old_head) = old_head {
            Self::set_prev(mem, old_head, Some(block));
        }
        self.set_head(mem, Some(block));
    }

    /// Unlink `block`.
    ///
    /// `block` must be listed; removing anything else corrupts the list, and
    /// is caught by debug assertions where it can be.
    pub fn remove<M: Words + ?Sized>(&self, mem: &mut M, block: Addr) {
        let next = Self::next(mem, block);
        let prev = Self::prev(mem, block);

        if let Some(next) = next {
            debug_assert_eq!(Self::prev(mem, next), Some(block), "broken back link");
            Self::set_prev(mem, next, prev);
        }

        match prev {
            None => {
                debug_assert_eq!(
                    self.head(mem),
                    Some(block),
                    "removing unlinked block {:#x}",
                    block
                );
                self.set_head(mem, next);
            }
            Some(prev) => {
                debug_assert_eq!(Self::next(mem, prev), Some(block), "broken forward link");
                Self::set_next(mem, prev, next);
            }
        }
    }

    /// Put `new` in the list position `old` holds, unlinking `old`.
    ///
    /// `new` must already be tagged free, and `old` must still be tagged free
    /// while this runs.
    pub fn replace<M: Words + ?Sized>(&self, mem: &mut M, old: Addr, new: Addr) {
        let next = Self::next(mem, old);
        let prev = Self::prev(mem, old);

        Self::set_next(mem, new, next);
        Self::set_prev(mem, new, prev);
        if let Some(next) = next {
            Self::set_prev(mem, next, Some(new));
        }
        match prev {
            None => self.set_head(mem, Some(new)),
            Some(prev) => Self::set_next(mem, prev, Some(new)),
        }
    }

    /// Iterate over block addresses in list order.
    pub fn iter<'m, M: Words + ?Sized>(&self, mem: &'m M) -> FreeIter<'m, M> {
        FreeIter {
            mem,
            next: self.head(mem),
        }
    }
}

/// The raw `(next, prev)` links stored in `block`, whether or not it is
/// actually free.
pub(crate) fn links<M: Words + ?Sized>(mem: &M, block: Addr) -> (Option<Addr>, Option<Addr>) {
    (
        decode_link(mem.load(block + NEXT_OFFSET)),
        decode_link(mem.load(block + PREV_OFFSET)),
    )
}

fn debug_assert_free<M: Words + ?Sized>(mem: &M, block: Addr) {
    debug_assert!(
        !block::read(mem, block).is_used(),
        "free-list link access on used block {:#x}",
        block
    );
}

/// Iterator over the blocks of a [`FreeList`](struct.FreeList.html), head
/// first.
pub struct FreeIter<'m, M: ?Sized> {
    mem: &'m M,
    next: Option<Addr>,
}

impl<'m, M: Words + ?Sized> Iterator for FreeIter<'m, M> {
    type Item = Addr;

    fn next(&mut self) -> Option<Addr> {
        let block = self.next.take()?;
        self.next = FreeList::next(self.mem, block);
        Some(block)
    }
}
