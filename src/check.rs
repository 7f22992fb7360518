use crate::arena::Arena;
use crate::block::{self, Addr, MIN_BLOCK_SIZE, WORD_SIZE};
use crate::heap::{BlockInfo, Heap};

/// Validity contains a representation of all invalid states found in a
/// heap.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Validity {
    /// Number of blocks smaller than a minimum block.
    ///
    /// This likely indicates corruption.
    pub undersized: usize,
    /// Number of free blocks whose footer doesn't match their header.
    pub footer_mismatches: usize,
    /// Number of blocks (sentinel included) whose `PrecedingUsed` tag
    /// disagrees with the block before them.
    pub stale_preceding_tags: usize,
    /// Number of free blocks directly after another free block, and not
    /// merged with it.
    pub adjacent_free: usize,
    /// Number of free blocks that can't be reached from the free list.
    pub unlisted: usize,
    /// Number of free-list entries that are not free blocks of this heap.
    ///
    /// The walk stops at the first one, so this is at most 1.
    pub stray_entries: usize,
    /// Number of free-list entries whose `prev` doesn't point back at the
    /// entry before them, plus one if the list never ends.
    pub broken_links: usize,
    /// The blocks don't tile the heap exactly from the head slot to the
    /// sentinel.
    pub size_mismatch: bool,
}

impl Validity {
    /// Returns a boolean - a simple check if all cases are 0
    pub fn is_valid(&self) -> bool {
        self.undersized == 0
            && self.footer_mismatches == 0
            && self.stale_preceding_tags == 0
            && self.adjacent_free == 0
            && self.unlisted == 0
            && self.stray_entries == 0
            && self.broken_links == 0
            && !self.size_mismatch
    }
}

impl From<Validity> for bool {
    fn from(v: Validity) -> bool {
        v.is_valid()
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Bytes obtained from the arena, head slot and sentinel included.
    pub heap_size: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub used_blocks: usize,
    pub used_bytes: usize,
}

impl<A: Arena> Heap<A> {
    /// Walk the whole heap and its free list, and report anything that
    /// breaks the heap's invariants, along with some statistics.
    ///
    /// This never trusts the free list to be well formed, so it is safe to
    /// run on a corrupted heap (as long as the corruption stays inside the
    /// arena).
    pub fn check(&self) -> (Validity, Stats) {
        let mut validity = Validity::default();
        let mut stats = Stats {
            heap_size: self.arena().len(),
            ..Default::default()
        };
        let sentinel = self.sentinel();

        let mut previous: Option<BlockInfo> = None;
        let mut blocks = self.blocks();
        for info in &mut blocks {
            stats.blocks += 1;

            if info.size < MIN_BLOCK_SIZE {
                validity.undersized += 1;
            }

            let preceding_used = previous.map_or(true, |p| p.used);
            if info.preceding_used != preceding_used {
                validity.stale_preceding_tags += 1;
            }

            if info.used {
                stats.used_blocks += 1;
                stats.used_bytes += info.size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += info.size;

                if !preceding_used {
                    validity.adjacent_free += 1;
                }

                let header = block::read(self.arena(), info.addr);
                if info.size < WORD_SIZE
                    || info.end() > sentinel
                    || block::read_footer_before(self.arena(), info.end()) != header
                {
                    validity.footer_mismatches += 1;
                }
            }

            previous = Some(info);
        }

        // The walk must end exactly at the sentinel, and the sentinel must
        // know about the last block.
        if blocks.cursor != sentinel
            || stats.free_bytes + stats.used_bytes + 2 * WORD_SIZE != stats.heap_size
        {
            validity.size_mismatch = true;
        } else {
            let tags = block::read(self.arena(), sentinel);
            if !tags.is_used() || tags.size() != 0 {
                validity.size_mismatch = true;
            }
            if tags.preceding_used() != previous.map_or(true, |p| p.used) {
                validity.stale_preceding_tags += 1;
            }
        }

        let listed = self.check_free_list(&mut validity, stats.blocks);
        validity.unlisted = stats.free_blocks.saturating_sub(listed);

        (validity, stats)
    }

    // Walk the free list without the usual accessors, which assume it's
    // sound. Returns the number of valid entries seen.
    fn check_free_list(&self, validity: &mut Validity, block_count: usize) -> usize {
        let arena = self.arena();
        let mut listed = 0;
        let mut expected_prev: Option<Addr> = None;
        let mut cursor = self.free_list().head(arena);

        while let Some(entry) = cursor {
            if listed > block_count {
                // More entries than blocks: the list loops.
                validity.broken_links += 1;
                break;
            }

            match self.blocks().find(|b| b.addr == entry) {
                Some(info) if !info.used => {}
                _ => {
                    validity.stray_entries += 1;
                    break;
                }
            }

            let (next, prev) = crate::freelist::links(arena, entry);
            if prev != expected_prev {
                validity.broken_links += 1;
            }

            listed += 1;
            expected_prev = Some(entry);
            cursor = next;
        }

        listed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::arena::ToyArena;
    use crate::block::{SizeAndTags, Tag, Words};

    use test_log::test;

    // Heap with a used block at 8 (72 bytes), a free block at 80 (88 bytes)
    // and the sentinel at 168.
    fn heap(buffer: &mut [u8]) -> Heap<ToyArena<'_>> {
        let mut heap = Heap::init(ToyArena::new(buffer)).unwrap();
        heap.allocate(64).unwrap().unwrap();
        heap
    }

    #[test]
    fn test_fresh_heap_is_valid() {
        let mut buffer = [0u8; 1024];
        let heap = heap(&mut buffer);
        let (validity, stats) = heap.check();
        assert!(validity.is_valid(), "{:?}", validity);
        assert!(bool::from(validity));
        assert_eq!(
            stats,
            Stats {
                heap_size: 176,
                blocks: 2,
                free_blocks: 1,
                free_bytes: 88,
                used_blocks: 1,
                used_bytes: 72,
            }
        );
    }

    #[test]
    fn test_detects_footer_mismatch() {
        let mut buffer = [0u8; 1024];
        let heap = heap(&mut buffer);
        let mut arena = heap.into_arena();
        arena.store(160, 0);
        let heap = Heap::from_parts(arena);
        let (validity, _) = heap.check();
        assert_eq!(validity.footer_mismatches, 1);
        assert!(!validity.is_valid());
    }

    #[test]
    fn test_detects_stale_tag_and_unlisted_block() {
        let mut buffer = [0u8; 1024];
        let heap = heap(&mut buffer);
        let mut arena = heap.into_arena();
        // Mark the used block free without telling anyone.
        block::encode(&mut arena, 8, SizeAndTags::new(72).with(Tag::PrecedingUsed));
        let heap = Heap::from_parts(arena);
        let (validity, stats) = heap.check();
        assert_eq!(stats.free_blocks, 2);
        // The free block at 80 still claims a used predecessor.
        assert_eq!(validity.stale_preceding_tags, 1);
        assert_eq!(validity.adjacent_free, 1);
        assert_eq!(validity.unlisted, 1);
    }

    #[test]
    fn test_detects_stray_entry() {
        let mut buffer = [0u8; 1024];
        let heap = heap(&mut buffer);
        let mut arena = heap.into_arena();
        // Point the head at the used block.
        arena.store(0, 8);
        let heap = Heap::from_parts(arena);
        let (validity, _) = heap.check();
        assert_eq!(validity.stray_entries, 1);
        assert_eq!(validity.unlisted, 1);
    }

    #[test]
    fn test_detects_loop() {
        let mut buffer = [0u8; 1024];
        let heap = heap(&mut buffer);
        let mut arena = heap.into_arena();
        // next of the only free block points at itself.
        arena.store(88, 80);
        let heap = Heap::from_parts(arena);
        let (validity, _) = heap.check();
        assert!(validity.broken_links >= 1);
    }

    #[test]
    fn test_detects_size_mismatch() {
        let mut buffer = [0u8; 1024];
        let heap = heap(&mut buffer);
        let mut arena = heap.into_arena();
        // Shrink the used block; the walk no longer lands on the sentinel.
        arena.store(8, 64 | 0b11);
        let heap = Heap::from_parts(arena);
        let (validity, _) = heap.check();
        assert!(validity.size_mismatch);
    }
}
