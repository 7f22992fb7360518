use log::trace;

use crate::block::{self, Addr, SizeAndTags, Tag, Words, MIN_BLOCK_SIZE};
use crate::freelist::FreeList;

/// Merge the free, listed block at `block` with every free block adjacent to
/// it in memory, and return the address of the resulting block.
///
/// Merged neighbours are unlinked, and if anything merged, the combined block
/// replaces `block` at the head of the list. A block with no free neighbours
/// is left untouched.
///
/// The block after the merged run keeps its tags: whoever freed or created
/// `block` is responsible for that block's `PrecedingUsed` bit.
pub fn coalesce<M: Words + ?Sized>(mem: &mut M, list: &FreeList, block: Addr) -> Addr {
    let old_size = block::read(mem, block).size();
    let mut new_size = old_size;

    // Walk backwards, using the footers of free predecessors.
    let mut leftmost = block;
    while !block::read(mem, leftmost).preceding_used() {
        let size = block::read_footer_before(mem, leftmost).size();
        debug_assert!(
            size >= MIN_BLOCK_SIZE,
            "corrupt footer before {:#x}: size {}",
            leftmost,
            size
        );
        let preceding = leftmost - size;
        list.remove(mem, preceding);
        new_size += size;
        leftmost = preceding;
    }

    // Walk forwards. The sentinel is tagged used, so this always stops.
    let mut cursor = block + old_size;
    loop {
        let tags = block::read(mem, cursor);
        if tags.is_used() {
            break;
        }
        list.remove(mem, cursor);
        new_size += tags.size();
        cursor += tags.size();
    }

    if new_size == old_size {
        return block;
    }

    trace!(
        "Coalescing {:#x}:{} into {:#x}:{}",
        block,
        old_size,
        leftmost,
        new_size
    );

    list.remove(mem, block);
    // Whatever precedes the run is used, or it would have been merged too.
    block::encode(
        mem,
        leftmost,
        SizeAndTags::new(new_size).with(Tag::PrecedingUsed),
    );
    list.insert_at_head(mem, leftmost);

    leftmost
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::block::tests::FlatWords;
    use crate::block::{encode, encode_header};

    use test_log::test;

    // A heap in a flat word store: head slot at 0, blocks from 8, and the
    // sentinel at 248.
    const SENTINEL: Addr = 248;

    fn setup(blocks: &[(usize, bool)]) -> (FlatWords, FreeList) {
        let mut mem = FlatWords([0; 32]);
        let list = FreeList::at(0);
        let mut addr = 8;
        let mut preceding_used = true;
        for &(size, used) in blocks {
            let tags = SizeAndTags::new(size)
                .set(Tag::Used, used)
                .set(Tag::PrecedingUsed, preceding_used);
            if used {
                encode_header(&mut mem, addr, tags);
            } else {
                encode(&mut mem, addr, tags);
                list.insert_at_head(&mut mem, addr);
            }
            preceding_used = used;
            addr += size;
        }
        assert_eq!(addr, SENTINEL);
        encode_header(
            &mut mem,
            SENTINEL,
            SizeAndTags::SENTINEL.set(Tag::PrecedingUsed, preceding_used),
        );
        (mem, list)
    }

    // Free a used block the way release does, without coalescing.
    fn mark_free(mem: &mut FlatWords, list: &FreeList, addr: Addr) {
        block::clear_flag(mem, addr, Tag::Used);
        let next = addr + block::read(mem, addr).size();
        block::clear_flag(mem, next, Tag::PrecedingUsed);
        list.insert_at_head(mem, addr);
    }

    #[test]
    fn test_no_free_neighbours() {
        let (mut mem, list) = setup(&[(64, true), (64, true), (112, true)]);
        mark_free(&mut mem, &list, 72);
        let before = mem.0;
        assert_eq!(coalesce(&mut mem, &list, 72), 72);
        assert_eq!(mem.0, before);
        assert_eq!(list.head(&mem), Some(72));
    }

    #[test]
    fn test_merge_forward() {
        let (mut mem, list) = setup(&[(64, true), (64, true), (112, false)]);
        mark_free(&mut mem, &list, 72);
        assert_eq!(coalesce(&mut mem, &list, 72), 72);

        let tags = block::read(&mem, 72);
        assert_eq!(tags.size(), 176);
        assert!(!tags.is_used());
        assert!(tags.preceding_used());
        assert_eq!(block::read_footer_before(&mem, SENTINEL), tags);
        assert_eq!(list.iter(&mem).count(), 1);
        assert_eq!(list.head(&mem), Some(72));
    }

    #[test]
    fn test_merge_backward() {
        let (mut mem, list) = setup(&[(64, false), (64, true), (112, true)]);
        mark_free(&mut mem, &list, 72);
        assert_eq!(coalesce(&mut mem, &list, 72), 8);

        let tags = block::read(&mem, 8);
        assert_eq!(tags.size(), 128);
        assert!(tags.preceding_used());
        assert_eq!(block::read_footer_before(&mem, 136), tags);
        assert_eq!(list.iter(&mem).count(), 1);
        assert_eq!(list.head(&mem), Some(8));
        // The following block was already told its predecessor is free.
        assert!(!block::read(&mem, 136).preceding_used());
    }

    #[test]
    fn test_merge_both_sides() {
        let (mut mem, list) = setup(&[(32, true), (48, false), (64, true), (96, false)]);
        mark_free(&mut mem, &list, 88);
        assert_eq!(coalesce(&mut mem, &list, 88), 40);

        let tags = block::read(&mem, 40);
        assert_eq!(tags.size(), 208);
        assert!(tags.preceding_used());
        assert!(!tags.is_used());
        assert_eq!(block::read_footer_before(&mem, SENTINEL), tags);
        assert_eq!(list.iter(&mem).collect::<Vec<_>>(), [40]);
    }
}
