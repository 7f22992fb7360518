//! Arenas: the providers of raw heap bytes.
//!
//! ## [`Arena`](trait.Arena.html)
//!
//! `Arena` abstracts over the operating environment that hands out heap
//! memory, in the style of `sbrk`: a single contiguous region that can only
//! grow at its top.
//!
//! ## [`ToyArena`](struct.ToyArena.html)
//!
//! `ToyArena` pretends a borrowed byte buffer is a heap. Its addresses start
//! at 0. It is mainly useful for testing.
//!
//! ## `MmapArena`
//!
//! With the `use_libc` feature, `MmapArena` reserves virtual memory with
//! `mmap` and hands it out a bit at a time. Its addresses are real pointers.

use core::fmt;

use crate::block::{Addr, Words, WORD_SIZE};

/// Round up value to the nearest multiple of increment
pub(crate) fn round_up(value: usize, increment: usize) -> Option<usize> {
    if value == 0 {
        return Some(0);
    }
    increment.checked_mul((value - 1) / increment + 1)
}

/// A contiguous, growable region of memory for a heap to live in.
///
/// The region covers `lowest_address()..highest_address()`, and `memory()`
/// returns exactly those bytes.
pub trait Arena {
    type Err: fmt::Debug;

    /// Grow the region by `bytes`, contiguously with its current top, and
    /// return the old top (the first address of the new bytes).
    ///
    /// On failure the region must be left as it was.
    fn extend(&mut self, bytes: usize) -> Result<Addr, Self::Err>;

    fn lowest_address(&self) -> Addr;

    /// One past the last address of the region.
    fn highest_address(&self) -> Addr;

    /// The granularity in which the heap asks for more memory.
    fn page_size(&self) -> usize;

    fn memory(&self) -> &[u8];

    fn memory_mut(&mut self) -> &mut [u8];

    /// The number of bytes currently in the region.
    fn len(&self) -> usize {
        self.highest_address() - self.lowest_address()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Translate an address into an index into `memory()`, checking that a whole
// word fits there.
fn word_index<A: Arena + ?Sized>(arena: &A, addr: Addr) -> usize {
    let lo = arena.lowest_address();
    let hi = arena.highest_address();
    assert!(
        addr >= lo && addr.checked_add(WORD_SIZE).map_or(false, |end| end <= hi),
        "heap access at {:#x} outside of {:#x}..{:#x}",
        addr,
        lo,
        hi,
    );
    addr - lo
}

impl<A: Arena + ?Sized> Words for A {
    fn load(&self, addr: Addr) -> usize {
        let at = word_index(self, addr);
        let mut raw = [0u8; WORD_SIZE];
        raw.copy_from_slice(&self.memory()[at..at + WORD_SIZE]);
        u64::from_ne_bytes(raw) as usize
    }

    fn store(&mut self, addr: Addr, value: usize) {
        let at = word_index(self, addr);
        self.memory_mut()[at..at + WORD_SIZE].copy_from_slice(&(value as u64).to_ne_bytes());
    }
}

/// A borrowed buffer posing as a heap.
///
/// The first `size` bytes of the buffer are the arena; `extend` hands out
/// more until the buffer runs out.
pub struct ToyArena<'m> {
    pub page_size: usize,
    pub size: usize,
    /// How many times `extend` has succeeded.
    pub extensions: usize,
    buffer: &'m mut [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToyArenaOverflow {
    pub requested: usize,
    pub available: usize,
}

impl<'m> ToyArena<'m> {
    pub const DEFAULT_PAGE_SIZE: usize = 64;

    pub fn new(buffer: &'m mut [u8]) -> Self {
        Self::with_page_size(buffer, Self::DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(buffer: &'m mut [u8], page_size: usize) -> Self {
        ToyArena {
            page_size,
            size: 0,
            extensions: 0,
            buffer,
        }
    }

    /// The most the arena can ever grow to.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

impl<'m> Arena for ToyArena<'m> {
    type Err = ToyArenaOverflow;

    fn extend(&mut self, bytes: usize) -> Result<Addr, Self::Err> {
        let available = self.buffer.len() - self.size;
        if bytes > available {
            return Err(ToyArenaOverflow {
                requested: bytes,
                available,
            });
        }

        let base = self.size;
        self.size += bytes;
        self.extensions += 1;
        Ok(base)
    }

    fn lowest_address(&self) -> Addr {
        0
    }

    fn highest_address(&self) -> Addr {
        self.size
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn memory(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.size]
    }
}

#[cfg(feature = "use_libc")]
pub use self::mmap::MmapArena;

#[cfg(feature = "use_libc")]
mod mmap {
    use core::ptr::{null_mut, NonNull};

    use errno::Errno;

    use super::{round_up, Arena};
    use crate::block::Addr;

    /// MmapArena uses virtual memory to back the heap.
    ///
    /// The whole capacity is reserved up front, so the region never moves;
    /// `extend` only moves the break. The kernel doesn't commit pages until
    /// they are touched.
    pub struct MmapArena {
        base: NonNull<u8>,
        capacity: usize,
        brk: usize,
        page_size: usize,
        // Just for tracking, not really needed
        pub growths: usize,
    }

    // The mapping is owned exclusively by this arena.
    unsafe impl Send for MmapArena {}

    impl MmapArena {
        /// Reserve at least `capacity` bytes of address space.
        pub fn reserve(capacity: usize) -> Result<Self, Errno> {
            let page_size = sysconf::page::pagesize();
            let capacity = match round_up(capacity, page_size) {
                Some(0) | None => return Err(Errno(libc::EINVAL)),
                Some(c) => c,
            };

            let ptr = unsafe {
                libc::mmap(
                    // Address we want the memory at. We don't care, so null it is.
                    null_mut(),
                    capacity,
                    // We want read/write access to this memory
                    libc::PROT_WRITE | libc::PROT_READ,
                    // MAP_ANON: We don't want a file descriptor, we're just going to
                    //   use the memory.
                    //
                    // MAP_PRIVATE: We're not sharing this with any other process.
                    //
                    // MAP_NORESERVE: Don't set aside swap for pages we may
                    //   never touch.
                    libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE,
                    -1,
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                return Err(errno::errno());
            }

            let base = NonNull::new(ptr as *mut u8).ok_or(Errno(libc::ENOMEM))?;

            Ok(MmapArena {
                base,
                capacity,
                brk: 0,
                page_size,
                growths: 0,
            })
        }

        pub fn capacity(&self) -> usize {
            self.capacity
        }
    }

    impl Arena for MmapArena {
        type Err = Errno;

        fn extend(&mut self, bytes: usize) -> Result<Addr, Errno> {
            if bytes > self.capacity - self.brk {
                return Err(Errno(libc::ENOMEM));
            }
            let old_top = self.highest_address();
            self.brk += bytes;
            self.growths += 1;
            Ok(old_top)
        }

        fn lowest_address(&self) -> Addr {
            self.base.as_ptr() as Addr
        }

        fn highest_address(&self) -> Addr {
            self.lowest_address() + self.brk
        }

        fn page_size(&self) -> usize {
            self.page_size
        }

        fn memory(&self) -> &[u8] {
            // The first `brk` bytes of the mapping are readable and owned by us.
            unsafe { core::slice::from_raw_parts(self.base.as_ptr(), self.brk) }
        }

        fn memory_mut(&mut self) -> &mut [u8] {
            unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
        }
    }

    impl Drop for MmapArena {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.capacity);
            }
        }
    }
}
