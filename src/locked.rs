//! A heap shared between threads.
//!
//! [`Heap`](../heap/struct.Heap.html) itself does no locking at all. Callers
//! that need to share one can put it in a `LockedHeap`, which serializes
//! every operation with a spin lock and can live in a `static`.

use spin::{Mutex, MutexGuard};

use crate::arena::Arena;
use crate::block::Addr;
use crate::check::{Stats, Validity};
use crate::error::HeapError;
use crate::heap::{Heap, Release};

/// A thread-safe heap, using a spin lock around an optional `Heap`.
///
/// The heap starts out empty, so that a `LockedHeap` can be built in a
/// `const` context, and is set up by a single call to `init`.
pub struct LockedHeap<A> {
    heap: Mutex<Option<Heap<A>>>,
}

impl<A> LockedHeap<A> {
    pub const fn empty() -> Self {
        LockedHeap {
            heap: Mutex::new(None),
        }
    }
}

impl<A> Default for LockedHeap<A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<A: Arena> LockedHeap<A> {
    /// Set up the heap inside `arena`. Only the first call does anything.
    pub fn init(&self, arena: A) -> Result<(), HeapError<A::Err>> {
        let mut guard = self.heap.lock();
        if guard.is_some() {
            return Err(HeapError::AlreadyInitialized);
        }
        *guard = Some(Heap::init(arena)?);
        Ok(())
    }

    /// Get exclusive access to the underlying heap.
    ///
    /// Every other operation on this `LockedHeap` spins while the guard is
    /// alive.
    pub fn lock(&self) -> MutexGuard<'_, Option<Heap<A>>> {
        self.heap.lock()
    }

    pub fn allocate(&self, size: usize) -> Result<Option<Addr>, HeapError<A::Err>> {
        match self.heap.lock().as_mut() {
            None => Err(HeapError::Uninitialized),
            Some(heap) => heap.allocate(size),
        }
    }

    /// Release `ptr`. Before `init` there is no heap for `ptr` to be on, so
    /// everything except null is out of range.
    pub fn release(&self, ptr: Option<Addr>) -> Release {
        match self.heap.lock().as_mut() {
            None if ptr.is_none() => Release::IgnoredNull,
            None => Release::IgnoredOutOfRange,
            Some(heap) => heap.release(ptr),
        }
    }

    /// Check the heap, if there is one.
    pub fn check(&self) -> Option<(Validity, Stats)> {
        self.heap.lock().as_ref().map(Heap::check)
    }
}
