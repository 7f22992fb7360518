use core::fmt;

use crate::block::{Addr, ALIGNMENT, MIN_BLOCK_SIZE};

/// Everything that can go wrong setting up or growing a heap.
///
/// `E` is the error type of the underlying [`Arena`](../arena/trait.Arena.html).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapError<E> {
    /// The arena refused to hand out more memory.
    ///
    /// There is no fallback: the allocation that needed the memory cannot be
    /// satisfied. The heap itself is still consistent.
    Exhausted { requested: usize, source: E },
    /// The requested size overflows once headers and alignment are added.
    RequestTooLarge(usize),
    /// `init` was given an arena that already holds data.
    ArenaNotEmpty,
    /// The arena's base address is not word aligned.
    MisalignedBase(Addr),
    /// The arena's page size can't hold a minimum block, or isn't aligned.
    BadPageSize(usize),
    /// A shared heap was used before `init`.
    Uninitialized,
    /// A shared heap was initialized twice.
    AlreadyInitialized,
}

impl<E: fmt::Debug> fmt::Display for HeapError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::Exhausted { requested, source } => write!(
                f,
                "arena could not grow by {} bytes: {:?}",
                requested, source
            ),
            HeapError::RequestTooLarge(size) => {
                write!(f, "allocation of {} bytes is too large", size)
            }
            HeapError::ArenaNotEmpty => write!(f, "arena already holds data"),
            HeapError::MisalignedBase(addr) => write!(
                f,
                "arena base {:#x} is not {}-byte aligned",
                addr, ALIGNMENT
            ),
            HeapError::BadPageSize(size) => write!(
                f,
                "page size {} must be a multiple of {} and at least {}",
                size, ALIGNMENT, MIN_BLOCK_SIZE
            ),
            HeapError::Uninitialized => write!(f, "heap used before init"),
            HeapError::AlreadyInitialized => write!(f, "heap initialized twice"),
        }
    }
}
