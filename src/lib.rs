#![cfg_attr(not(test), no_std)]

//! An explicit free-list allocator with boundary tags.
//!
//! Every block carries its size and two flags in a header word; free blocks
//! repeat it in a footer, which lets a block find its free neighbour below
//! it in constant time. Free blocks are threaded onto a doubly linked list,
//! searched first-fit and pushed at the head. Neighbouring free blocks are
//! merged as soon as one of them is freed.
//!
//! The heap lives in an [`Arena`](arena/trait.Arena.html), which only ever
//! grows at its top. [`ToyArena`](arena/struct.ToyArena.html) uses a
//! borrowed buffer; with the `use_libc` feature, `MmapArena` uses virtual
//! memory from the OS.
//!
//! ```
//! use boundary_alloc::{Heap, Release, ToyArena};
//!
//! let mut buffer = [0u8; 4096];
//! let mut heap = Heap::init(ToyArena::new(&mut buffer)).unwrap();
//!
//! let p = heap.allocate(100).unwrap();
//! assert!(p.is_some());
//! assert_eq!(heap.release(p), Release::Freed);
//! assert!(heap.check().0.is_valid());
//! ```

pub mod arena;
pub mod block;
pub mod check;
pub mod coalesce;
pub mod error;
pub mod freelist;
pub mod heap;
pub mod locked;

pub use arena::{Arena, ToyArena, ToyArenaOverflow};
pub use block::Addr;
pub use check::{Stats, Validity};
pub use error::HeapError;
pub use heap::{BlockInfo, Heap, Release};
pub use locked::LockedHeap;

#[cfg(feature = "use_libc")]
pub use arena::MmapArena;
