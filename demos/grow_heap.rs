//! This is a very minimal example of a heap on top of virtual memory, growing
//! a page at a time.

use boundary_alloc::{Arena, Heap, MmapArena};

fn main() {
    env_logger::init();

    let arena = match MmapArena::reserve(1 << 24) {
        Ok(arena) => arena,
        Err(e) => {
            eprintln!("mmap failed: {}", e);
            std::process::exit(1);
        }
    };
    println!(
        "Reserved {} bytes, page size {}",
        arena.capacity(),
        arena.page_size()
    );

    let mut heap = match Heap::init(arena) {
        Ok(heap) => heap,
        Err(e) => {
            eprintln!("Could not set up the heap: {}", e);
            std::process::exit(1);
        }
    };

    for &size in &[8usize, 100, 5000, 70_000] {
        match heap.allocate(size) {
            Ok(Some(ptr)) => println!(
                "Allocated {:6} bytes at {:#x}; arena is now {} bytes after {} growths",
                size,
                ptr,
                heap.arena().len(),
                heap.arena().growths
            ),
            Ok(None) => println!("Nothing to allocate for {}", size),
            Err(e) => println!("Allocation of {} failed: {}", size, e),
        }
    }

    println!("{:?}", heap.check());
}
