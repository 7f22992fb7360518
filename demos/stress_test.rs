//! An example program that runs a heap inside a plain buffer, creates and
//! destroys a large number of objects, and checks validity along the way.

use boundary_alloc::{Addr, Heap, ToyArena};

use rand::distributions::{Distribution, Uniform};
use rand::{Rng, RngCore, SeedableRng};

// Minimum number of allocations before we start deallocating
const MIN_ALLOCATIONS: usize = 1024;
// Total number of allocations / deallocations
const ALLOCATIONS: usize = 64 * 1024;
// Object sizes are the product of two numbers up to this
const MAX_FACTOR: usize = 64;
// How much the arena may grow to
const ARENA_BYTES: usize = 256 << 20;

struct RandomObjects<'m> {
    heap: Heap<ToyArena<'m>>,
    allocated: Vec<Addr>,
    max_factor: usize,
}

impl<'m> RandomObjects<'m> {
    fn new(heap: Heap<ToyArena<'m>>, max_factor: usize) -> Self {
        let max = if max_factor < 8 { 8 } else { max_factor };

        RandomObjects {
            heap,
            allocated: Vec::new(),
            max_factor: max,
        }
    }

    fn create<R: Rng>(&mut self, rng: &mut R) {
        let range = Uniform::new_inclusive(8usize, self.max_factor);
        let new_size = range.sample(rng) * range.sample(rng);
        match self.heap.allocate(new_size) {
            Ok(Some(ptr)) => self.allocated.push(ptr),
            Ok(None) => {}
            Err(e) => {
                eprintln!("Allocation of {} bytes failed: {}", new_size, e);
                std::process::exit(1);
            }
        }
    }

    fn destroy<R: Rng>(&mut self, rng: &mut R) {
        if self.allocated.is_empty() {
            return;
        }
        let range = Uniform::new(0, self.allocated.len());
        let ix = range.sample(rng);
        let ptr = self.allocated.swap_remove(ix);

        assert!(self.heap.release(Some(ptr)).is_freed());
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.contains(&"--help".to_owned()) {
        println!(
            "USAGE: {} [ALLOCATIONS] [MIN_ALLOCATIONS] [MAX_FACTOR]",
            args[0]
        );
        return;
    }
    let mut allocations: usize = args
        .get(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(ALLOCATIONS);
    let min_allocations: usize = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(MIN_ALLOCATIONS);
    if allocations < min_allocations {
        allocations = min_allocations;
    }
    let max_factor: usize = args
        .get(3)
        .and_then(|s| s.parse().ok())
        .unwrap_or(MAX_FACTOR);

    env_logger::init();
    println!("Running Stress Test.\n\nParameters:");
    println!("    {} total allocations", allocations);
    println!(
        "    {} allocations before any deallocations",
        min_allocations
    );
    println!("    {} max allocated object size", max_factor * max_factor);

    let seed: u64 = rand::thread_rng().next_u64();
    log::info!("Using seed {}", seed);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    let mut buffer = vec![0u8; ARENA_BYTES];
    let heap = match Heap::init(ToyArena::with_page_size(&mut buffer, 4096)) {
        Ok(heap) => heap,
        Err(e) => {
            eprintln!("Could not set up the heap: {}", e);
            std::process::exit(1);
        }
    };
    let mut objects = RandomObjects::new(heap, max_factor);

    let mut allocation_run: isize = min_allocations as isize;

    for i in 1..=allocations {
        // Decide if we should allocate some new objects, or destroy an old one.
        while allocation_run == 0 {
            let mut max_allocations = objects.allocated.len();
            if max_allocations < min_allocations {
                max_allocations = min_allocations;
            }
            let max_deallocations = objects.allocated.len() as isize;
            let range = Uniform::new(-max_deallocations, max_allocations as isize);
            allocation_run = range.sample(&mut rng);
        }

        if allocation_run > 0 {
            objects.create(&mut rng);
            allocation_run -= 1;
        } else {
            objects.destroy(&mut rng);
            allocation_run += 1;
        }

        if i % 1024 == 0 {
            let (validity, stats) = objects.heap.check();
            println!(
                "{:6} operations: {} live objects, {} bytes used, {} free in {} blocks",
                i,
                objects.allocated.len(),
                stats.used_bytes,
                stats.free_bytes,
                stats.free_blocks,
            );
            assert!(validity.is_valid(), "{:?}", validity);
        }
    }

    let (validity, stats) = objects.heap.check();
    println!("\nFinal: {:?}\n       {:?}", validity, stats);
}
