//! Basic usage of `BlockArena`: many small allocations, one large one, one bulk release.

use block_arena::{BlockArena, text};
use new_zealand::nz;

fn main() {
    println!("=== BlockArena: Basic Usage ===");

    let mut arena = BlockArena::new(nz!(256));

    // Small requests are bump-allocated from blocks.
    let name = arena
        .duplicate_str(Some("block_arena"))
        .expect("arena has memory")
        .expect("source was Some");
    let counters = arena.alloc_zeroed(64).expect("arena has memory");
    counters[0] = 1;

    // Requests above the block capacity take the large-object path.
    let big = arena.alloc_zeroed(10_000).expect("arena has memory");
    big[9_999] = 42;

    let id = text::to_hex(&arena, &[0xDE, 0xAD, 0xBE, 0xEF]).expect("arena has memory");

    println!("Name: {name}");
    println!("Id: {id}");
    println!("First counter: {}", counters[0]);
    println!("Last big byte: {}", big[9_999]);
    println!("Arena state: {arena:?}");

    // Everything is released at once; the first block is kept for reuse.
    arena.clear();
    println!("After clear: {arena:?}");
}
