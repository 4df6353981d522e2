//! Sharing one arena between threads with locking enabled.

use std::thread;

use block_arena::BlockArena;
use new_zealand::nz;

fn main() {
    println!("=== SyncBlockArena: Shared Between Threads ===");

    let arena = BlockArena::new(nz!(1024)).enable_locking();

    thread::scope(|s| {
        for worker in 0..4_u8 {
            let arena = &arena;

            s.spawn(move || {
                for _ in 0..100 {
                    let bytes = arena.duplicate_bytes(&[worker; 32]).expect("arena has memory");
                    assert!(bytes.iter().all(|b| *b == worker));
                }
            });
        }
    });

    println!("Blocks in use: {}", arena.block_count());
    println!("Bytes used: {}", arena.used_bytes());

    // The unaligned fast path skips the lock. Here no other thread is running any more.
    // SAFETY: All worker threads have finished, so nothing else allocates concurrently.
    let tail = unsafe { arena.alloc_unaligned(3) }.expect("arena has memory");
    println!("Unaligned allocation of {} bytes", tail.len());
}
