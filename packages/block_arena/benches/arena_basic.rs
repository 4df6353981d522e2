//! Basic benchmarks for the `block_arena` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use block_arena::BlockArena;
use criterion::{Criterion, criterion_group, criterion_main};
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const SMALL: usize = 24;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("arena_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(BlockArena::new(nz!(4096))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("alloc_one");
    group.bench_function("alloc_one", |b| {
        b.iter_custom(|iters| {
            let arenas = iter::repeat_with(|| BlockArena::new(nz!(4096)))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for arena in &arenas {
                _ = black_box(arena.alloc(black_box(SMALL)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("alloc_unaligned_one");
    group.bench_function("alloc_unaligned_one", |b| {
        b.iter_custom(|iters| {
            let arenas = iter::repeat_with(|| BlockArena::new(nz!(4096)))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for arena in &arenas {
                _ = black_box(arena.alloc_unaligned(black_box(SMALL - 1)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("locked_alloc_one");
    group.bench_function("locked_alloc_one", |b| {
        b.iter_custom(|iters| {
            let arenas = iter::repeat_with(|| BlockArena::new(nz!(4096)).enable_locking())
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for arena in &arenas {
                _ = black_box(arena.alloc(black_box(SMALL)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("alloc_10k_then_clear");
    group.bench_function("alloc_10k_then_clear", |b| {
        b.iter_custom(|iters| {
            let mut arena = BlockArena::new(nz!(4096));

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..10_000 {
                    _ = black_box(arena.alloc(black_box(SMALL)));
                }

                arena.clear();
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
