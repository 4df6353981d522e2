#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A region allocator that serves many short-lived allocations from chained fixed-size blocks
//! and releases all of them in one bulk operation.
//!
//! This crate provides [`BlockArena`], an arena that bump-allocates byte regions from a chain of
//! equally sized blocks. Nothing handed out by the arena is freed individually - memory is
//! reclaimed all at once via [`BlockArena::clear()`] or by dropping the arena.
//!
//! # Key Features
//!
//! - **Bump allocation**: Each request advances a cursor inside a block, with optional
//!   pointer-size alignment.
//! - **Block chaining**: When every block is full, a new block of the same size is appended.
//!   Blocks that keep overflowing are skipped by future searches.
//! - **Large-object path**: Requests bigger than the block capacity get their own backend
//!   allocation, tracked separately and released together with the arena.
//! - **Pluggable backend**: All memory the arena itself needs comes from a [`Backend`], either
//!   injected via the builder or taken from the process-wide default.
//! - **Opt-in locking**: [`BlockArena::enable_locking()`] turns the arena into a
//!   [`SyncBlockArena`] that can be shared between threads.
//!
//! # Allocation entry points
//!
//! | Operation | Aligned | Lock-guarded on [`SyncBlockArena`] |
//! |-----------|---------|------------------------------------|
//! | `alloc()` | yes | yes |
//! | `alloc_unaligned()` | no | **no** (`unsafe` on [`SyncBlockArena`]) |
//! | `alloc_zeroed()` | yes | yes |
//! | `duplicate_str()` | yes | yes |
//! | `duplicate_bytes()` | yes | yes |
//!
//! The unaligned fast path never takes the lock. On a shared arena the caller must guarantee
//! that no other allocation runs concurrently when using it.
//!
//! # Examples
//!
//! ```rust
//! use block_arena::BlockArena;
//! use new_zealand::nz;
//!
//! let mut arena = BlockArena::new(nz!(1024));
//!
//! let greeting = arena.duplicate_str(Some("hello")).unwrap().unwrap();
//! let zeroes = arena.alloc_zeroed(16).unwrap();
//!
//! assert_eq!(greeting, "hello");
//! assert!(zeroes.iter().all(|b| *b == 0));
//!
//! // Everything is released in bulk.
//! arena.clear();
//! assert_eq!(arena.used_bytes(), 0);
//! ```
//!
//! Sharing an arena between threads:
//!
//! ```rust
//! use std::thread;
//!
//! use block_arena::BlockArena;
//! use new_zealand::nz;
//!
//! let arena = BlockArena::new(nz!(4096)).enable_locking();
//!
//! thread::scope(|s| {
//!     for _ in 0..4 {
//!         s.spawn(|| {
//!             let bytes = arena.alloc_zeroed(64).unwrap();
//!             bytes[0] = 1;
//!         });
//!     }
//! });
//! ```

mod arena;
mod arena_cell;
mod backend;
mod builder;
mod chain;
mod constants;
mod error;
mod spin_lock;
mod sync_arena;
pub mod text;

pub use arena::BlockArena;
pub(crate) use arena_cell::*;
pub use backend::*;
pub use builder::BlockArenaBuilder;
pub(crate) use chain::*;
pub use constants::{ALIGNMENT, DEFAULT_CAPACITY};
pub(crate) use constants::FAILED_THRESHOLD;
pub use error::{Error, Result};
pub(crate) use spin_lock::*;
pub use sync_arena::SyncBlockArena;
