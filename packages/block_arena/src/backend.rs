use std::alloc::{Layout, alloc, dealloc};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{RwLock, const_rwlock};

/// Source of the raw memory an arena is built from.
///
/// Every block and every large entry of an arena is obtained through `allocate()` and handed
/// back through `release()` when the arena is cleared or dropped. Running out of memory is
/// reported by returning `None` and is never fatal to the arena.
///
/// # Safety
///
/// Implementations must return either `None` or a pointer to a fresh region that is valid for
/// reads and writes of `layout.size()` bytes, aligned to `layout.align()` and not aliased by any
/// other live allocation until it is passed to `release()`.
pub unsafe trait Backend: fmt::Debug + Send + Sync {
    /// Allocates a region described by `layout`. The arena never requests zero-sized regions.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a region previously returned by [`allocate()`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate()` on this backend with the same `layout`
    /// and must not have been released already.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default backend, built on the global Rust allocator.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use block_arena::{BlockArena, SystemBackend};
///
/// let arena = BlockArena::builder()
///     .backend(Arc::new(SystemBackend))
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBackend;

// SAFETY: We forward to the global allocator, which upholds the same contract.
unsafe impl Backend for SystemBackend {
    #[inline]
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);

        // SAFETY: The arena never requests zero-sized layouts.
        NonNull::new(unsafe { alloc(layout) })
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// Process-wide backend override. `None` means [`SystemBackend`].
static DEFAULT_BACKEND: RwLock<Option<Arc<dyn Backend>>> = const_rwlock(None);

/// Replaces the process-wide default backend used by arenas that are built without an explicit
/// backend. Passing `None` restores [`SystemBackend`].
///
/// Arenas capture their backend when they are created, so existing arenas keep releasing their
/// memory to the backend that provided it. Replacing the default is meant to happen once at
/// startup, before any arena is created.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use block_arena::{SystemBackend, set_default_backend};
///
/// set_default_backend(Some(Arc::new(SystemBackend)));
///
/// // Back to the built-in default.
/// set_default_backend(None);
/// ```
pub fn set_default_backend(backend: Option<Arc<dyn Backend>>) {
    *DEFAULT_BACKEND.write() = backend;
}

/// Returns the backend that arenas built without an explicit backend will use.
#[must_use]
pub fn default_backend() -> Arc<dyn Backend> {
    DEFAULT_BACKEND
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(SystemBackend))
}
