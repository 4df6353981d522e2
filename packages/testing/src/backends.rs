use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use block_arena::{Backend, SystemBackend};

/// A backend that forwards to [`SystemBackend`] while counting every call, so tests can check
/// that an arena hands back everything it took.
#[derive(Debug, Default)]
pub struct CountingBackend {
    allocations: AtomicUsize,
    releases: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl CountingBackend {
    /// Creates a backend with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `allocate()` calls so far.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of `release()` calls so far.
    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }

    /// Number of regions allocated but not yet released.
    #[must_use]
    pub fn live(&self) -> usize {
        self.allocations().saturating_sub(self.releases())
    }

    /// Bytes allocated but not yet released.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }
}

// SAFETY: Forwards to SystemBackend, which upholds the contract.
unsafe impl Backend for CountingBackend {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = SystemBackend.allocate(layout)?;

        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(layout.size(), Ordering::Relaxed);

        Some(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(layout.size(), Ordering::Relaxed);

        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            SystemBackend.release(ptr, layout);
        }
    }
}

/// A backend that serves a fixed number of allocations and then reports exhaustion.
#[derive(Debug)]
pub struct FailingBackend {
    remaining: AtomicUsize,
    inner: CountingBackend,
}

impl FailingBackend {
    /// Creates a backend that succeeds `allocations` times before failing every request.
    #[must_use]
    pub fn fail_after(allocations: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(allocations),
            inner: CountingBackend::new(),
        }
    }

    /// Regions allocated but not yet released.
    #[must_use]
    pub fn live(&self) -> usize {
        self.inner.live()
    }
}

// SAFETY: Forwards to CountingBackend, which upholds the contract.
unsafe impl Backend for FailingBackend {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .ok()?;

        self.inner.allocate(layout)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            self.inner.release(ptr, layout);
        }
    }
}
