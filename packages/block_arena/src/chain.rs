use std::alloc::Layout;
use std::mem;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::{ALIGNMENT, Backend, Error, FAILED_THRESHOLD, Result};

/// Whether a bump allocation rounds the cursor up to [`ALIGNMENT`] first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Placement {
    Aligned,
    Unaligned,
}

/// The chain of blocks plus the large-object list that together make up one arena.
///
/// Blocks are stored in a `Vec` in chain order, with index 0 being the head block. The head
/// block lives as long as the chain; every other block and every large entry is released by
/// [`clear()`](Self::clear).
///
/// The chain does not release anything on drop. The owner calls [`clear()`](Self::clear) and
/// [`release_head()`](Self::release_head) as part of its own teardown, so that a failed
/// teardown check can leak the head instead of releasing memory that is still referenced.
#[derive(Debug)]
pub(crate) struct Chain {
    /// Every block has exactly this many usable bytes. This is also the largest request served
    /// from the chain rather than the large-object list.
    max: usize,

    /// Backend layout shared by all blocks.
    block_layout: Layout,

    blocks: Vec<Block>,

    /// Index of the first block to try. Blocks before it are considered full.
    current: usize,

    /// Large entries in allocation order. Released newest first.
    large: Vec<LargeEntry>,

    backend: Arc<dyn Backend>,
}

#[derive(Debug)]
struct Block {
    base: NonNull<u8>,

    /// Offset of the next free byte. Never greater than the block capacity.
    last: usize,

    /// How many times this block failed to serve a request while a new block was appended.
    failed: u32,
}

#[derive(Debug)]
struct LargeEntry {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: The chain exclusively owns every region its pointers refer to and the backend is
// Send + Sync, so moving the chain to another thread moves the whole ownership graph.
unsafe impl Send for Chain {}

impl Block {
    /// Reserves `size` bytes if they fit before `end`, returning the start of the reservation.
    #[inline]
    fn try_bump(&mut self, size: usize, end: usize, placement: Placement) -> Option<NonNull<u8>> {
        let start = match placement {
            Placement::Aligned => self.last.checked_next_multiple_of(ALIGNMENT)?,
            Placement::Unaligned => self.last,
        };

        let new_last = start.checked_add(size)?;

        if new_last > end {
            return None;
        }

        self.last = new_last;

        // SAFETY: start <= new_last <= end, which is within the block allocation.
        Some(unsafe { self.base.add(start) })
    }
}

impl Chain {
    /// Creates a chain with a single head block of `capacity` bytes rounded up to [`ALIGNMENT`].
    pub(crate) fn new(capacity: NonZero<usize>, backend: Arc<dyn Backend>) -> Result<Self> {
        let block_layout = capacity
            .get()
            .checked_next_multiple_of(ALIGNMENT)
            .and_then(|size| Layout::from_size_align(size, ALIGNMENT).ok())
            .ok_or(Error::Exhausted)?;

        let base = backend.allocate(block_layout).ok_or(Error::Exhausted)?;

        trace!(capacity = block_layout.size(), "created arena head block");

        Ok(Self {
            max: block_layout.size(),
            block_layout,
            blocks: vec![Block {
                base,
                last: 0,
                failed: 0,
            }],
            current: 0,
            large: Vec::new(),
            backend,
        })
    }

    /// Serves a request of `size` bytes from the chain, or from the large-object list if the
    /// request does not fit in one block.
    ///
    /// The returned region is valid for `size` bytes until the next `clear()` or teardown.
    pub(crate) fn allocate(&mut self, size: usize, placement: Placement) -> Result<NonNull<u8>> {
        if size > self.max {
            return self.allocate_large(size);
        }

        let end = self.max;

        for block in self.blocks.iter_mut().skip(self.current) {
            if let Some(ptr) = block.try_bump(size, end, placement) {
                return Ok(ptr);
            }
        }

        self.grow(size)
    }

    /// Appends a new block, serving `size` bytes from its start.
    ///
    /// Every block from `current` up to, but not including, the tail is charged one failure.
    /// Blocks that had already failed more than [`FAILED_THRESHOLD`] times move the search
    /// cursor past themselves.
    #[cfg_attr(test, mutants::skip)] // Mutations can grow the chain without bound.
    fn grow(&mut self, size: usize) -> Result<NonNull<u8>> {
        debug_assert!(size <= self.max);

        let base = self
            .backend
            .allocate(self.block_layout)
            .ok_or(Error::Exhausted)?;

        let mut current = self.current;
        let tail = self.blocks.len().saturating_sub(1);

        // The tail is never charged, so the cursor always lands on an existing block.
        for (index, block) in self
            .blocks
            .iter_mut()
            .enumerate()
            .take(tail)
            .skip(self.current)
        {
            if block.failed > FAILED_THRESHOLD {
                // Cannot overflow - index is below the tail index.
                current = index.wrapping_add(1);
            }

            block.failed = block.failed.saturating_add(1);
        }

        self.blocks.push(Block {
            base,
            last: size,
            failed: 0,
        });
        self.current = current;

        trace!(
            blocks = self.blocks.len(),
            current = self.current,
            "appended arena block"
        );

        Ok(base)
    }

    fn allocate_large(&mut self, size: usize) -> Result<NonNull<u8>> {
        let layout = size
            .checked_next_multiple_of(ALIGNMENT)
            .and_then(|padded| Layout::from_size_align(padded, ALIGNMENT).ok())
            .ok_or(Error::Exhausted)?;

        let ptr = self.backend.allocate(layout).ok_or(Error::Exhausted)?;

        self.large.push(LargeEntry { ptr, layout });

        trace!(size, large = self.large.len(), "allocated large arena entry");

        Ok(ptr)
    }

    /// Releases every large entry and every block except the head, then resets the head so
    /// that its full capacity is available again.
    pub(crate) fn clear(&mut self) {
        let large = mem::take(&mut self.large);
        let released_large = large.len();

        for entry in large.into_iter().rev() {
            // SAFETY: Every entry was allocated from this backend with this layout and is
            // released exactly once, as we took ownership of the list above.
            unsafe {
                self.backend.release(entry.ptr, entry.layout);
            }
        }

        let released_blocks = self.blocks.len().saturating_sub(1);

        for block in self.blocks.drain(1..) {
            // SAFETY: Every block was allocated from this backend with the shared block layout
            // and drain() removes it from the chain, so it cannot be released twice.
            unsafe {
                self.backend.release(block.base, self.block_layout);
            }
        }

        if let Some(head) = self.blocks.first_mut() {
            head.last = 0;
            head.failed = 0;
        }

        self.current = 0;

        if released_blocks > 0 || released_large > 0 {
            debug!(released_blocks, released_large, "cleared arena");
        }
    }

    /// Releases the head block. The chain must already be cleared and is unusable afterwards.
    pub(crate) fn release_head(&mut self) {
        debug_assert!(self.large.is_empty());
        debug_assert!(self.blocks.len() <= 1);

        for head in mem::take(&mut self.blocks) {
            // SAFETY: The head was allocated from this backend with the shared block layout
            // and was taken out of the chain above, so it cannot be released twice.
            unsafe {
                self.backend.release(head.base, self.block_layout);
            }
        }
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.max
    }

    #[must_use]
    pub(crate) fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub(crate) fn large_count(&self) -> usize {
        self.large.len()
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn current_block(&self) -> usize {
        self.current
    }

    /// Bytes consumed from blocks so far, including alignment padding.
    #[must_use]
    pub(crate) fn used_bytes(&self) -> usize {
        self.blocks.iter().map(|block| block.last).sum()
    }

    /// Total bytes currently held from the backend.
    #[must_use]
    pub(crate) fn reserved_bytes(&self) -> usize {
        // Cannot overflow - these are all live allocations, so their sum fits in memory.
        let blocks = self.blocks.len().wrapping_mul(self.block_layout.size());

        self.large
            .iter()
            .map(|entry| entry.layout.size())
            .fold(blocks, usize::wrapping_add)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::SystemBackend;

    assert_impl_all!(Chain: Send);
    assert_not_impl_any!(Chain: Sync);

    /// Counts live allocations so tests can check that everything is handed back.
    #[derive(Debug, Default)]
    struct TallyBackend {
        live: AtomicUsize,
    }

    // SAFETY: Forwards to SystemBackend.
    unsafe impl Backend for TallyBackend {
        fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
            self.live.fetch_add(1, Ordering::Relaxed);
            SystemBackend.allocate(layout)
        }

        unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
            self.live.fetch_sub(1, Ordering::Relaxed);

            // SAFETY: Forwarding safety requirements to the caller.
            unsafe {
                SystemBackend.release(ptr, layout);
            }
        }
    }

    fn system_chain(capacity: NonZero<usize>) -> Chain {
        Chain::new(capacity, Arc::new(SystemBackend)).unwrap()
    }

    fn teardown(mut chain: Chain) {
        chain.clear();
        chain.release_head();
    }

    #[test]
    fn capacity_is_rounded_up_to_alignment() {
        let chain = system_chain(nz!(13));

        assert_eq!(chain.capacity(), 13_usize.next_multiple_of(ALIGNMENT));
        assert_eq!(chain.block_count(), 1);
        assert_eq!(chain.reserved_bytes(), chain.capacity());

        teardown(chain);
    }

    #[test]
    fn aligned_allocations_are_aligned() {
        let mut chain = system_chain(nz!(256));

        for size in [1, 3, 7, 8, 13] {
            let ptr = chain.allocate(size, Placement::Aligned).unwrap();
            assert_eq!(ptr.as_ptr().addr() % ALIGNMENT, 0);
        }

        teardown(chain);
    }

    #[test]
    fn unaligned_allocations_are_packed() {
        let mut chain = system_chain(nz!(256));

        let a = chain.allocate(3, Placement::Unaligned).unwrap();
        let b = chain.allocate(3, Placement::Unaligned).unwrap();

        assert_eq!(b.as_ptr().addr() - a.as_ptr().addr(), 3);
        assert_eq!(chain.used_bytes(), 6);

        teardown(chain);
    }

    #[test]
    fn exact_capacity_is_served_from_block() {
        let mut chain = system_chain(nz!(64));
        let max = chain.capacity();

        chain.allocate(max, Placement::Aligned).unwrap();

        assert_eq!(chain.large_count(), 0);
        assert_eq!(chain.block_count(), 1);

        chain.allocate(max + 1, Placement::Aligned).unwrap();

        assert_eq!(chain.large_count(), 1);
        assert_eq!(chain.block_count(), 1);

        teardown(chain);
    }

    #[test]
    fn overflow_appends_block() {
        let mut chain = system_chain(nz!(64));

        chain.allocate(48, Placement::Aligned).unwrap();
        assert_eq!(chain.block_count(), 1);

        chain.allocate(48, Placement::Aligned).unwrap();
        assert_eq!(chain.block_count(), 2);
        assert_eq!(chain.used_bytes(), 96);

        // The head still has 16 bytes available and is searched first.
        chain.allocate(16, Placement::Aligned).unwrap();
        assert_eq!(chain.block_count(), 2);
        assert_eq!(chain.used_bytes(), 112);

        teardown(chain);
    }

    #[test]
    fn repeatedly_failing_block_is_skipped() {
        let mut chain = system_chain(nz!(64));

        // Fill the head so that every later request overflows it.
        chain.allocate(64, Placement::Aligned).unwrap();

        // The first growth finds the head as the tail and charges nothing. Every later growth
        // charges the head once, so it has FAILED_THRESHOLD + 1 failures after
        // FAILED_THRESHOLD + 2 growths and is skipped by the one after that.
        for _ in 0..FAILED_THRESHOLD + 2 {
            chain.allocate(64, Placement::Aligned).unwrap();
            assert_eq!(chain.current_block(), 0);
        }

        chain.allocate(64, Placement::Aligned).unwrap();
        assert_eq!(chain.current_block(), 1);

        teardown(chain);
    }

    #[test]
    fn first_growth_does_not_charge_lone_head() {
        let mut chain = system_chain(nz!(64));

        chain.allocate(64, Placement::Aligned).unwrap();
        chain.allocate(64, Placement::Aligned).unwrap();

        assert_eq!(chain.block_count(), 2);
        assert!(chain.blocks.iter().all(|block| block.failed == 0));

        teardown(chain);
    }

    #[test]
    fn growth_never_charges_tail() {
        let mut chain = system_chain(nz!(64));

        for _ in 0..4 {
            chain.allocate(64, Placement::Aligned).unwrap();
        }
        assert_eq!(chain.block_count(), 4);

        let failures = |chain: &Chain| {
            chain
                .blocks
                .iter()
                .map(|block| block.failed)
                .collect::<Vec<_>>()
        };

        // Growth 1 charged nothing, growth 2 charged the head, growth 3 charged the first two.
        assert_eq!(failures(&chain), vec![2, 1, 0, 0]);

        chain.allocate(64, Placement::Aligned).unwrap();

        // The previous tail (index 3) stays uncharged, as does the new tail.
        assert_eq!(failures(&chain), vec![3, 2, 1, 0, 0]);

        teardown(chain);
    }

    #[test]
    fn clear_resets_to_head_block() {
        let backend = Arc::new(TallyBackend::default());
        let shared: Arc<dyn Backend> = Arc::<TallyBackend>::clone(&backend);
        let mut chain = Chain::new(nz!(64), shared).unwrap();

        for _ in 0..10 {
            chain.allocate(40, Placement::Aligned).unwrap();
        }
        chain.allocate(1000, Placement::Aligned).unwrap();
        chain.allocate(2000, Placement::Unaligned).unwrap();

        assert!(chain.block_count() > 1);
        assert_eq!(chain.large_count(), 2);
        assert!(backend.live.load(Ordering::Relaxed) > 3);

        chain.clear();

        assert_eq!(chain.block_count(), 1);
        assert_eq!(chain.large_count(), 0);
        assert_eq!(chain.current_block(), 0);
        assert_eq!(chain.used_bytes(), 0);
        assert_eq!(chain.reserved_bytes(), chain.capacity());
        assert_eq!(backend.live.load(Ordering::Relaxed), 1);

        chain.release_head();
        assert_eq!(backend.live.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn zero_sized_allocation_consumes_nothing() {
        let mut chain = system_chain(nz!(64));

        chain.allocate(0, Placement::Aligned).unwrap();
        assert_eq!(chain.used_bytes(), 0);

        teardown(chain);
    }
}
