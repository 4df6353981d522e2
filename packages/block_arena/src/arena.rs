use std::fmt;
use std::mem::MaybeUninit;
use std::num::NonZero;
use std::sync::Arc;

use crate::{
    ArenaCell, Backend, BlockArenaBuilder, Chain, Placement, Result, SyncBlockArena, copy_bytes,
    copy_str_nul, uninit_bytes, zeroed,
};

/// A single-threaded region allocator built from a chain of equally sized blocks.
///
/// Every allocation borrows the arena, so the borrow checker guarantees that nothing handed out
/// is still in use when the arena is [cleared][Self::clear] or dropped. Allocations are never
/// freed individually.
///
/// Requests of up to [`capacity()`](Self::capacity) bytes are bump-allocated from blocks. When no
/// block has room, a new block of the same size is appended. Larger requests get their own
/// backend allocation on a separate list.
///
/// # Thread Safety
///
/// The arena is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]). To share an arena
/// between threads, convert it with [`enable_locking()`](Self::enable_locking).
///
/// # Examples
///
/// ```rust
/// use block_arena::BlockArena;
/// use new_zealand::nz;
///
/// let arena = BlockArena::new(nz!(256));
///
/// let a = arena.alloc_zeroed(100).unwrap();
/// let b = arena.alloc_zeroed(100).unwrap();
/// a[0] = 1;
/// b[0] = 2;
///
/// // A request larger than the block capacity takes the large-object path.
/// let big = arena.alloc(1000).unwrap();
/// assert_eq!(big.len(), 1000);
/// assert_eq!(arena.large_count(), 1);
/// ```
pub struct BlockArena {
    cell: ArenaCell,
}

impl BlockArena {
    /// Creates an arena whose blocks hold `capacity` bytes (rounded up to
    /// [`ALIGNMENT`](crate::ALIGNMENT)), using the process-wide default backend.
    ///
    /// # Panics
    ///
    /// Panics if the backend cannot provide the first block. Use [`try_new()`](Self::try_new)
    /// to handle that case.
    #[must_use]
    pub fn new(capacity: NonZero<usize>) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Creates an arena whose blocks hold `capacity` bytes, reporting backend exhaustion as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// first block.
    pub fn try_new(capacity: NonZero<usize>) -> Result<Self> {
        Self::builder().capacity(capacity).try_build()
    }

    /// Creates a builder for configuring and constructing a [`BlockArena`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use block_arena::{BlockArena, SystemBackend};
    /// use new_zealand::nz;
    ///
    /// let arena = BlockArena::builder()
    ///     .capacity(nz!(16384))
    ///     .backend(Arc::new(SystemBackend))
    ///     .build();
    /// ```
    #[inline]
    pub fn builder() -> BlockArenaBuilder {
        BlockArenaBuilder::new()
    }

    pub(crate) fn from_parts(capacity: NonZero<usize>, backend: Arc<dyn Backend>) -> Result<Self> {
        Ok(Self {
            cell: ArenaCell::new(Chain::new(capacity, backend)?),
        })
    }

    pub(crate) fn into_cell(self) -> ArenaCell {
        self.cell
    }

    #[inline]
    fn with_chain<R>(&self, f: impl FnOnce(&mut Chain) -> R) -> R {
        // SAFETY: BlockArena is not Sync, so only this thread can reach the chain, and no
        // reference to the chain escapes the closure.
        f(unsafe { &mut *self.cell.chain_ptr() })
    }

    /// Allocates `size` bytes aligned to [`ALIGNMENT`](crate::ALIGNMENT).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_arena::{ALIGNMENT, BlockArena};
    /// use new_zealand::nz;
    ///
    /// let arena = BlockArena::new(nz!(64));
    ///
    /// let bytes = arena.alloc(10).unwrap();
    /// assert_eq!(bytes.len(), 10);
    /// assert_eq!(bytes.as_ptr().addr() % ALIGNMENT, 0);
    /// ```
    pub fn alloc(&self, size: usize) -> Result<&mut [MaybeUninit<u8>]> {
        let ptr = self.with_chain(|chain| chain.allocate(size, Placement::Aligned))?;

        // SAFETY: The chain handed out `size` bytes that no other reference points to. They stay
        // valid until clear() or drop, both of which require that this borrow has ended.
        Ok(unsafe { uninit_bytes(ptr, size) })
    }

    /// Allocates `size` bytes without any alignment padding.
    ///
    /// This packs allocations tightly and is meant for byte data with no alignment requirement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    pub fn alloc_unaligned(&self, size: usize) -> Result<&mut [MaybeUninit<u8>]> {
        let ptr = self.with_chain(|chain| chain.allocate(size, Placement::Unaligned))?;

        // SAFETY: See alloc().
        Ok(unsafe { uninit_bytes(ptr, size) })
    }

    /// Allocates `size` aligned bytes, all set to zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    pub fn alloc_zeroed(&self, size: usize) -> Result<&mut [u8]> {
        Ok(zeroed(self.alloc(size)?))
    }

    /// Copies a string into the arena, followed by a NUL terminator.
    ///
    /// Returns `Ok(None)` if `source` is `None`. The returned string does not include the
    /// terminator, but it is present in memory right after the last byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_arena::BlockArena;
    /// use new_zealand::nz;
    ///
    /// let arena = BlockArena::new(nz!(64));
    ///
    /// assert_eq!(arena.duplicate_str(Some("hi")).unwrap(), Some("hi"));
    /// assert_eq!(arena.duplicate_str(None).unwrap(), None);
    /// ```
    pub fn duplicate_str(&self, source: Option<&str>) -> Result<Option<&str>> {
        let Some(source) = source else {
            return Ok(None);
        };

        // A str never spans the whole address space, so there is always room for the terminator.
        let target = self.alloc(source.len().wrapping_add(1))?;

        Ok(Some(copy_str_nul(target, source)))
    }

    /// Copies a byte slice into an aligned arena allocation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    pub fn duplicate_bytes(&self, source: &[u8]) -> Result<&mut [u8]> {
        let target = self.alloc(source.len())?;

        Ok(copy_bytes(target, source))
    }

    /// Releases every block except the first and every large allocation, making the full
    /// capacity of the first block available again.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_arena::BlockArena;
    /// use new_zealand::nz;
    ///
    /// let mut arena = BlockArena::new(nz!(64));
    ///
    /// for _ in 0..10 {
    ///     arena.alloc(64).unwrap();
    /// }
    /// assert_eq!(arena.block_count(), 10);
    ///
    /// arena.clear();
    /// assert_eq!(arena.block_count(), 1);
    /// assert_eq!(arena.used_bytes(), 0);
    /// ```
    pub fn clear(&mut self) {
        self.cell.chain_mut().clear();
    }

    /// Releases all memory held by the arena.
    ///
    /// Equivalent to dropping the arena.
    ///
    /// # Panics
    ///
    /// Panics if external references registered via [`retain()`](Self::retain) are still held.
    /// In that case the first block is leaked rather than released.
    pub fn destroy(self) {
        drop(self);
    }

    /// Converts the arena into a [`SyncBlockArena`] that guards allocations with a spin lock.
    ///
    /// The conversion is one-way. Everything already allocated stays owned by the new arena.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_arena::BlockArena;
    /// use new_zealand::nz;
    ///
    /// let arena = BlockArena::new(nz!(64)).enable_locking();
    /// let bytes = arena.alloc_zeroed(8).unwrap();
    /// assert_eq!(bytes, &[0; 8]);
    /// ```
    #[must_use]
    pub fn enable_locking(self) -> SyncBlockArena {
        SyncBlockArena::from(self)
    }

    /// Registers an external holder that keeps pointers into the arena beyond the borrow
    /// checker's view. The arena must not be dropped until every holder calls
    /// [`release()`](Self::release).
    pub fn retain(&self) {
        self.cell.retain();
    }

    /// Unregisters an external holder.
    ///
    /// # Panics
    ///
    /// Panics if there is no registered holder.
    pub fn release(&self) {
        self.cell.release();
    }

    /// Number of registered external holders.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.cell.ref_count()
    }

    /// Usable bytes per block. Requests larger than this take the large-object path.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.with_chain(|chain| chain.capacity())
    }

    /// Number of blocks in the chain, including the first one.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.with_chain(|chain| chain.block_count())
    }

    /// Number of live large-object allocations.
    #[must_use]
    pub fn large_count(&self) -> usize {
        self.with_chain(|chain| chain.large_count())
    }

    /// Bytes consumed from blocks, including alignment padding.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.with_chain(|chain| chain.used_bytes())
    }

    /// Total bytes the arena currently holds from its backend.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.with_chain(|chain| chain.reserved_bytes())
    }
}

impl fmt::Debug for BlockArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockArena")
            .field("capacity", &self.capacity())
            .field("blocks", &self.block_count())
            .field("large", &self.large_count())
            .field("used_bytes", &self.used_bytes())
            .field("refs", &self.ref_count())
            .finish()
    }
}
