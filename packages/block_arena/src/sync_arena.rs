use std::fmt;
use std::mem::MaybeUninit;

use crate::{
    ArenaCell, BlockArena, Chain, Placement, Result, SpinLock, copy_bytes, copy_str_nul,
    uninit_bytes, zeroed,
};

/// A [`BlockArena`] with its locking mode enabled, so it can be shared between threads.
///
/// Obtained via [`BlockArena::enable_locking()`] or [`BlockArenaBuilder::build_sync()`]. There
/// is no way back to an unlocked arena.
///
/// # Locking asymmetry
///
/// [`alloc()`](Self::alloc), [`alloc_zeroed()`](Self::alloc_zeroed),
/// [`duplicate_str()`](Self::duplicate_str) and [`duplicate_bytes()`](Self::duplicate_bytes)
/// hold a spin lock for the whole allocation, including block growth.
///
/// [`alloc_unaligned()`](Self::alloc_unaligned) **never** takes the lock. It is an `unsafe` fast
/// path for callers that know no other thread is allocating from the arena at the same time.
///
/// # Examples
///
/// ```rust
/// use std::thread;
///
/// use block_arena::BlockArena;
/// use new_zealand::nz;
///
/// let arena = BlockArena::new(nz!(1024)).enable_locking();
///
/// let lengths: Vec<usize> = thread::scope(|s| {
///     let workers: Vec<_> = (0..4)
///         .map(|i| {
///             let arena = &arena;
///             s.spawn(move || arena.alloc_zeroed(8 * (i + 1)).unwrap().len())
///         })
///         .collect();
///
///     workers.into_iter().map(|w| w.join().unwrap()).collect()
/// });
///
/// assert_eq!(lengths, vec![8, 16, 24, 32]);
/// ```
///
/// [`BlockArenaBuilder::build_sync()`]: crate::BlockArenaBuilder::build_sync
pub struct SyncBlockArena {
    cell: ArenaCell,
    lock: SpinLock,
}

// SAFETY: Every &self access to the chain happens while holding the spin lock, except
// alloc_unaligned(), whose callers promise that no other allocation runs concurrently.
unsafe impl Sync for SyncBlockArena {}

impl From<BlockArena> for SyncBlockArena {
    /// Enables locking on an existing arena. Equivalent to [`BlockArena::enable_locking()`].
    fn from(arena: BlockArena) -> Self {
        Self {
            cell: arena.into_cell(),
            lock: SpinLock::new(),
        }
    }
}

impl SyncBlockArena {
    #[inline]
    fn with_chain_locked<R>(&self, f: impl FnOnce(&mut Chain) -> R) -> R {
        let _guard = self.lock.lock();

        // SAFETY: We hold the lock, so no other locked access is in progress, and callers of
        // alloc_unaligned() promise not to race with us. No reference to the chain escapes.
        f(unsafe { &mut *self.cell.chain_ptr() })
    }

    /// Allocates `size` bytes aligned to [`ALIGNMENT`](crate::ALIGNMENT) while holding the
    /// arena lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    pub fn alloc(&self, size: usize) -> Result<&mut [MaybeUninit<u8>]> {
        let ptr = self.with_chain_locked(|chain| chain.allocate(size, Placement::Aligned))?;

        // SAFETY: The chain handed out `size` bytes that no other reference points to. They stay
        // valid until clear() or drop, both of which require that this borrow has ended.
        Ok(unsafe { uninit_bytes(ptr, size) })
    }

    /// Allocates `size` bytes without alignment padding and **without taking the lock**.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    ///
    /// # Safety
    ///
    /// The caller must ensure that no other allocation from this arena (locked or not) runs on
    /// another thread for the duration of the call, for example by confining allocation to a
    /// single thread during a phase of the program.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use block_arena::BlockArena;
    /// use new_zealand::nz;
    ///
    /// let arena = BlockArena::new(nz!(64)).enable_locking();
    ///
    /// // SAFETY: The arena is not shared with any other thread yet.
    /// let bytes = unsafe { arena.alloc_unaligned(3) }.unwrap();
    /// assert_eq!(bytes.len(), 3);
    /// ```
    pub unsafe fn alloc_unaligned(&self, size: usize) -> Result<&mut [MaybeUninit<u8>]> {
        // SAFETY: The caller guarantees that nobody else touches the chain during this call.
        let chain = unsafe { &mut *self.cell.chain_ptr() };
        let ptr = chain.allocate(size, Placement::Unaligned)?;

        // SAFETY: See alloc().
        Ok(unsafe { uninit_bytes(ptr, size) })
    }

    /// Allocates `size` aligned bytes, all set to zero, while holding the arena lock.
    ///
    /// The zero fill happens after the lock is released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    pub fn alloc_zeroed(&self, size: usize) -> Result<&mut [u8]> {
        Ok(zeroed(self.alloc(size)?))
    }

    /// Copies a string and a NUL terminator into the arena while holding the arena lock.
    ///
    /// Returns `Ok(None)` if `source` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    pub fn duplicate_str(&self, source: Option<&str>) -> Result<Option<&str>> {
        let Some(source) = source else {
            return Ok(None);
        };

        // A str never spans the whole address space, so there is always room for the terminator.
        let target = self.alloc(source.len().wrapping_add(1))?;

        Ok(Some(copy_str_nul(target, source)))
    }

    /// Copies a byte slice into an aligned arena allocation while holding the arena lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// memory needed to serve the request.
    pub fn duplicate_bytes(&self, source: &[u8]) -> Result<&mut [u8]> {
        let target = self.alloc(source.len())?;

        Ok(copy_bytes(target, source))
    }

    /// Releases every block except the first and every large allocation.
    ///
    /// Requires exclusive access, so no lock is needed.
    pub fn clear(&mut self) {
        self.cell.chain_mut().clear();
    }

    /// Releases all memory held by the arena.
    ///
    /// # Panics
    ///
    /// Panics if external references registered via [`retain()`](Self::retain) are still held.
    pub fn destroy(self) {
        drop(self);
    }

    /// Registers an external holder. See [`BlockArena::retain()`].
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
        self.with_chain_locked(|chain| chain.capacity())
    }

    /// Number of blocks in the chain, including the first one.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.with_chain_locked(|chain| chain.block_count())
    }

    /// Number of live large-object allocations.
    #[must_use]
    pub fn large_count(&self) -> usize {
        self.with_chain_locked(|chain| chain.large_count())
    }

    /// Bytes consumed from blocks, including alignment padding.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.with_chain_locked(|chain| chain.used_bytes())
    }

    /// Total bytes the arena currently holds from its backend.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.with_chain_locked(|chain| chain.reserved_bytes())
    }
}

impl fmt::Debug for SyncBlockArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (capacity, blocks, large, used_bytes) = self.with_chain_locked(|chain| {
            (
                chain.capacity(),
                chain.block_count(),
                chain.large_count(),
                chain.used_bytes(),
            )
        });

        f.debug_struct("SyncBlockArena")
            .field("capacity", &capacity)
            .field("blocks", &blocks)
            .field("large", &large)
            .field("used_bytes", &used_bytes)
            .field("refs", &self.ref_count())
            .finish()
    }
}
