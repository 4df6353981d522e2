use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;
use std::sync::Arc;

use crate::{Backend, BlockArena, DEFAULT_CAPACITY, Result, SyncBlockArena, default_backend};

/// Builder for creating an instance of [`BlockArena`] or [`SyncBlockArena`].
///
/// All settings are optional. Without a backend, the arena uses the process-wide default
/// backend that is current when the arena is built (see
/// [`set_default_backend()`](crate::set_default_backend)).
///
/// # Examples
///
/// ```
/// use block_arena::BlockArena;
/// use new_zealand::nz;
///
/// let arena = BlockArena::builder().capacity(nz!(512)).build();
/// assert_eq!(arena.capacity(), 512);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing arena configuration to happen on different threads than where the arena is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct BlockArenaBuilder {
    capacity: NonZero<usize>,
    backend: Option<Arc<dyn Backend>>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl BlockArenaBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            backend: None,
            _not_sync: PhantomData,
        }
    }

    /// Sets the number of usable bytes per block. The value is rounded up to
    /// [`ALIGNMENT`](crate::ALIGNMENT).
    ///
    /// This is also the largest request served from blocks - anything bigger takes the
    /// large-object path.
    #[inline]
    pub fn capacity(mut self, capacity: NonZero<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the backend that provides every block and large allocation of the arena.
    #[inline]
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Builds the arena.
    ///
    /// # Panics
    ///
    /// Panics if the backend cannot provide the first block.
    #[must_use]
    #[inline]
    pub fn build(self) -> BlockArena {
        self.try_build()
            .expect("we do not intend to handle allocation failure as a real possibility - OOM results in panic")
    }

    /// Builds the arena, reporting backend exhaustion as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`](crate::Error::Exhausted) if the backend cannot provide the
    /// first block.
    #[inline]
    pub fn try_build(self) -> Result<BlockArena> {
        let backend = self.backend.unwrap_or_else(default_backend);

        BlockArena::from_parts(self.capacity, backend)
    }

    /// Builds the arena with locking enabled.
    ///
    /// # Panics
    ///
    /// Panics if the backend cannot provide the first block.
    #[must_use]
    #[inline]
    pub fn build_sync(self) -> SyncBlockArena {
        self.build().enable_locking()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{ALIGNMENT, SystemBackend};

    assert_impl_all!(BlockArenaBuilder: Send, std::fmt::Debug);
    assert_not_impl_any!(BlockArenaBuilder: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = BlockArenaBuilder::new();
        assert_eq!(builder.capacity, DEFAULT_CAPACITY);
        assert!(builder.backend.is_none());
    }

    #[test]
    fn capacity_can_be_overridden() {
        let builder = BlockArenaBuilder::new().capacity(nz!(10)).capacity(nz!(20));
        assert_eq!(builder.capacity, nz!(20));
    }

    #[test]
    fn build_rounds_capacity_up() {
        let arena = BlockArenaBuilder::new().capacity(nz!(1)).build();
        assert_eq!(arena.capacity(), ALIGNMENT);
    }

    #[test]
    fn build_with_explicit_backend() {
        let arena = BlockArenaBuilder::new()
            .backend(Arc::new(SystemBackend))
            .try_build()
            .unwrap();

        assert_eq!(arena.capacity(), DEFAULT_CAPACITY.get());
    }

    #[test]
    fn build_sync_produces_sync_arena() {
        let arena = BlockArenaBuilder::new().capacity(nz!(64)).build_sync();
        assert_eq!(arena.block_count(), 1);
    }

    #[test]
    fn builder_can_move_between_threads() {
        let builder = BlockArenaBuilder::new().capacity(nz!(64));
        let handle = std::thread::spawn(move || builder.build().capacity());
        assert_eq!(handle.join().unwrap(), 64);
    }
}
