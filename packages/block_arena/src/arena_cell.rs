use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::slice;
use std::str;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tracing::debug;

use crate::Chain;

/// Shared state of both arena flavors: the chain behind interior mutability plus the count of
/// external holders that must reach zero before the arena may be torn down.
///
/// The holder count lives outside the `UnsafeCell` so that it can be updated from any thread
/// without touching the chain.
pub(crate) struct ArenaCell {
    chain: UnsafeCell<Chain>,
    refs: AtomicUsize,
}

impl ArenaCell {
    pub(crate) fn new(chain: Chain) -> Self {
        Self {
            chain: UnsafeCell::new(chain),
            refs: AtomicUsize::new(0),
        }
    }

    /// Pointer to the chain. Callers are responsible for ensuring that no two threads access
    /// the chain through it at the same time.
    #[inline]
    pub(crate) fn chain_ptr(&self) -> *mut Chain {
        self.chain.get()
    }

    #[inline]
    pub(crate) fn chain_mut(&mut self) -> &mut Chain {
        self.chain.get_mut()
    }

    #[inline]
    pub(crate) fn retain(&self) {
        self.refs.fetch_add(1, Ordering::Relaxed);
    }

    /// # Panics
    ///
    /// Panics if there is no outstanding reference to release.
    #[inline]
    pub(crate) fn release(&self) {
        let previous = self
            .refs
            .fetch_update(Ordering::Release, Ordering::Relaxed, |refs| refs.checked_sub(1));

        assert!(
            previous.is_ok(),
            "released an arena reference that was never retained"
        );
    }

    #[inline]
    pub(crate) fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ArenaCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The chain may be in use by another thread, so we only show what is safe to read.
        f.debug_struct("ArenaCell")
            .field("refs", &self.ref_count())
            .finish_non_exhaustive()
    }
}

impl Drop for ArenaCell {
    fn drop(&mut self) {
        let chain = self.chain.get_mut();

        chain.clear();

        let refs = *self.refs.get_mut();

        // If we are already unwinding, a second panic would abort the process. Leaking the head
        // block is the safe outcome either way.
        if refs != 0 {
            if thread::panicking() {
                return;
            }

            panic!("arena dropped while {refs} external references are still held");
        }

        chain.release_head();

        debug!("destroyed arena");
    }
}

/// Views a fresh arena region as uninitialized bytes.
///
/// # Safety
///
/// `ptr` must be valid for writes of `len` bytes for `'a` and not aliased by any other
/// reference during `'a`.
#[inline]
pub(crate) unsafe fn uninit_bytes<'a>(ptr: NonNull<u8>, len: usize) -> &'a mut [MaybeUninit<u8>] {
    // SAFETY: Forwarding safety requirements to the caller.
    unsafe { slice::from_raw_parts_mut(ptr.as_ptr().cast::<MaybeUninit<u8>>(), len) }
}

/// Fills a fresh region with zeroes.
#[inline]
pub(crate) fn zeroed(bytes: &mut [MaybeUninit<u8>]) -> &mut [u8] {
    bytes.fill(MaybeUninit::new(0));

    // SAFETY: Every byte was initialized above and MaybeUninit<u8> has the layout of u8.
    unsafe { slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<u8>(), bytes.len()) }
}

/// Copies `source` into the start of a fresh region of exactly `source.len()` bytes.
#[inline]
pub(crate) fn copy_bytes<'a>(target: &'a mut [MaybeUninit<u8>], source: &[u8]) -> &'a mut [u8] {
    assert_eq!(target.len(), source.len());

    // SAFETY: Both regions are `source.len()` bytes long and a fresh arena region cannot
    // overlap a borrowed slice.
    unsafe {
        ptr::copy_nonoverlapping(source.as_ptr(), target.as_mut_ptr().cast::<u8>(), source.len());
    }

    // SAFETY: Every byte was initialized by the copy above.
    unsafe { slice::from_raw_parts_mut(target.as_mut_ptr().cast::<u8>(), target.len()) }
}

/// Copies `source` plus a NUL terminator into a fresh region of `source.len() + 1` bytes and
/// returns the copied string without the terminator.
#[inline]
pub(crate) fn copy_str_nul<'a>(target: &'a mut [MaybeUninit<u8>], source: &str) -> &'a str {
    let (text, terminator) = target.split_at_mut(source.len());

    match terminator {
        [nul] => {
            nul.write(0);
        }
        _ => panic!("string copy target must have room for exactly one terminator"),
    }

    let text = copy_bytes(text, source.as_bytes());

    // SAFETY: The bytes were copied verbatim from a valid str.
    unsafe { str::from_utf8_unchecked(text) }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use new_zealand::nz;

    use super::*;
    use crate::{Placement, SystemBackend};

    fn cell() -> ArenaCell {
        ArenaCell::new(Chain::new(nz!(64), Arc::new(SystemBackend)).unwrap())
    }

    #[test]
    fn refs_balance() {
        let cell = cell();

        cell.retain();
        cell.retain();
        assert_eq!(cell.ref_count(), 2);

        cell.release();
        cell.release();
        assert_eq!(cell.ref_count(), 0);
    }

    #[test]
    #[should_panic]
    fn release_without_retain_panics() {
        let cell = cell();
        cell.release();
    }

    #[test]
    #[should_panic]
    fn drop_with_outstanding_refs_panics() {
        let cell = cell();
        cell.retain();
        drop(cell);
    }

    #[test]
    fn copy_str_nul_writes_terminator() {
        let mut cell = cell();
        let ptr = cell.chain_mut().allocate(6, Placement::Aligned).unwrap();

        // SAFETY: The chain just handed out 6 bytes.
        let target = unsafe { uninit_bytes(ptr, 6) };
        let copied = copy_str_nul(target, "hello");

        assert_eq!(copied, "hello");

        // SAFETY: The terminator is the sixth byte of the region.
        assert_eq!(unsafe { ptr.add(5).read() }, 0);
    }

    #[test]
    fn zeroed_clears_previous_contents() {
        let mut buffer = [MaybeUninit::new(0xFF_u8); 16];
        let bytes = zeroed(&mut buffer);

        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn debug_shows_refs() {
        let cell = cell();
        let output = format!("{cell:?}");

        assert!(output.contains("refs"));
    }
}
