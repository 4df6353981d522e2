use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, Ordering};

/// A minimal spin lock for critical sections that last a handful of instructions.
///
/// The only long critical section is block growth, which performs a single backend call.
#[derive(Debug)]
pub(crate) struct SpinLock {
    locked: AtomicBool,
}

/// Releases the lock when dropped.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub(crate) struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl SpinLock {
    pub(crate) const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn lock(&self) -> SpinLockGuard<'_> {
        if self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_contended();
        }

        SpinLockGuard { lock: self }
    }

    #[cold]
    #[cfg_attr(test, mutants::skip)] // Mutations turn this into an infinite loop.
    fn lock_contended(&self) {
        loop {
            // Wait with plain loads so contending threads do not fight over the cache line.
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }

            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    #[cfg(test)]
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Drop for SpinLockGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::UnsafeCell;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(SpinLock: Send, Sync);

    #[test]
    fn guard_releases_on_drop() {
        let lock = SpinLock::new();

        {
            let _guard = lock.lock();
            assert!(lock.is_locked());
        }

        assert!(!lock.is_locked());

        // Can be taken again.
        drop(lock.lock());
    }

    #[test]
    fn protects_shared_counter() {
        struct Counter {
            lock: SpinLock,
            value: UnsafeCell<u64>,
        }

        // SAFETY: value is only accessed while holding the lock.
        unsafe impl Sync for Counter {}

        const THREADS: u64 = 4;
        const ITERATIONS: u64 = 10_000;

        let counter = Counter {
            lock: SpinLock::new(),
            value: UnsafeCell::new(0),
        };

        let counter = &counter;

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(move || {
                    for _ in 0..ITERATIONS {
                        let _guard = counter.lock.lock();

                        // SAFETY: We hold the lock.
                        unsafe {
                            *counter.value.get() += 1;
                        }
                    }
                });
            }
        });

        let _guard = counter.lock.lock();

        // SAFETY: We hold the lock and every worker has finished.
        assert_eq!(unsafe { *counter.value.get() }, THREADS * ITERATIONS);
    }
}
