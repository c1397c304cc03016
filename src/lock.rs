//! Spin-wait mutual exclusion around a single shared value.
//!
//! Listener threads and callers race over small registries (peer table,
//! key ring, the client's active key). Critical sections are map lookups
//! and short cipher calls, so acquisition busy-polls an atomic flag
//! instead of parking the thread. The release is an independent lock-free
//! store, which is what makes the construction safe: a spinning acquirer
//! always observes a release performed by another thread, so a holder can
//! never block its own releaser.

use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// Provider for thread-safe access to a common resource.
///
/// Two usage styles:
///
/// * [`run_with_lock`](ResourceLock::run_with_lock): acquire, run a
///   closure against the value, release on every exit path (a panic in
///   the closure releases the lock and then propagates).
/// * [`lock`](ResourceLock::lock): manual bracketing for a critical
///   section that spans multiple uses (read-then-conditionally-mutate);
///   the returned guard releases on drop.
#[derive(Debug)]
pub struct ResourceLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// The flag serializes all access to `value`, so the lock is Sync whenever
// the value can be sent between the threads taking turns on it.
unsafe impl<T: Send> Sync for ResourceLock<T> {}

impl<T: Default> Default for ResourceLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> ResourceLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Spin until the resource is free, then take exclusive access.
    pub fn lock(&self) -> ResourceGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        ResourceGuard { lock: self }
    }

    /// Run `f` with exclusive access to the value, releasing afterwards.
    pub fn run_with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Consume the lock and hand back the value. Only reachable when no
    /// guard is outstanding, since it takes `self` by value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// Exclusive access to the value inside a [`ResourceLock`]. Dropping the
/// guard releases the lock, including during unwinding.
pub struct ResourceGuard<'a, T> {
    lock: &'a ResourceLock<T>,
}

impl<T> Deref for ResourceGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Exclusive by construction: the flag was won in `lock`.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for ResourceGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for ResourceGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guards_give_exclusive_access() {
        let lock = ResourceLock::new(5u32);
        lock.run_with_lock(|value| *value += 1);
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn no_lost_updates_under_contention() {
        const THREADS: usize = 8;
        const INCREMENTS: usize = 10_000;

        let counter = Arc::new(ResourceLock::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    counter.run_with_lock(|value| *value += 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.run_with_lock(|value| *value), THREADS * INCREMENTS);
    }

    #[test]
    fn panic_in_critical_section_releases_the_lock() {
        let lock = Arc::new(ResourceLock::new(0u32));

        let panicker = Arc::clone(&lock);
        let result = thread::spawn(move || {
            panicker.run_with_lock(|_| panic!("mid-section failure"));
        })
        .join();
        assert!(result.is_err());

        // A deadlocked lock would hang here rather than return.
        lock.run_with_lock(|value| *value = 7);
        assert_eq!(*lock.lock(), 7);
    }

    #[test]
    fn manual_guard_spans_a_composite_section() {
        let lock = ResourceLock::new(vec![1, 2, 3]);

        let mut guard = lock.lock();
        if guard.contains(&2) {
            guard.push(4);
        }
        drop(guard);

        assert_eq!(*lock.lock(), vec![1, 2, 3, 4]);
    }
}
