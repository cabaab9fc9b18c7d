// SPDX-License-Identifier: MPL-2.0

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::task::{disable_preempt, DisablePreemptGuard};

/// A spin lock.
///
/// Since exactly one task runs at a time (see [`crate::task`]), a `SpinLock`
/// never actually spins against another task running on this CPU; contention
/// only happens across a `yield`/[`crate::task::Task::yield_now`] point. What
/// `lock()` buys you is the panic in [`crate::task::schedule`] that fires if
/// you try to yield while still holding the lock.
pub struct SpinLock<T> {
    val: UnsafeCell<T>,
    lock: AtomicBool,
}

impl<T> SpinLock<T> {
    /// Creates a new spin lock.
    pub const fn new(val: T) -> Self {
        Self {
            val: UnsafeCell::new(val),
            lock: AtomicBool::new(false),
        }
    }

    /// Acquires the spin lock, disabling preemption for as long as the guard lives.
    ///
    /// This method runs in a busy loop until the lock can be acquired. Kept as a
    /// distinct name from [`Self::lock`] to mirror call sites that historically
    /// wanted IRQ-safety; on this single-CPU cooperative kernel the two are the
    /// same operation.
    pub fn lock_irq_disabled(&self) -> SpinLockGuard<T> {
        self.lock()
    }

    /// Tries to acquire the spin lock immediately, disabling preemption on success.
    pub fn try_lock_irq_disabled(&self) -> Option<SpinLockGuard<T>> {
        self.try_lock()
    }

    /// Acquires the spin lock, disabling preemption for as long as the guard lives.
    pub fn lock(&self) -> SpinLockGuard<T> {
        let guard = disable_preempt();
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            _preempt_guard: guard,
        }
    }

    /// Tries to acquire the spin lock immediately.
    pub fn try_lock(&self) -> Option<SpinLockGuard<T>> {
        let guard = disable_preempt();
        if self.try_acquire_lock() {
            return Some(SpinLockGuard {
                lock: self,
                _preempt_guard: guard,
            });
        }
        None
    }

    fn acquire_lock(&self) {
        while !self.try_acquire_lock() {
            std::hint::spin_loop();
        }
    }

    fn try_acquire_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release_lock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl<T: fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.val, f)
    }
}

// Safety: only the lock holder is permitted to access the inner data of `SpinLock`.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

/// The guard of a [`SpinLock`].
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _preempt_guard: DisablePreemptGuard,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.val.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.val.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.release_lock();
    }
}

impl<'a, T: fmt::Debug> fmt::Debug for SpinLockGuard<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<'a, T> !Send for SpinLockGuard<'a, T> {}

// Safety: a `SpinLockGuard` may be shared between tasks as long as `T: Sync`,
// since only one task runs at a time.
unsafe impl<T: Sync> Sync for SpinLockGuard<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes_concurrent_access() {
        let lock = SpinLock::new(0usize);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let _guard = lock.lock();
        assert!(lock.try_lock().is_none());
    }
}
