// SPDX-License-Identifier: MPL-2.0

//! A non-recursive mutex built on top of [`super::queue::WaitQueue`], with
//! the ownership-handoff and cancellable-acquire semantics the
//! specification requires: on `unlock`, if any thread is waiting, ownership
//! transfers directly to the thread at the head of the wait-queue — the
//! newly-woken thread never has to re-race for the lock against a thread
//! that calls `lock` in between.
//!
//! Must never be acquired from interrupt context; this kernel core has no
//! interrupt context to begin with (see [`nucleus_hal::cpu`]), so that
//! restriction is enforced simply by never calling these from one.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use nucleus_hal::sync::SpinLock;

use super::queue::WaitQueue;
use crate::process::thread::Thread;

/// The result of a cancellable lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The calling thread was cancelled before or immediately after acquiring
    /// the lock. If it had already acquired the lock, the mutex has already
    /// been released on its behalf.
    Interrupted,
}

/// A mutex whose waiters are served in FIFO order with direct ownership
/// handoff from the releaser to the next waiter.
pub struct KMutex<T: ?Sized> {
    owner: SpinLock<Option<Arc<Thread>>>,
    waitq: WaitQueue,
    val: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for KMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for KMutex<T> {}

impl<T> KMutex<T> {
    pub fn new(val: T) -> Self {
        Self {
            owner: SpinLock::new(None),
            waitq: WaitQueue::new(),
            val: UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> KMutex<T> {
    /// Acquires the mutex, blocking (non-cancellably) while it is held.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this mutex: self-locking
    /// is a programming error, never a legitimate wait condition.
    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let me = Thread::current();
        let mut handed_off = false;
        loop {
            let mut owner = self.owner.lock_irq_disabled();
            match owner.as_ref() {
                None => {
                    *owner = Some(me.clone());
                    return KMutexGuard { mutex: self };
                }
                Some(holder) if Arc::ptr_eq(holder, &me) => {
                    // A true self-lock (calling `lock` again while already
                    // holding, without having gone through the wait-queue)
                    // is a bug. Waking from `unlock`'s direct handoff also
                    // finds `owner` already pointing at us, but only after
                    // we slept at least once — that case is legitimate.
                    assert!(handed_off, "thread tried to lock a mutex it already holds");
                    return KMutexGuard { mutex: self };
                }
                Some(_) => {
                    drop(owner);
                    self.waitq.sleep_on();
                    handed_off = true;
                }
            }
        }
    }

    /// As [`Self::lock`], but the wait is cancellable. If the calling thread
    /// is cancelled while waiting, or was already cancelled the instant it
    /// was handed ownership, this returns [`LockError::Interrupted`] without
    /// leaving the mutex held by the caller.
    pub fn lock_cancellable(&self) -> Result<KMutexGuard<'_, T>, LockError> {
        let me = Thread::current();
        let mut handed_off = false;
        loop {
            let mut owner = self.owner.lock_irq_disabled();
            match owner.as_ref() {
                None => {
                    *owner = Some(me.clone());
                    drop(owner);
                    if me.take_cancelled() {
                        // Cancelled in the window between being granted the
                        // lock and observing it; release before reporting.
                        self.unlock();
                        return Err(LockError::Interrupted);
                    }
                    return Ok(KMutexGuard { mutex: self });
                }
                Some(holder) if Arc::ptr_eq(holder, &me) => {
                    // See `lock`'s matching arm: legitimate only after we've
                    // actually slept and been handed ownership directly.
                    assert!(handed_off, "thread tried to lock a mutex it already holds");
                    if me.take_cancelled() {
                        drop(owner);
                        self.unlock();
                        return Err(LockError::Interrupted);
                    }
                    return Ok(KMutexGuard { mutex: self });
                }
                Some(_) => {
                    drop(owner);
                    if self.waitq.cancellable_sleep_on() {
                        return Err(LockError::Interrupted);
                    }
                    handed_off = true;
                }
            }
        }
    }

    /// Releases the mutex.
    ///
    /// If any thread is waiting, ownership is handed directly to the
    /// longest-waiting one: `owner` is set to that thread *before* it is
    /// woken, so it never has to contend for the lock on wakeup.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not the current owner.
    fn unlock(&self) {
        let me = Thread::current();
        let mut owner = self.owner.lock_irq_disabled();
        assert!(
            owner.as_ref().is_some_and(|holder| Arc::ptr_eq(holder, &me)),
            "thread tried to unlock a mutex it does not hold"
        );

        let next = {
            // `wakeup_on` only dequeues; it doesn't tell us who. We peek the
            // queue's head thread by waking it and reading back the
            // returned handle, which is exactly the thread that will next
            // observe `owner` set to itself.
            self.waitq.wakeup_on()
        };
        *owner = next;
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for KMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(unsafe { &*self.val.get() }, f)
    }
}

/// The RAII guard returned by [`KMutex::lock`] and [`KMutex::lock_cancellable`].
pub struct KMutexGuard<'a, T: ?Sized> {
    mutex: &'a KMutex<T>,
}

impl<'a, T: ?Sized> Deref for KMutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.val.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for KMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.val.get() }
    }
}

impl<'a, T: ?Sized> Drop for KMutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<'a, T: ?Sized> !Send for KMutexGuard<'a, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::thread::Thread;

    #[test]
    fn unlock_hands_ownership_to_fifo_waiter() {
        crate::test_support::init();
        let mutex = Arc::new(KMutex::new(0usize));
        let guard = mutex.lock();

        let (tx, rx) = std::sync::mpsc::channel();
        let m2 = mutex.clone();
        Thread::spawn_kernel_thread(move || {
            let mut g = m2.lock();
            *g += 1;
            tx.send(()).unwrap();
        });

        // Give the waiter a chance to enqueue before we release.
        while mutex.waitq.is_empty() {
            nucleus_hal::task::Task::yield_now();
        }
        drop(guard);
        rx.recv().unwrap();
        assert_eq!(*mutex.lock(), 1);
    }

    #[test]
    fn self_lock_is_forbidden() {
        crate::test_support::init();
        let mutex = Arc::new(KMutex::new(()));
        let (tx, rx) = std::sync::mpsc::channel();
        Thread::spawn_kernel_thread(move || {
            let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _g1 = mutex.lock();
                let _g2 = mutex.lock();
            }))
            .is_err();
            tx.send(panicked).unwrap();
        });
        assert!(rx.recv().unwrap(), "expected self-lock to panic");
    }
}
