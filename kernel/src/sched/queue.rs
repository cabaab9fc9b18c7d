// SPDX-License-Identifier: MPL-2.0

//! FIFO wait-queues: the sleep/wakeup/cancel primitives every blocking
//! operation in this kernel core (mutex acquire, `waitpid`, the page-frame
//! busy wait, ...) is built from.
//!
//! A wait-queue is a FIFO of sleeping threads. `sleep_on` and
//! `cancellable_sleep_on` park the calling thread on the queue;
//! `wakeup_on`/`broadcast_on` discharge it from the other side. Unlike
//! [`nucleus_hal::sync::WaitQueue`], which re-checks a caller-supplied
//! condition on every wakeup, this queue hands out a single, one-shot wakeup
//! per `sleep_on` call — matching the "wakeup dequeues exactly one waiter"
//! wording the specification uses throughout. It is built directly on top
//! of the [`Waiter`]/[`Waker`] pair [`nucleus_hal::sync`] already exposes for
//! this purpose.

use std::collections::VecDeque;
use std::sync::Arc;

use nucleus_hal::sync::{SpinLock, Waiter, Waker};

use crate::process::thread::Thread;

struct Entry {
    thread: Arc<Thread>,
    waker: Arc<Waker>,
}

/// A handle threads can be enqueued on and woken from, FIFO.
///
/// The inner deque lives behind an `Arc` so that a sleeping thread can keep
/// a handle to "the queue I am on" (see [`Thread::wait_channel`]) that
/// remains valid no matter where the owning `WaitQueue` value itself lives.
pub struct WaitQueue {
    entries: Arc<SpinLock<VecDeque<Entry>>>,
}

/// A thread's handle onto the specific queue (and specific wakeup) it is
/// cancellably sleeping on, so that [`cancel`] can find and remove it.
#[derive(Clone)]
pub struct WaitChannel {
    entries: Arc<SpinLock<VecDeque<Entry>>>,
    waker: Arc<Waker>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(SpinLock::new(VecDeque::new())),
        }
    }

    /// Puts the calling thread to sleep until some `wakeup_on`/`broadcast_on`
    /// on this queue dequeues it. Not interruptible by cancellation.
    pub fn sleep_on(&self) {
        let thread = Thread::current();
        let (waiter, waker) = Waiter::new_pair();
        self.entries
            .lock_irq_disabled()
            .push_back(Entry { thread, waker });
        waiter.wait();
    }

    /// As [`Self::sleep_on`], but the sleep can be interrupted by
    /// [`cancel`]. Returns `true` if the thread returned because it was
    /// cancelled rather than because of a normal wakeup.
    pub fn cancellable_sleep_on(&self) -> bool {
        let thread = Thread::current();
        let (waiter, waker) = Waiter::new_pair();
        let channel = WaitChannel {
            entries: self.entries.clone(),
            waker: waker.clone(),
        };
        thread.set_wait_channel(Some(channel));
        self.entries
            .lock_irq_disabled()
            .push_back(Entry { thread: thread.clone(), waker });
        waiter.wait();
        thread.set_wait_channel(None);
        thread.take_cancelled()
    }

    /// Wakes the longest-waiting thread on this queue, if any, and returns it.
    pub fn wakeup_on(&self) -> Option<Arc<Thread>> {
        let entry = self.entries.lock_irq_disabled().pop_front()?;
        entry.waker.wake_up();
        Some(entry.thread)
    }

    /// Wakes every thread currently on this queue.
    pub fn broadcast_on(&self) {
        loop {
            let entry = self.entries.lock_irq_disabled().pop_front();
            match entry {
                Some(entry) => entry.waker.wake_up(),
                None => break,
            }
        }
    }

    /// Returns whether any thread is currently waiting on this queue.
    pub fn is_empty(&self) -> bool {
        self.entries.lock_irq_disabled().is_empty()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitChannel {
    /// Removes `thread`'s entry from this channel's queue, if still present,
    /// and wakes it. Idempotent: a race against a concurrent `wakeup_on`
    /// that already popped this entry is a harmless no-op, since `wake_up`
    /// on an already-woken [`Waker`] does nothing.
    pub(crate) fn cancel(&self, thread: &Arc<Thread>) {
        let mut entries = self.entries.lock_irq_disabled();
        if let Some(pos) = entries.iter().position(|e| Arc::ptr_eq(&e.thread, thread)) {
            entries.remove(pos);
        }
        drop(entries);
        self.waker.wake_up();
    }
}

/// Cancels `thread`.
///
/// Sets its cancelled flag. If the thread is currently in a cancellable
/// sleep, it is removed from that wait-queue and made runnable immediately,
/// returning from `cancellable_sleep_on` with the cancelled indication. A
/// non-cancellable sleep is not interrupted; the flag is only observed the
/// next time the thread reaches a cancellable point.
pub fn cancel(thread: &Arc<Thread>) {
    thread.mark_cancelled();
    if let Some(channel) = thread.wait_channel() {
        channel.cancel(thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::thread::Thread;

    fn spawn_sleeper(q: Arc<WaitQueue>, done: std::sync::mpsc::Sender<bool>) {
        Thread::spawn_kernel_thread(move || {
            let cancelled = q.cancellable_sleep_on();
            done.send(cancelled).unwrap();
        });
    }

    #[test]
    fn wakeup_on_discharges_fifo() {
        crate::test_support::init();
        let q = Arc::new(WaitQueue::new());
        let (tx1, rx1) = std::sync::mpsc::channel();
        let (tx2, rx2) = std::sync::mpsc::channel();
        spawn_sleeper(q.clone(), tx1);
        spawn_sleeper(q.clone(), tx2);
        while q.is_empty() {
            nucleus_hal::task::Task::yield_now();
        }
        while q.entries.lock_irq_disabled().len() < 2 {
            nucleus_hal::task::Task::yield_now();
        }
        let first = q.wakeup_on();
        assert!(first.is_some());
        assert_eq!(rx1.recv().unwrap(), false);
        let second = q.wakeup_on();
        assert!(second.is_some());
        assert_eq!(rx2.recv().unwrap(), false);
    }

    #[test]
    fn cancel_wakes_with_cancelled_indication() {
        crate::test_support::init();
        let q = Arc::new(WaitQueue::new());
        let (tx, rx) = std::sync::mpsc::channel();
        let q2 = q.clone();
        let thread = Thread::spawn_kernel_thread(move || {
            let cancelled = q2.cancellable_sleep_on();
            tx.send(cancelled).unwrap();
        });
        while q.is_empty() {
            nucleus_hal::task::Task::yield_now();
        }
        cancel(&thread);
        assert_eq!(rx.recv().unwrap(), true);
    }
}
