// SPDX-License-Identifier: MPL-2.0

//! Kernel threads: the schedulable unit each process' `threads` list holds.
//!
//! A [`Thread`] is layered on top of [`nucleus_hal::task::Task`], which
//! supplies the actual (simulated) context switch. This module adds what
//! the specification's process/thread lifecycle needs beyond a bare task:
//! a process back-pointer, the cancellation flag and wait-channel used by
//! cancellable sleep, and an exit-value slot threads resolve instead of
//! stack-unwinding out of the kernel.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use nucleus_hal::sync::SpinLock;
use nucleus_hal::task::{Task, TaskOptions};

use crate::process::process::Process;
use crate::sched::WaitChannel;

/// A thread id, unique for the lifetime of the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub u64);

fn next_tid() -> Tid {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Tid(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// The lifecycle state of a thread, mirroring the specification's
/// {running, sleeping, cancellable-sleeping, exited} state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Sleeping,
    CancellableSleeping,
    Exited,
}

pub struct Thread {
    tid: Tid,
    process: SpinLock<Weak<Process>>,
    state: SpinLock<ThreadState>,
    cancelled: AtomicBool,
    wait_channel: SpinLock<Option<WaitChannel>>,
    errno: AtomicI32,
    retval: SpinLock<Option<i64>>,
}

thread_local! {
    static CURRENT: std::cell::RefCell<Option<Arc<Thread>>> = const { std::cell::RefCell::new(None) };
}

impl Thread {
    fn new(process: Weak<Process>) -> Arc<Self> {
        Arc::new(Self {
            tid: next_tid(),
            process: SpinLock::new(process),
            state: SpinLock::new(ThreadState::Running),
            cancelled: AtomicBool::new(false),
            wait_channel: SpinLock::new(None),
            errno: AtomicI32::new(0),
            retval: SpinLock::new(None),
        })
    }

    /// Returns the thread currently holding the CPU.
    ///
    /// # Panics
    ///
    /// Panics outside of a running kernel thread.
    pub fn current() -> Arc<Thread> {
        CURRENT.with(|c| c.borrow().clone()).unwrap_or_else(|| {
            Task::current()
                .data()
                .downcast_ref::<Arc<Thread>>()
                .expect("current task has no associated Thread")
                .clone()
        })
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.lock_irq_disabled().upgrade()
    }

    pub(crate) fn set_process(&self, process: Weak<Process>) {
        *self.process.lock_irq_disabled() = process;
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock_irq_disabled()
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        *self.state.lock_irq_disabled() = state;
    }

    pub fn errno(&self) -> i32 {
        self.errno.load(Ordering::Relaxed)
    }

    pub fn set_errno(&self, errno: i32) {
        self.errno.store(errno, Ordering::Relaxed);
    }

    pub fn retval(&self) -> Option<i64> {
        *self.retval.lock_irq_disabled()
    }

    pub(crate) fn set_retval(&self, retval: i64) {
        *self.retval.lock_irq_disabled() = Some(retval);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Reads and clears the cancelled flag, reporting whether it was set.
    pub(crate) fn take_cancelled(&self) -> bool {
        self.cancelled.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn wait_channel(&self) -> Option<WaitChannel> {
        self.wait_channel.lock_irq_disabled().clone()
    }

    pub(crate) fn set_wait_channel(&self, channel: Option<WaitChannel>) {
        let state = if channel.is_some() {
            ThreadState::CancellableSleeping
        } else {
            ThreadState::Running
        };
        *self.wait_channel.lock_irq_disabled() = channel;
        self.set_state(state);
    }

    /// Creates and runs a new thread belonging to `process`, resuming at
    /// `entry(arg)`. When `entry` returns, the thread exits exactly as if
    /// it had called [`exit_current`] with the returned value.
    pub fn create<F>(process: &Arc<Process>, entry: F) -> Arc<Thread>
    where
        F: FnOnce() -> i64 + Send + 'static,
    {
        let thread = Thread::new(Arc::downgrade(process));
        process.threads.lock_irq_disabled().push(thread.clone());

        let for_task = thread.clone();
        TaskOptions::new(move || {
            CURRENT.with(|c| *c.borrow_mut() = Some(for_task.clone()));
            let retval = entry();
            exit_current(retval);
        })
        .data(thread.clone())
        .spawn()
        .expect("failed to spawn kernel thread");

        thread
    }

    /// Spawns a bare kernel thread with no owning process, for use by
    /// infrastructure (tests, the idle loop) that runs outside any process.
    pub fn spawn_kernel_thread<F>(entry: F) -> Arc<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = Thread::new(Weak::new());
        let for_task = thread.clone();
        TaskOptions::new(move || {
            CURRENT.with(|c| *c.borrow_mut() = Some(for_task.clone()));
            entry();
        })
        .data(thread.clone())
        .spawn()
        .expect("failed to spawn kernel thread");
        thread
    }
}

/// Cancels `thread`, setting `retval` as the value it will be reaped with.
///
/// If `thread` is the caller, this is equivalent to [`exit_current`] and
/// never returns. Otherwise the thread is flagged cancelled and, if it is
/// in a cancellable sleep, woken immediately; a non-cancellable sleep runs
/// to completion before the flag is observed.
pub fn cancel(thread: &Arc<Thread>, retval: i64) {
    if Arc::ptr_eq(thread, &Thread::current()) {
        exit_current(retval);
    }
    thread.set_retval(retval);
    crate::sched::cancel(thread);
}

/// Exits the current thread with `retval`, notifying its owning process,
/// and never returns.
pub fn exit_current(retval: i64) -> ! {
    let thread = Thread::current();
    thread.set_retval(retval);
    thread.set_state(ThreadState::Exited);
    if let Some(process) = thread.process() {
        process.thread_exited(&thread, retval);
    }
    Task::current().exit();
}
