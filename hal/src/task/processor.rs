// SPDX-License-Identifier: MPL-2.0

use std::cell::Cell;
use std::sync::Arc;

use super::{
    scheduler::fetch_task,
    task::{current_task, Task, TaskStatus},
};

/// Calls this function to switch to another task using the global scheduler.
///
/// If no other task is ready to run, this returns immediately and the
/// calling task (if any) keeps running uninterrupted.
pub fn schedule() {
    if let Some(next) = fetch_task() {
        switch_to_task(next);
    }
}

/// Hands the CPU to `next_task`.
///
/// If a task is currently running, it is re-enqueued (if still runnable) or
/// marked sleeping (if it called [`schedule`] to block), and its backing OS
/// thread is parked on its baton until it is granted the CPU again.
fn switch_to_task(next_task: Arc<Task>) {
    if !PREEMPT_COUNT.with(Cell::get).eq(&0) {
        panic!(
            "Calling schedule() while holding {} locks",
            PREEMPT_COUNT.with(Cell::get)
        );
    }

    let current = current_task();

    if let Some(current) = &current {
        let mut inner = current.inner_exclusive_access();
        match inner.task_status {
            TaskStatus::Runnable => {
                drop(inner);
                super::add_task(current.clone());
            }
            TaskStatus::Sleepy => {
                inner.task_status = TaskStatus::Sleeping;
            }
            TaskStatus::Sleeping | TaskStatus::Exited => {}
        }
    }

    log::trace!(
        "switching from {:?} to {:?}",
        current.as_ref().map(|t| t.id()),
        next_task.id()
    );

    next_task.baton().grant();

    if let Some(current) = current {
        // Park this OS thread until some other task picks `current` back off
        // the run queue and grants its baton again.
        current.baton().wait();
    }
}

thread_local! {
    static PREEMPT_COUNT: Cell<usize> = const { Cell::new(0) };
}

/// A guard that disables yielding for as long as it is held.
///
/// Held, e.g., while a [`crate::sync::SpinLock`] is locked: calling
/// [`schedule`] while holding a spin lock would deadlock the lock (no other
/// task can ever release it on this single-CPU kernel), so we panic instead.
pub struct DisablePreemptGuard {
    private: (),
}

impl !Send for DisablePreemptGuard {}

impl DisablePreemptGuard {
    fn new() -> Self {
        PREEMPT_COUNT.with(|c| c.set(c.get() + 1));
        Self { private: () }
    }
}

impl Drop for DisablePreemptGuard {
    fn drop(&mut self) {
        PREEMPT_COUNT.with(|c| c.set(c.get() - 1));
    }
}

/// Disables yielding until the returned guard is dropped.
#[must_use]
pub fn disable_preempt() -> DisablePreemptGuard {
    DisablePreemptGuard::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::scheduler::{set_scheduler, FifoScheduler};
    use crate::task::TaskOptions;

    static SCHEDULER: FifoScheduler = FifoScheduler::new();

    fn ensure_scheduler() {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| set_scheduler(&SCHEDULER));
    }

    #[test]
    fn schedule_while_holding_a_lock_panics() {
        ensure_scheduler();
        let (tx, rx) = std::sync::mpsc::channel();
        // A second task must be ready, or `schedule()` is a silent no-op and
        // never reaches the locks-held check.
        TaskOptions::new(|| {}).spawn().unwrap();
        TaskOptions::new(move || {
            let result = std::panic::catch_unwind(|| {
                let _guard = disable_preempt();
                schedule();
            });
            tx.send(result.is_err()).unwrap();
        })
        .spawn()
        .unwrap();
        assert!(rx.recv().unwrap(), "expected schedule() to panic");
    }

    #[test]
    fn disable_preempt_guard_nests_and_releases() {
        ensure_scheduler();
        let (tx, rx) = std::sync::mpsc::channel();
        TaskOptions::new(move || {
            {
                let _a = disable_preempt();
                let _b = disable_preempt();
            }
            // Both guards dropped: scheduling is no longer disabled.
            schedule();
            tx.send(()).unwrap();
        })
        .spawn()
        .unwrap();
        rx.recv().unwrap();
    }
}
