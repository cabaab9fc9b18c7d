// SPDX-License-Identifier: MPL-2.0

use std::collections::VecDeque;

use lazy_static::lazy_static;

use crate::{prelude::*, sync::SpinLock, task::Task};

lazy_static! {
    pub(crate) static ref GLOBAL_SCHEDULER: SpinLock<GlobalScheduler> =
        SpinLock::new(GlobalScheduler { scheduler: None });
}

/// A scheduler for tasks.
pub trait Scheduler: Sync + Send {
    fn enqueue(&self, task: Arc<Task>);

    fn dequeue(&self) -> Option<Arc<Task>>;

    /// Tells whether the given task should be preempted by other tasks in the queue.
    ///
    /// This kernel core is non-preemptive, so every [`Scheduler`] implementation
    /// used by it returns `false`.
    fn should_preempt(&self, task: &Arc<Task>) -> bool;
}

pub struct GlobalScheduler {
    scheduler: Option<&'static dyn Scheduler>,
}

impl GlobalScheduler {
    /// Dequeues a task using the installed scheduler.
    ///
    /// # Panics
    ///
    /// Panics if no scheduler has been installed via [`set_scheduler`].
    pub fn dequeue(&mut self) -> Option<Arc<Task>> {
        self.scheduler.expect("no scheduler installed").dequeue()
    }

    /// Enqueues a task using the installed scheduler.
    ///
    /// # Panics
    ///
    /// Panics if no scheduler has been installed via [`set_scheduler`].
    pub fn enqueue(&mut self, task: Arc<Task>) {
        self.scheduler.expect("no scheduler installed").enqueue(task)
    }
}

/// Sets the global task scheduler.
///
/// This must be called before invoking [`crate::task::TaskOptions::spawn`].
pub fn set_scheduler(scheduler: &'static dyn Scheduler) {
    GLOBAL_SCHEDULER.lock_irq_disabled().scheduler = Some(scheduler);
}

pub fn fetch_task() -> Option<Arc<Task>> {
    GLOBAL_SCHEDULER.lock_irq_disabled().dequeue()
}

pub fn add_task(task: Arc<Task>) {
    GLOBAL_SCHEDULER.lock_irq_disabled().enqueue(task);
}

/// A simple FIFO (First-In-First-Out) task scheduler.
///
/// This is the only scheduler this kernel core ships: [`Scheduler::should_preempt`]
/// always returns `false`, matching its non-preemptive scheduling model.
pub struct FifoScheduler {
    task_queue: SpinLock<VecDeque<Arc<Task>>>,
}

impl FifoScheduler {
    /// Creates a new instance of `FifoScheduler`.
    pub const fn new() -> Self {
        FifoScheduler {
            task_queue: SpinLock::new(VecDeque::new()),
        }
    }
}

impl Default for FifoScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for FifoScheduler {
    fn enqueue(&self, task: Arc<Task>) {
        self.task_queue.lock_irq_disabled().push_back(task);
    }

    fn dequeue(&self) -> Option<Arc<Task>> {
        self.task_queue.lock_irq_disabled().pop_front()
    }

    fn should_preempt(&self, _task: &Arc<Task>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_task() -> Arc<Task> {
        crate::task::TaskOptions::new(|| {})
            .build_detached()
    }

    #[test]
    fn fifo_scheduler_preserves_enqueue_order() {
        let scheduler = FifoScheduler::new();
        let a = dummy_task();
        let b = dummy_task();
        scheduler.enqueue(a.clone());
        scheduler.enqueue(b.clone());
        assert_eq!(scheduler.dequeue().unwrap().id(), a.id());
        assert_eq!(scheduler.dequeue().unwrap().id(), b.id());
        assert!(scheduler.dequeue().is_none());
    }
}
