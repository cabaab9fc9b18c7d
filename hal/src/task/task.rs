// SPDX-License-Identifier: MPL-2.0

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use super::{add_task, processor::schedule};
use crate::prelude::*;

/// The unique, never-reused id of a [`Task`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct TaskId(u64);

fn next_task_id() -> TaskId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// A task that executes a closure to completion.
///
/// Tasks are scheduled cooperatively and non-preemptively: a task keeps the
/// CPU until it voluntarily calls [`Task::yield_now`] (directly, or
/// indirectly by blocking on a [`crate::sync::WaitQueue`] or
/// [`crate::sync::Mutex`]). Exactly one task's closure is ever executing at
/// a time; every other live task is parked on its [`Baton`]. This is how
/// this kernel core models a hardware context switch without depending on
/// architecture-specific register save/restore code, which is out of scope
/// for this kernel core: the OS thread backing a parked task retains its
/// real call stack, so yielding from arbitrarily deep inside a syscall
/// handler works exactly as it would with one.
pub struct Task {
    id: TaskId,
    data: Box<dyn Any + Send + Sync>,
    inner: Mutex<TaskInner>,
    baton: Baton,
}

pub(crate) struct TaskInner {
    pub task_status: TaskStatus,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
/// The status of a task.
pub enum TaskStatus {
    /// The task is runnable.
    Runnable,
    /// The task is running in the foreground but will sleep when it goes to the background.
    Sleepy,
    /// The task is sleeping in the background.
    Sleeping,
    /// The task has exited.
    Exited,
}

/// A single-slot handoff token.
///
/// A task parks on its own baton to give up the CPU, and is resumed when
/// another task (the one that picked it off the run queue) grants it.
struct Baton {
    granted: Mutex<bool>,
    cvar: Condvar,
}

impl Baton {
    fn new() -> Self {
        Self {
            granted: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn grant(&self) {
        let mut granted = self.granted.lock().unwrap();
        *granted = true;
        self.cvar.notify_one();
    }

    fn wait(&self) {
        let mut granted = self.granted.lock().unwrap();
        while !*granted {
            granted = self.cvar.wait(granted).unwrap();
        }
        *granted = false;
    }
}

thread_local! {
    static CURRENT: std::cell::RefCell<Option<Arc<Task>>> = const { std::cell::RefCell::new(None) };
}

fn set_current(task: Arc<Task>) {
    CURRENT.with(|c| *c.borrow_mut() = Some(task));
}

/// Retrieves the task currently holding the CPU, if any.
pub fn current_task() -> Option<Arc<Task>> {
    CURRENT.with(|c| c.borrow().clone())
}

impl Task {
    /// Gets the current task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a running task.
    pub fn current() -> Arc<Task> {
        current_task().expect("Task::current() called with no task running")
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn inner_exclusive_access(&self) -> std::sync::MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn baton(&self) -> &Baton {
        &self.baton
    }

    /// Yields execution so that another task may be scheduled.
    ///
    /// Note that this method cannot be simply named "yield" as the name is
    /// a Rust keyword.
    pub fn yield_now() {
        schedule();
    }

    /// Returns the task status.
    pub fn status(&self) -> TaskStatus {
        self.inner_exclusive_access().task_status
    }

    /// Returns the task data.
    pub fn data(&self) -> &(dyn Any + Send + Sync) {
        &*self.data
    }

    /// Marks the task exited and gives up the CPU for the last time.
    ///
    /// An exited task is never re-enqueued by [`schedule`], so this only
    /// returns control to another task (if one is ready) or, if this was the
    /// last runnable task, parks the backing OS thread forever.
    pub fn exit(&self) -> ! {
        self.inner_exclusive_access().task_status = TaskStatus::Exited;
        schedule();
        loop {
            std::thread::park();
        }
    }

}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish()
    }
}

/// Options to create or spawn a new task.
pub struct TaskOptions {
    func: Option<Box<dyn FnOnce() + Send>>,
    data: Option<Box<dyn Any + Send + Sync>>,
}

impl TaskOptions {
    /// Creates a set of options for a task.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Some(Box::new(func)),
            data: None,
        }
    }

    pub fn data<T>(mut self, data: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.data = Some(Box::new(data));
        self
    }

    fn build(&mut self) -> Arc<Task> {
        Arc::new(Task {
            id: next_task_id(),
            data: self.data.take().unwrap_or_else(|| Box::new(())),
            inner: Mutex::new(TaskInner {
                task_status: TaskStatus::Runnable,
            }),
            baton: Baton::new(),
        })
    }

    /// Builds a task without spawning or scheduling it.
    ///
    /// Exposed for tests that only need an [`Arc<Task>`] identity, e.g. to
    /// exercise a [`super::Scheduler`] implementation directly.
    #[cfg(test)]
    pub(crate) fn build_detached(mut self) -> Arc<Task> {
        self.build()
    }

    /// Builds a new task and runs it.
    ///
    /// The task's backing OS thread is spawned immediately but parks on its
    /// baton until the scheduler grants it the CPU; this call also nudges
    /// the scheduler once, so if nothing else is currently running, the new
    /// task (or whichever task is now longest-waiting) starts immediately.
    pub fn spawn(mut self) -> Result<Arc<Task>> {
        let func = self.func.take().expect("task function must be set");
        let task = self.build();

        let spawned = task.clone();
        thread::Builder::new()
            .name(format!("task-{}", spawned.id.0))
            .spawn(move || {
                spawned.baton.wait();
                set_current(spawned.clone());
                func();
                spawned.exit();
            })
            .expect("failed to spawn task thread");

        add_task(task.clone());
        schedule();
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::task::scheduler::{set_scheduler, FifoScheduler};

    static SCHEDULER: FifoScheduler = FifoScheduler::new();

    fn ensure_scheduler() {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| set_scheduler(&SCHEDULER));
    }

    #[test]
    fn spawned_task_runs_its_body() {
        ensure_scheduler();
        let (tx, rx) = mpsc::channel();
        TaskOptions::new(move || {
            tx.send(42).unwrap();
        })
        .spawn()
        .unwrap();
        assert_eq!(rx.recv().unwrap(), 42);
    }

    #[test]
    fn yield_now_returns_control_to_scheduler() {
        ensure_scheduler();
        let (tx, rx) = mpsc::channel();
        TaskOptions::new(move || {
            Task::yield_now();
            tx.send(()).unwrap();
        })
        .spawn()
        .unwrap();
        rx.recv().unwrap();
    }

    #[test]
    fn two_tasks_both_complete() {
        ensure_scheduler();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        TaskOptions::new(move || {
            tx.send(1).unwrap();
        })
        .spawn()
        .unwrap();
        TaskOptions::new(move || {
            tx2.send(2).unwrap();
        })
        .spawn()
        .unwrap();
        let mut observed: Vec<_> = rx.iter().take(2).collect();
        observed.sort_unstable();
        assert_eq!(observed, vec![1, 2]);
    }
}
