// SPDX-License-Identifier: MPL-2.0

//! Tasks are the unit of code execution, scheduled cooperatively and
//! non-preemptively: exactly one task runs at a time, and it keeps the CPU
//! until it calls [`Task::yield_now`] or blocks on a synchronization
//! primitive in [`crate::sync`].

mod processor;
mod scheduler;
#[allow(clippy::module_inception)]
mod task;

pub use self::processor::{disable_preempt, schedule, DisablePreemptGuard};
pub use self::scheduler::{add_task, fetch_task, set_scheduler, FifoScheduler, Scheduler};
pub use self::task::{current_task, Task, TaskId, TaskOptions, TaskStatus};
