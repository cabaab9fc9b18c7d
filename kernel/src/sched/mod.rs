// SPDX-License-Identifier: MPL-2.0

//! Cooperative, non-preemptive scheduling primitives: FIFO wait-queues
//! ([`WaitQueue`]) and the mutex built on top of them ([`KMutex`]).
//!
//! The actual run queue and context switch live in [`nucleus_hal::task`];
//! this module only adds the thread-aware sleep/wakeup/cancel vocabulary
//! the rest of the kernel core is specified in terms of.

pub mod mutex;
pub mod queue;

pub use self::mutex::{KMutex, KMutexGuard, LockError};
pub use self::queue::{cancel, WaitChannel, WaitQueue};

/// Installs the kernel core's scheduler and yields once, so that tests and
/// a future `main` can assume a scheduler is already present.
pub fn init() {
    use nucleus_hal::task::{set_scheduler, FifoScheduler};
    static SCHEDULER: FifoScheduler = FifoScheduler::new();
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| set_scheduler(&SCHEDULER));
}
