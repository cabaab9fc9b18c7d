// SPDX-License-Identifier: MPL-2.0

//! Low-level synchronization primitives.
//!
//! These are the building blocks the kernel core uses to implement its own
//! blocking [`crate::sync::WaitQueue`]-aware `Mutex` and the non-preemptive
//! scheduler invariants it relies on. [`SpinLock`] guards short, non-blocking
//! critical sections; [`Mutex`] and [`WaitQueue`] put the calling task to
//! sleep rather than spin.

mod mutex;
mod spin;
mod wait;

pub use self::{
    mutex::{Mutex, MutexGuard},
    spin::{SpinLock, SpinLockGuard},
    wait::{WaitQueue, Waiter, Waker},
};
