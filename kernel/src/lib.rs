// SPDX-License-Identifier: MPL-2.0

//! The kernel core: process/thread lifecycle, a layered virtual filesystem,
//! and a demand-paged virtual-memory subsystem with copy-on-write fork,
//! built atop the cooperative scheduler and simulated hardware interfaces
//! in [`nucleus_hal`].
//!
//! This crate models the three coupled subsystems that contain essentially
//! all of the hard engineering in a teaching-style monolithic kernel:
//! [`vm`] (the memory-object graph and page-fault handler), [`fs`] (vnode
//! reference discipline, pathname resolution, and the file-descriptor
//! layer), and [`process`]/[`sched`] (process creation, fork, reaping, and
//! the non-preemptive run queue with cancellable sleep). [`syscall`] is the
//! thin dispatch layer that sits on top of all three.
//!
//! Out of scope, per the specification this crate implements: the physical
//! page allocator, the page-table/TLB layer, block/tty device drivers, the
//! on-disk filesystem format, the ELF loader, and boot glue — all of which
//! [`nucleus_hal`] stands in for with a host-backed simulation.
#![feature(negative_impls)]

pub mod device;
pub mod error;
pub mod fs;
pub mod prelude;
pub mod process;
pub mod sched;
pub mod syscall;
pub mod vm;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::error::{Errno, Error, Result};

/// Brings up the kernel core: installs the scheduler, builds the root
/// filesystem (with `/dev` pre-mounted), and spawns the init process.
///
/// Must be called exactly once, before any syscall dispatch.
pub fn boot() -> std::sync::Arc<process::Process> {
    sched::init();
    let root = fs::init();
    process::spawn_init(root)
}
