// SPDX-License-Identifier: MPL-2.0

//! The syscall surface: thin wrappers around the VFS, VM, and
//! process-lifecycle layers, each taking the calling process explicitly
//! rather than reaching for a global "current process."

pub mod fs;
pub mod proc;
pub mod vm;

use std::sync::Arc;

use crate::process::Process;

/// The process owning the calling thread.
///
/// # Panics
///
/// Panics if the calling thread has no owning process (e.g. a bare
/// infrastructure thread spawned with [`crate::process::thread::Thread::spawn_kernel_thread`]).
pub fn current_process() -> Arc<Process> {
    crate::process::thread::Thread::current()
        .process()
        .expect("syscall made from a thread with no owning process")
}
