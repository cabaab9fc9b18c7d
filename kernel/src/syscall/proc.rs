// SPDX-License-Identifier: MPL-2.0

//! `fork`/`waitpid`/`exit`/`execve`: the process-lifecycle syscalls.
//!
//! This kernel core has no ELF loader or user-mode trampoline (both out of
//! scope; see the crate overview), so there is no trap frame for a forked
//! child to resume through the way a real kernel's `fork` does. Instead
//! [`fork`] takes the child's post-fork continuation directly as a closure:
//! everything else — duplicating the fd table, cloning the address space
//! with COW shadows interposed, copying the heap bounds, spawning the child
//! thread, and returning the child's pid to the caller — matches the
//! specification's fork steps exactly.

use std::sync::Arc;

use crate::error::{Errno, Result};
use crate::process::process::{Pid, Process};
use crate::process::thread::{self, Thread};
use crate::vm::fork::fork_address_space;

/// Forks `process`. `child_body` runs as the child's (sole) thread; the
/// caller sees the child's pid back from this call, matching "the parent
/// sees the child's PID" from the specification (the child side of that
/// same sentence, "the child sees 0", is simply `child_body`'s own return
/// value convention, same as any other thread entry point).
pub fn fork<F>(process: &Arc<Process>, child_body: F) -> Result<Pid>
where
    F: FnOnce() -> i64 + Send + 'static,
{
    let cwd = process.cwd.lock_irq_disabled().clone();
    let child = Process::create(process.command(), Some(process), cwd);

    let child_vm = match fork_address_space(&process.vm.lock_irq_disabled()) {
        Ok(vm) => vm,
        Err(e) => {
            child.discard_stillborn();
            return Err(e);
        }
    };
    *child.vm.lock_irq_disabled() = child_vm;

    *child.files.lock_irq_disabled() = process.files.lock_irq_disabled().clone();
    *child.brk.lock_irq_disabled() = *process.brk.lock_irq_disabled();

    Thread::create(&child, child_body);
    Ok(child.pid())
}

/// `waitpid(-1, ...)` matches any child; `waitpid(pid, ...)` (`pid > 0`)
/// matches only that one; any other value is invalid.
pub fn waitpid(process: &Arc<Process>, pid: i64) -> Result<(Pid, i64)> {
    let target = match pid {
        -1 => None,
        p if p > 0 => Some(Pid(p as u64)),
        _ => return Err(Errno::EINVAL.into()),
    };
    process.waitpid(target)
}

/// Exits the calling thread with `status`, never returning.
pub fn exit(status: i64) -> ! {
    thread::exit_current(status)
}

/// `execve` replaces a process image via the ELF loader, which this kernel
/// core does not implement (see the crate overview's out-of-scope list).
pub fn execve(_path: &str, _argv: &[String], _envp: &[String]) -> Result<()> {
    Err(Errno::ENOSYS.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_process() -> Arc<Process> {
        crate::test_support::init();
        let root = crate::fs::root();
        Process::create("test", None, root)
    }

    #[test]
    fn fork_child_runs_and_parent_reaps_its_status() {
        let parent = boot_process();
        let child_pid = fork(&parent, || 7).unwrap();

        let (reaped_pid, status) = waitpid(&parent, child_pid.0 as i64).unwrap();
        assert_eq!(reaped_pid, child_pid);
        assert_eq!(status, 7);
    }

    #[test]
    fn waitpid_on_a_pid_that_is_not_a_child_is_echild() {
        let parent = boot_process();
        let err = waitpid(&parent, 999_999).unwrap_err();
        assert_eq!(err.errno(), Errno::ECHILD);
    }

    #[test]
    fn waitpid_rejects_zero_and_negative_non_any_pids() {
        let parent = boot_process();
        let err = waitpid(&parent, 0).unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
        let err = waitpid(&parent, -2).unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn reaping_completeness_after_waiting_all_children() {
        let parent = boot_process();
        let child_pids: Vec<_> = (0..3).map(|i| fork(&parent, move || i).unwrap()).collect();

        for pid in &child_pids {
            waitpid(&parent, pid.0 as i64).unwrap();
        }

        assert!(
            parent.children_snapshot().is_empty(),
            "every reaped child must be removed from the parent's child list"
        );
        for pid in child_pids {
            assert!(
                crate::process::lookup_process(pid).is_none(),
                "a reaped child must not remain in the global process table"
            );
        }
    }

    #[test]
    fn fork_child_has_its_own_address_space_copy() {
        let parent = boot_process();
        parent
            .vm
            .lock_irq_disabled()
            .insert(
                0x1000,
                0x2000,
                nucleus_hal::mm::VmPerms::READ | nucleus_hal::mm::VmPerms::WRITE,
                crate::vm::vmar::MapFlags::PRIVATE | crate::vm::vmar::MapFlags::ANON,
                crate::vm::mmobj::Anonymous::new(),
                0,
            )
            .unwrap();
        parent.vm.lock_irq_disabled().write(0x1000, &[5]).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let child_pid = fork(&parent, move || {
            tx.send(()).unwrap();
            0
        })
        .unwrap();
        rx.recv().unwrap();
        waitpid(&parent, child_pid.0 as i64).unwrap();

        let child_vm_has_region = parent.vm.lock_irq_disabled().find_range(0x1000).is_some();
        assert!(child_vm_has_region, "parent's own region must survive its own fork");
    }
}
