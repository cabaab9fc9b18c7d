// SPDX-License-Identifier: MPL-2.0

//! Processes: the owner of an address space, a file-descriptor table, a
//! current working directory, and a list of threads.
//!
//! This kernel core never runs more than one thread per process (see the
//! specification's Non-goals), but the thread list is still a list: a
//! process is not done until every thread it spawned has exited.

use std::fmt;
use std::sync::{Arc, Weak};

use nucleus_hal::sync::SpinLock;

use crate::error::{Errno, Result};
use crate::fs::file_table::FileTable;
use crate::fs::vnode::Vnode;
use crate::process::table;
use crate::process::thread::Thread;
use crate::return_errno_with_message;
use crate::sched::WaitQueue;
use crate::vm::vmar::AddressSpaceMap;

/// A process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    /// Every thread has exited; waiting for a parent to reap it.
    Zombie,
}

pub struct Process {
    pid: Pid,
    command: SpinLock<String>,
    parent: SpinLock<Weak<Process>>,
    children: SpinLock<Vec<Arc<Process>>>,
    pub(crate) threads: SpinLock<Vec<Arc<Thread>>>,
    state: SpinLock<ProcState>,
    exit_status: SpinLock<Option<i64>>,
    /// Threads blocked in `waitpid` on this process's children.
    child_exited: WaitQueue,
    pub cwd: SpinLock<Arc<Vnode>>,
    pub files: SpinLock<FileTable>,
    pub vm: SpinLock<AddressSpaceMap>,
    /// The current break, i.e. the end of the heap region `sbrk`/`brk`
    /// grow and shrink. `None` until the first call, at which point the
    /// heap region is created starting at [`crate::syscall::vm::HEAP_BASE`].
    pub brk: SpinLock<Option<usize>>,
}

impl Process {
    /// Creates a new process as a child of `parent` (or as the init process,
    /// if `parent` is `None`), with no threads yet.
    pub fn create(command: impl Into<String>, parent: Option<&Arc<Process>>, cwd: Arc<Vnode>) -> Arc<Process> {
        let pid = table::alloc_pid();
        let process = Arc::new(Process {
            pid,
            command: SpinLock::new(command.into()),
            parent: SpinLock::new(parent.map(Arc::downgrade).unwrap_or_default()),
            children: SpinLock::new(Vec::new()),
            threads: SpinLock::new(Vec::new()),
            state: SpinLock::new(ProcState::Running),
            exit_status: SpinLock::new(None),
            child_exited: WaitQueue::new(),
            cwd: SpinLock::new(cwd),
            files: SpinLock::new(FileTable::new()),
            vm: SpinLock::new(AddressSpaceMap::new()),
            brk: SpinLock::new(None),
        });
        if let Some(parent) = parent {
            parent.children.lock_irq_disabled().push(process.clone());
        }
        table::register(&process);
        process
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn command(&self) -> String {
        self.command.lock_irq_disabled().clone()
    }

    pub fn set_command(&self, command: impl Into<String>) {
        *self.command.lock_irq_disabled() = command.into();
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock_irq_disabled().upgrade()
    }

    pub fn state(&self) -> ProcState {
        *self.state.lock_irq_disabled()
    }

    pub fn exit_status(&self) -> Option<i64> {
        *self.exit_status.lock_irq_disabled()
    }

    /// A snapshot of the current child list, for tests verifying reaping
    /// completeness (every reaped child must be gone from this list).
    pub fn children_snapshot(&self) -> Vec<Arc<Process>> {
        self.children.lock_irq_disabled().clone()
    }

    /// Undoes [`Process::create`]: removes `self` from its parent's child
    /// list and from the global pid table. Used by [`crate::syscall::proc::fork`]
    /// to roll back a child created for a fork that failed before any
    /// thread of it was ever spawned — without this, the stillborn child
    /// stays visible to the parent's `waitpid` forever, as a pid that will
    /// never become a zombie.
    pub(crate) fn discard_stillborn(&self) {
        if let Some(parent) = self.parent() {
            parent.children.lock_irq_disabled().retain(|c| c.pid() != self.pid());
        }
        table::unregister(self.pid());
    }

    /// Records that `thread` has exited with `retval`. If it was this
    /// process's last live thread, the process becomes a zombie: its exit
    /// status is recorded, its children are reparented to the init process,
    /// and its parent's `waitpid` callers are woken.
    pub(crate) fn thread_exited(self: &Arc<Self>, thread: &Arc<Thread>, retval: i64) {
        let all_exited = {
            let threads = self.threads.lock_irq_disabled();
            threads
                .iter()
                .all(|t| Arc::ptr_eq(t, thread) || matches!(t.state(), crate::process::thread::ThreadState::Exited))
        };
        if !all_exited {
            return;
        }

        *self.exit_status.lock_irq_disabled() = Some(retval);
        *self.state.lock_irq_disabled() = ProcState::Zombie;

        self.release_resources();
        self.reparent_children_to_init();

        if let Some(parent) = self.parent() {
            parent.child_exited.broadcast_on();
        }
    }

    /// Releases everything a zombie no longer needs to hold: every open fd,
    /// its cwd reference, and the address space's mapped regions (and,
    /// through them, every memory object reference they held). A reaping
    /// parent only ever needs the exit status, so none of this waits for
    /// `waitpid`.
    fn release_resources(&self) {
        let closed = self.files.lock_irq_disabled().close_all();
        drop(closed);
        self.vm.lock_irq_disabled().destroy();
        // Drop the cwd reference by replacing it with the (always-live)
        // global root rather than leaving the zombie pinning whatever
        // directory it last chdir'd into.
        *self.cwd.lock_irq_disabled() = crate::fs::root();
    }

    fn reparent_children_to_init(self: &Arc<Self>) {
        let orphans = std::mem::take(&mut *self.children.lock_irq_disabled());
        if orphans.is_empty() {
            return;
        }
        let init = table::init_process();
        for child in orphans {
            *child.parent.lock_irq_disabled() = Arc::downgrade(&init);
            init.children.lock_irq_disabled().push(child);
        }
        init.child_exited.broadcast_on();
    }

    /// Cancels every thread in this process with `status`, as if each had
    /// called `exit(status)` itself. Used by [`crate::process::table::kill_all`]
    /// during shutdown; cancelling the calling thread's own process never
    /// returns (see [`crate::process::thread::cancel`]).
    pub fn kill(self: &Arc<Self>, status: i64) {
        let threads = self.threads.lock_irq_disabled().clone();
        for thread in threads {
            crate::process::thread::cancel(&thread, status);
        }
    }

    /// Blocks until a child matching `target` becomes a zombie, reaps it
    /// (removing it from the children list and the process table), and
    /// returns its pid and exit status.
    ///
    /// `target == None` matches any child; `target == Some(pid)` matches
    /// only that child. Returns `Err` if no matching child exists at all.
    pub fn waitpid(self: &Arc<Self>, target: Option<Pid>) -> Result<(Pid, i64)> {
        loop {
            {
                let mut children = self.children.lock_irq_disabled();
                if !children
                    .iter()
                    .any(|c| target.map_or(true, |pid| c.pid() == pid))
                {
                    return_errno_with_message!(Errno::ECHILD, "no matching child process");
                }
                if let Some(idx) = children.iter().position(|c| {
                    target.map_or(true, |pid| c.pid() == pid) && c.state() == ProcState::Zombie
                }) {
                    let child = children.remove(idx);
                    drop(children);
                    table::unregister(child.pid());
                    let status = child.exit_status().unwrap_or(0);
                    return Ok((child.pid(), status));
                }
            }
            self.child_exited.sleep_on();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a_process(parent: Option<&Arc<Process>>) -> Arc<Process> {
        crate::test_support::init();
        Process::create("test", parent, crate::fs::ramfs::new_root())
    }

    #[test]
    fn discard_stillborn_removes_child_from_parent_and_table() {
        let parent = a_process(None);
        let child = a_process(Some(&parent));
        let pid = child.pid();

        child.discard_stillborn();

        assert!(
            !parent.children_snapshot().iter().any(|c| c.pid() == pid),
            "a discarded child must not remain in its parent's child list"
        );
        assert!(
            table::lookup(pid).is_none(),
            "a discarded child must not remain in the global process table"
        );
    }
}
