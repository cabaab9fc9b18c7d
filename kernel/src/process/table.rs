// SPDX-License-Identifier: MPL-2.0

//! The global process table: pid allocation and pid-to-process lookup.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use nucleus_hal::sync::SpinLock;
use nucleus_hal::util::RecycleAllocator;

use crate::process::process::{Pid, Process};

lazy_static! {
    static ref PID_ALLOC: SpinLock<RecycleAllocator> =
        SpinLock::new(RecycleAllocator::with_start_max(1, usize::MAX - 1));
    static ref TABLE: SpinLock<HashMap<u64, Arc<Process>>> = SpinLock::new(HashMap::new());
    static ref INIT_PROCESS: SpinLock<Option<Arc<Process>>> = SpinLock::new(None);
}

pub(crate) fn alloc_pid() -> Pid {
    Pid(PID_ALLOC.lock_irq_disabled().alloc() as u64)
}

/// Registers `process` under its pid. The table keeps the sole strong
/// reference a process has no other owner for; a zombie still owned by a
/// parent's children list is found there first and only falls back to this
/// table for lookups by bare pid.
pub(crate) fn register(process: &Arc<Process>) {
    TABLE
        .lock_irq_disabled()
        .insert(process.pid().0, process.clone());
}

pub(crate) fn unregister(pid: Pid) {
    TABLE.lock_irq_disabled().remove(&pid.0);
    PID_ALLOC.lock_irq_disabled().dealloc(pid.0 as usize);
}

pub fn lookup(pid: Pid) -> Option<Arc<Process>> {
    TABLE.lock_irq_disabled().get(&pid.0).cloned()
}

/// Returns the init process (pid 1), to which every orphaned process is
/// reparented.
///
/// # Panics
///
/// Panics if called before [`set_init_process`].
pub(crate) fn init_process() -> Arc<Process> {
    INIT_PROCESS
        .lock_irq_disabled()
        .clone()
        .expect("init process not yet created")
}

pub fn set_init_process(process: Arc<Process>) {
    *INIT_PROCESS.lock_irq_disabled() = Some(process);
}

/// Cancels every process whose pid is neither 0, 1 nor 2 (i.e. neither idle
/// nor init) other than the caller's own, then, if the caller's own process
/// is itself not idle or init, cancels it too — which, since that includes
/// the calling thread, never returns. Used for kernel shutdown.
pub fn kill_all() {
    let current = crate::process::thread::Thread::current().process();
    let current_pid = current.as_ref().map(|p| p.pid());

    let victims: Vec<Arc<Process>> = TABLE
        .lock_irq_disabled()
        .values()
        .filter(|p| p.pid().0 > 2 && Some(p.pid()) != current_pid)
        .cloned()
        .collect();
    for victim in victims {
        victim.kill(-1);
    }

    if let Some(current) = current {
        if current.pid().0 > 2 {
            current.kill(-1);
        }
    }
}
