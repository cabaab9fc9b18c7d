// SPDX-License-Identifier: MPL-2.0

//! Process and thread lifecycle: creation, exit, reaping, and the global
//! pid table.

pub mod process;
pub mod table;
pub mod thread;

pub use self::process::{Pid, ProcState, Process};
pub use self::table::{kill_all, lookup as lookup_process};
pub use self::thread::{Thread, ThreadState, Tid};

use std::sync::Arc;

use crate::fs::vnode::Vnode;

/// Creates the init process (pid 1) with `root` as its working directory and
/// registers it as the reparenting target for every future orphan. Must be
/// called exactly once, before any other process is created.
pub fn spawn_init(root: Arc<Vnode>) -> Arc<Process> {
    let init = Process::create("init", None, root);
    table::set_init_process(init.clone());
    init
}
