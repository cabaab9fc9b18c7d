// SPDX-License-Identifier: MPL-2.0

//! The filesystem layer: vnodes and their per-filesystem-type operations,
//! pathname resolution, open files, and per-process file-descriptor tables.

pub mod devfs;
pub mod file;
pub mod file_table;
pub mod path;
pub mod ramfs;
pub mod vnode;

use std::sync::Arc;
use std::sync::OnceLock;

use self::vnode::Vnode;

static ROOT: OnceLock<Arc<Vnode>> = OnceLock::new();

/// Builds the root filesystem (a ramfs instance with `/dev` pre-mounted)
/// and records it as the system root. Idempotent: later calls are no-ops
/// and return the root built by the first one.
pub fn init() -> Arc<Vnode> {
    ROOT.get_or_init(|| {
        let root = ramfs::new_root();
        devfs::mount(&root);
        root
    })
    .clone()
}

/// Returns the system root, initializing it first if necessary.
pub fn root() -> Arc<Vnode> {
    init()
}
