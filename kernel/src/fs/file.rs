// SPDX-License-Identifier: MPL-2.0

//! Open file instances: the (mode, position, vnode) triple a file
//! descriptor actually points at.

use std::sync::Arc;

use nucleus_hal::sync::SpinLock;

bitflags::bitflags! {
    pub struct FileMode: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const APPEND = 1 << 2;
    }
}

use crate::fs::vnode::Vnode;

/// One open instance of a vnode.
///
/// Shared by every fd (in this or another process, after `dup`/`dup2`/
/// `fork`) that still refers to it; the backing vnode reference is released
/// when the last `Arc<File>` is dropped.
pub struct File {
    vnode: Arc<Vnode>,
    mode: FileMode,
    pos: SpinLock<u64>,
}

impl File {
    pub fn new(vnode: Arc<Vnode>, mode: FileMode) -> Arc<Self> {
        Arc::new(Self {
            vnode,
            mode,
            pos: SpinLock::new(0),
        })
    }

    pub fn vnode(&self) -> &Arc<Vnode> {
        &self.vnode
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn pos(&self) -> u64 {
        *self.pos.lock_irq_disabled()
    }

    pub fn set_pos(&self, pos: u64) {
        *self.pos.lock_irq_disabled() = pos;
    }

    pub fn advance_pos(&self, by: u64) {
        *self.pos.lock_irq_disabled() += by;
    }
}
