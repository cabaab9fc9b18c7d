// SPDX-License-Identifier: MPL-2.0

//! Vnodes: the in-memory handle for one filesystem object, shared by every
//! open file, every region that maps it, and every process using it as a
//! working directory.
//!
//! Unlike the source this is modeled on, a vnode's reference count is not
//! tracked by hand: `Arc<Vnode>` clones and drops *are* the reference
//! count (`Arc::strong_count`), and dropping the last clone is the
//! filesystem-level release the specification calls out as needing the
//! count at zero first. What the specification calls "resident-page count"
//! is tracked separately, on the backing [`crate::vm::mmobj::MemObject`]
//! for any vnode that has one, and the `ref >= nres` invariant is about
//! that object, not the vnode handle itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nucleus_hal::sync::SpinLock;

use crate::device::Device;
use crate::error::{Errno, Result};
use crate::vm::mmobj::MemObject;

pub const NAME_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
}

#[derive(Debug, Clone)]
pub struct Stat {
    pub ino: u64,
    pub kind: VnodeKind,
    pub mode: u16,
    pub len: u64,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
}

/// The per-filesystem-type dispatch table a vnode's `ops` field points at.
///
/// Every method has a default that returns [`Errno::ENOSYS`], modeling the
/// specification's "absence is meaningful" optional vtable entries: callers
/// (see [`crate::fs::path`]) distinguish "not implemented" from other
/// failures precisely by matching on that code.
pub trait VnodeOps: Send + Sync {
    fn lookup(&self, _name: &str) -> Result<Arc<Vnode>> {
        Err(Errno::ENOSYS.into())
    }

    fn create(&self, _name: &str) -> Result<Arc<Vnode>> {
        Err(Errno::ENOSYS.into())
    }

    fn mknod(&self, _name: &str, _kind: VnodeKind, _device: Arc<dyn Device>) -> Result<Arc<Vnode>> {
        Err(Errno::ENOSYS.into())
    }

    fn mkdir(&self, _name: &str) -> Result<Arc<Vnode>> {
        Err(Errno::ENOSYS.into())
    }

    fn rmdir(&self, _name: &str) -> Result<()> {
        Err(Errno::ENOSYS.into())
    }

    fn link(&self, _name: &str, _target: &Arc<Vnode>) -> Result<()> {
        Err(Errno::ENOSYS.into())
    }

    fn unlink(&self, _name: &str) -> Result<()> {
        Err(Errno::ENOSYS.into())
    }

    fn readdir(&self, _pos: u64) -> Result<Option<(DirEntry, u64)>> {
        Err(Errno::ENOSYS.into())
    }

    fn read(&self, _pos: u64, _buf: &mut [u8]) -> Result<usize> {
        Err(Errno::ENOSYS.into())
    }

    fn write(&self, _pos: u64, _buf: &[u8]) -> Result<usize> {
        Err(Errno::ENOSYS.into())
    }

    fn mmap(&self, _vnode: &Arc<Vnode>) -> Result<Arc<dyn MemObject>> {
        Err(Errno::ENOSYS.into())
    }

    fn stat(&self, _vnode: &Vnode) -> Result<Stat> {
        Err(Errno::ENOSYS.into())
    }

    /// Whether a directory has no entries, used by `rmdir`'s non-empty
    /// check (§7 `not-empty`). `None` for non-directory ops.
    fn is_empty_dir(&self) -> Option<bool> {
        None
    }
}

fn next_ino() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Allocates a fresh filesystem identifier, one per `ramfs::new_root()`
/// call. Vnodes compare these to enforce the "link across filesystems"
/// rule (§4.5); there is no mount table, so "different filesystem" reduces
/// to "different root ramfs instance".
pub fn next_fsid() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

pub struct Vnode {
    ino: u64,
    fsid: u64,
    kind: VnodeKind,
    mode: u16,
    len: SpinLock<u64>,
    device: Option<Arc<dyn Device>>,
    ops: Box<dyn VnodeOps>,
}

impl Vnode {
    pub fn new(fsid: u64, kind: VnodeKind, mode: u16, ops: Box<dyn VnodeOps>) -> Arc<Self> {
        Arc::new(Self {
            ino: next_ino(),
            fsid,
            kind,
            mode,
            len: SpinLock::new(0),
            device: None,
            ops,
        })
    }

    pub fn new_device(
        fsid: u64,
        kind: VnodeKind,
        mode: u16,
        device: Arc<dyn Device>,
        ops: Box<dyn VnodeOps>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ino: next_ino(),
            fsid,
            kind,
            mode,
            len: SpinLock::new(0),
            device: Some(device),
            ops,
        })
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// The filesystem this vnode belongs to; compared by [`lookup`]'s
    /// callers (`link`) to reject cross-filesystem hard links.
    pub fn fsid(&self) -> u64 {
        self.fsid
    }

    pub fn kind(&self) -> VnodeKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == VnodeKind::Directory
    }

    pub fn mode(&self) -> u16 {
        self.mode
    }

    pub fn len(&self) -> u64 {
        *self.len.lock_irq_disabled()
    }

    pub(crate) fn set_len(&self, len: u64) {
        *self.len.lock_irq_disabled() = len;
    }

    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        self.device.as_ref()
    }

    pub fn ops(&self) -> &dyn VnodeOps {
        &*self.ops
    }

    pub fn read_at(&self, pos: usize, buf: &mut [u8]) -> Result<usize> {
        self.ops.read(pos as u64, buf)
    }

    pub fn write_at(&self, pos: usize, buf: &[u8]) -> Result<usize> {
        let n = self.ops.write(pos as u64, buf)?;
        let new_len = pos as u64 + n as u64;
        if new_len > self.len() {
            self.set_len(new_len);
        }
        Ok(n)
    }

    pub fn stat(&self) -> Result<Stat> {
        self.ops.stat(self)
    }
}

/// Dispatches `dir.ops.lookup`, mapping the "no such operation" sentinel to
/// the specification's directory-dependent error split: a directory with no
/// `lookup` has no such child ([`Errno::ENOENT`]); a non-directory used as a
/// path component is simply not a directory ([`Errno::ENOTDIR`]).
pub fn lookup(dir: &Arc<Vnode>, name: &str) -> Result<Arc<Vnode>> {
    if name.len() > NAME_MAX {
        return Err(Errno::ENAMETOOLONG.into());
    }
    match dir.ops.lookup(name) {
        Err(e) if e.errno() == Errno::ENOSYS => {
            if dir.is_dir() {
                Err(Errno::ENOENT.into())
            } else {
                Err(Errno::ENOTDIR.into())
            }
        }
        other => other,
    }
}
