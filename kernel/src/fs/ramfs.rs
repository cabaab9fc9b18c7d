// SPDX-License-Identifier: MPL-2.0

//! A minimal in-memory filesystem, used as the root and as the backing
//! store for ordinary files and directories created during a run. There is
//! no on-disk format to persist to (`s5fs` is out of scope); this exists so
//! the VFS has *a* real filesystem to resolve paths against.

use std::collections::BTreeMap;
use std::sync::Arc;

use nucleus_hal::sync::SpinLock;

use crate::error::{Errno, Result};
use crate::fs::vnode::{DirEntry, Stat, Vnode, VnodeKind, VnodeOps};

struct DirNode {
    fsid: u64,
    entries: SpinLock<BTreeMap<String, Arc<Vnode>>>,
}

impl VnodeOps for DirNode {
    fn lookup(&self, name: &str) -> Result<Arc<Vnode>> {
        self.entries
            .lock_irq_disabled()
            .get(name)
            .cloned()
            .ok_or_else(|| Errno::ENOENT.into())
    }

    fn create(&self, name: &str) -> Result<Arc<Vnode>> {
        let mut entries = self.entries.lock_irq_disabled();
        if entries.contains_key(name) {
            return Err(Errno::EEXIST.into());
        }
        let child = Vnode::new(self.fsid, VnodeKind::Regular, 0o644, Box::new(FileNode::new()));
        entries.insert(name.to_string(), child.clone());
        Ok(child)
    }

    fn mknod(
        &self,
        name: &str,
        kind: VnodeKind,
        device: Arc<dyn crate::device::Device>,
    ) -> Result<Arc<Vnode>> {
        if !matches!(kind, VnodeKind::CharDevice | VnodeKind::BlockDevice) {
            return Err(Errno::EINVAL.into());
        }
        let mut entries = self.entries.lock_irq_disabled();
        if entries.contains_key(name) {
            return Err(Errno::EEXIST.into());
        }
        let child = Vnode::new_device(self.fsid, kind, 0o644, device.clone(), Box::new(DeviceNode { device }));
        entries.insert(name.to_string(), child.clone());
        Ok(child)
    }

    fn mkdir(&self, name: &str) -> Result<Arc<Vnode>> {
        let mut entries = self.entries.lock_irq_disabled();
        if entries.contains_key(name) {
            return Err(Errno::EEXIST.into());
        }
        let child = DirNode::new_vnode(self.fsid);
        entries.insert(name.to_string(), child.clone());
        Ok(child)
    }

    fn rmdir(&self, name: &str) -> Result<()> {
        if name == "." {
            return Err(Errno::EINVAL.into());
        }
        if name == ".." {
            return Err(Errno::ENOTEMPTY.into());
        }
        let mut entries = self.entries.lock_irq_disabled();
        let target = entries.get(name).ok_or(Errno::ENOENT)?;
        if !target.is_dir() {
            return Err(Errno::ENOTDIR.into());
        }
        if target.ops().is_empty_dir() == Some(false) {
            return Err(Errno::ENOTEMPTY.into());
        }
        entries.remove(name);
        Ok(())
    }

    fn link(&self, name: &str, target: &Arc<Vnode>) -> Result<()> {
        if target.is_dir() {
            return Err(Errno::EPERM.into());
        }
        if target.fsid() != self.fsid {
            return Err(Errno::EXDEV.into());
        }
        let mut entries = self.entries.lock_irq_disabled();
        if entries.contains_key(name) {
            return Err(Errno::EEXIST.into());
        }
        entries.insert(name.to_string(), target.clone());
        Ok(())
    }

    fn unlink(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.lock_irq_disabled();
        let target = entries.get(name).ok_or(Errno::ENOENT)?;
        if target.is_dir() {
            return Err(Errno::EISDIR.into());
        }
        entries.remove(name);
        Ok(())
    }

    fn readdir(&self, pos: u64) -> Result<Option<(DirEntry, u64)>> {
        let entries = self.entries.lock_irq_disabled();
        let entry = entries.iter().nth(pos as usize);
        Ok(entry.map(|(name, vnode)| {
            (
                DirEntry {
                    name: name.clone(),
                    ino: vnode.ino(),
                },
                pos + 1,
            )
        }))
    }

    fn stat(&self, vnode: &Vnode) -> Result<Stat> {
        Ok(Stat {
            ino: vnode.ino(),
            kind: vnode.kind(),
            mode: vnode.mode(),
            len: vnode.len(),
        })
    }

    fn is_empty_dir(&self) -> Option<bool> {
        Some(self.entries.lock_irq_disabled().is_empty())
    }
}

impl DirNode {
    fn new_vnode(fsid: u64) -> Arc<Vnode> {
        Vnode::new(
            fsid,
            VnodeKind::Directory,
            0o755,
            Box::new(DirNode {
                fsid,
                entries: SpinLock::new(BTreeMap::new()),
            }),
        )
    }
}

struct FileNode {
    data: SpinLock<Vec<u8>>,
}

impl FileNode {
    fn new() -> Self {
        Self {
            data: SpinLock::new(Vec::new()),
        }
    }
}

impl VnodeOps for FileNode {
    fn read(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.lock_irq_disabled();
        let pos = pos as usize;
        if pos >= data.len() {
            return Ok(0);
        }
        let n = (data.len() - pos).min(buf.len());
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        Ok(n)
    }

    fn write(&self, pos: u64, buf: &[u8]) -> Result<usize> {
        let mut data = self.data.lock_irq_disabled();
        let pos = pos as usize;
        if data.len() < pos {
            data.resize(pos, 0);
        }
        let end = pos + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn mmap(&self, vnode: &Arc<Vnode>) -> Result<Arc<dyn crate::vm::mmobj::MemObject>> {
        Ok(crate::vm::mmobj::FileBacked::new(vnode.clone()))
    }

    fn stat(&self, vnode: &Vnode) -> Result<Stat> {
        Ok(Stat {
            ino: vnode.ino(),
            kind: vnode.kind(),
            mode: vnode.mode(),
            len: vnode.len(),
        })
    }
}

/// A device-special vnode's ops: read/write/mmap delegate straight to the
/// device record; directory and link operations stay unimplemented
/// (inherited `ENOSYS` defaults), exactly as the specification requires.
struct DeviceNode {
    device: Arc<dyn crate::device::Device>,
}

impl VnodeOps for DeviceNode {
    fn read(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        self.device.read(pos as usize, buf)
    }

    fn write(&self, pos: u64, buf: &[u8]) -> Result<usize> {
        self.device.write(pos as usize, buf)
    }

    fn mmap(&self, _vnode: &Arc<Vnode>) -> Result<Arc<dyn crate::vm::mmobj::MemObject>> {
        Ok(crate::vm::mmobj::DeviceBacked::new(self.device.clone()))
    }

    fn stat(&self, vnode: &Vnode) -> Result<Stat> {
        Ok(Stat {
            ino: vnode.ino(),
            kind: vnode.kind(),
            mode: vnode.mode(),
            len: vnode.len(),
        })
    }
}

/// Creates a fresh ramfs root directory, tagged with a fresh filesystem id
/// so two calls to this function produce vnodes that `link` treats as
/// residing on different filesystems (§4.5 cross-device rejection).
pub fn new_root() -> Arc<Vnode> {
    DirNode::new_vnode(crate::fs::vnode::next_fsid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_within_one_filesystem_succeeds() {
        let root = new_root();
        let file = root.ops().create("a").unwrap();
        root.ops().link("b", &file).unwrap();
        assert!(Arc::ptr_eq(&root.ops().lookup("b").unwrap(), &file));
    }

    #[test]
    fn link_across_filesystems_is_rejected() {
        let root_a = new_root();
        let root_b = new_root();
        let file = root_a.ops().create("a").unwrap();
        let err = root_b.ops().link("b", &file).unwrap_err();
        assert_eq!(err.errno(), Errno::EXDEV);
    }

    #[test]
    fn link_of_a_directory_is_not_permitted() {
        let root = new_root();
        let dir = root.ops().mkdir("d").unwrap();
        let err = root.ops().link("d2", &dir).unwrap_err();
        assert_eq!(err.errno(), Errno::EPERM);
    }
}
