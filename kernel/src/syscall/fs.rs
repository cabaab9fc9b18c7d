// SPDX-License-Identifier: MPL-2.0

//! The VFS-facing syscalls: thin wrappers around [`crate::fs::path`]
//! resolution and the vnode operations vtable, each taking the calling
//! process explicitly.
//!
//! Every entry point here resolves against the calling process's cwd (never
//! a global "current directory"), and every fd it touches goes through
//! [`crate::fs::file_table::FileTable`], which is where `EMFILE`/`EBADF`
//! actually get enforced.

use std::sync::Arc;

use crate::device::Device;
use crate::error::{Errno, Result};
use crate::fs::file::{File, FileMode};
use crate::fs::file_table::{Fd, FdFlags};
use crate::fs::path::{self, OpenFlags};
use crate::fs::vnode::{DirEntry, Stat, VnodeKind};
use crate::process::Process;

/// The reference point [`lseek`] computes a new position from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Opens `path`, creating it first if `open_flags` requests it and it is
/// not already present. `mode` must name exactly one of
/// {`READ`, `WRITE`, `READ | WRITE`}, optionally with `APPEND`.
pub fn open(process: &Arc<Process>, path: &str, mode: FileMode, open_flags: OpenFlags) -> Result<Fd> {
    let access = mode & (FileMode::READ | FileMode::WRITE);
    if access.is_empty() {
        return Err(Errno::EINVAL.into());
    }
    let base = process.cwd.lock_irq_disabled().clone();
    let root = crate::fs::root();
    let vnode = path::open_namev(path, open_flags, &base, &root)?;
    if vnode.is_dir() && mode.contains(FileMode::WRITE) {
        return Err(Errno::EISDIR.into());
    }
    let file = File::new(vnode, mode);
    if mode.contains(FileMode::APPEND) {
        file.set_pos(file.vnode().len());
    }
    process.files.lock_irq_disabled().insert(file, FdFlags::empty())
}

pub fn close(process: &Arc<Process>, fd: Fd) -> Result<()> {
    process.files.lock_irq_disabled().close(fd)
}

pub fn read(process: &Arc<Process>, fd: Fd, buf: &mut [u8]) -> Result<usize> {
    let file = process.files.lock_irq_disabled().get(fd)?;
    if !file.mode().contains(FileMode::READ) {
        return Err(Errno::EBADF.into());
    }
    if file.vnode().is_dir() {
        return Err(Errno::EISDIR.into());
    }
    let pos = file.pos();
    let n = file.vnode().read_at(pos as usize, buf)?;
    file.advance_pos(n as u64);
    Ok(n)
}

pub fn write(process: &Arc<Process>, fd: Fd, buf: &[u8]) -> Result<usize> {
    let file = process.files.lock_irq_disabled().get(fd)?;
    if !file.mode().contains(FileMode::WRITE) {
        return Err(Errno::EBADF.into());
    }
    if file.vnode().is_dir() {
        return Err(Errno::EISDIR.into());
    }
    if file.mode().contains(FileMode::APPEND) {
        file.set_pos(file.vnode().len());
    }
    let pos = file.pos();
    let n = file.vnode().write_at(pos as usize, buf)?;
    file.advance_pos(n as u64);
    Ok(n)
}

pub fn lseek(process: &Arc<Process>, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
    let file = process.files.lock_irq_disabled().get(fd)?;
    let base = match whence {
        Whence::Set => 0i64,
        Whence::Cur => file.pos() as i64,
        Whence::End => file.vnode().len() as i64,
    };
    let new_pos = base.checked_add(offset).ok_or(Errno::EINVAL)?;
    if new_pos < 0 {
        return Err(Errno::EINVAL.into());
    }
    file.set_pos(new_pos as u64);
    Ok(new_pos as u64)
}

pub fn stat(process: &Arc<Process>, path: &str) -> Result<Stat> {
    let base = process.cwd.lock_irq_disabled().clone();
    let root = crate::fs::root();
    let vnode = path::lookup_path(path, &base, &root)?;
    vnode.stat()
}

/// Reads the next directory entry from `fd`'s current position, advancing
/// it by the byte count the filesystem reports. Returns `None` at end of
/// directory.
pub fn getdent(process: &Arc<Process>, fd: Fd) -> Result<Option<DirEntry>> {
    let file = process.files.lock_irq_disabled().get(fd)?;
    if !file.vnode().is_dir() {
        return Err(Errno::ENOTDIR.into());
    }
    let pos = file.pos();
    match file.vnode().ops().readdir(pos)? {
        Some((entry, next)) => {
            file.set_pos(next);
            Ok(Some(entry))
        }
        None => Ok(None),
    }
}

pub fn dup(process: &Arc<Process>, fd: Fd) -> Result<Fd> {
    process.files.lock_irq_disabled().dup(fd, 0)
}

pub fn dup2(process: &Arc<Process>, fd: Fd, new_fd: Fd) -> Result<Fd> {
    process.files.lock_irq_disabled().dup2(fd, new_fd)
}

pub fn mkdir(process: &Arc<Process>, path: &str) -> Result<()> {
    let at = resolve_parent(process, path)?;
    at.0.ops().mkdir(&at.1)?;
    Ok(())
}

pub fn rmdir(process: &Arc<Process>, path: &str) -> Result<()> {
    let at = resolve_parent(process, path)?;
    at.0.ops().rmdir(&at.1)
}

pub fn unlink(process: &Arc<Process>, path: &str) -> Result<()> {
    let at = resolve_parent(process, path)?;
    at.0.ops().unlink(&at.1)
}

/// Links the vnode at `old_path` under `new_path`'s parent directory.
/// Fails with `EPERM` if `old_path` names a directory, and `EXDEV` if the
/// two paths resolve onto different filesystems — both enforced by
/// [`crate::fs::vnode::VnodeOps::link`] itself.
pub fn link(process: &Arc<Process>, old_path: &str, new_path: &str) -> Result<()> {
    let base = process.cwd.lock_irq_disabled().clone();
    let root = crate::fs::root();
    let target = path::lookup_path(old_path, &base, &root)?;
    let at = path::dir_namev(new_path, &base, &root)?;
    at.parent.ops().link(&at.name, &target)
}

/// `rename` as specified: a non-atomic link followed by unlink of the
/// original name.
pub fn rename(process: &Arc<Process>, old_path: &str, new_path: &str) -> Result<()> {
    link(process, old_path, new_path)?;
    unlink(process, old_path)
}

pub fn mknod(process: &Arc<Process>, path: &str, kind: VnodeKind, device: Arc<dyn Device>) -> Result<()> {
    if !matches!(kind, VnodeKind::CharDevice | VnodeKind::BlockDevice) {
        return Err(Errno::EINVAL.into());
    }
    let at = resolve_parent(process, path)?;
    at.0.ops().mknod(&at.1, kind, device)?;
    Ok(())
}

pub fn chdir(process: &Arc<Process>, path: &str) -> Result<()> {
    let base = process.cwd.lock_irq_disabled().clone();
    let root = crate::fs::root();
    let vnode = path::lookup_path(path, &base, &root)?;
    if !vnode.is_dir() {
        return Err(Errno::ENOTDIR.into());
    }
    *process.cwd.lock_irq_disabled() = vnode;
    Ok(())
}

fn resolve_parent(process: &Arc<Process>, path: &str) -> Result<(Arc<crate::fs::vnode::Vnode>, String)> {
    let base = process.cwd.lock_irq_disabled().clone();
    let root = crate::fs::root();
    let at = path::dir_namev(path, &base, &root)?;
    Ok((at.parent, at.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Process;

    fn boot_process() -> Arc<Process> {
        crate::test_support::init();
        let root = crate::fs::root();
        Process::create("test", None, root)
    }

    #[test]
    fn open_create_write_read_round_trips() {
        let process = boot_process();
        let fd = open(&process, "/greeting", FileMode::WRITE, OpenFlags::CREAT).unwrap();
        write(&process, fd, b"hello").unwrap();
        close(&process, fd).unwrap();

        let fd = open(&process, "/greeting", FileMode::READ, OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 5];
        let n = read(&process, fd, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_mode_open_on_directory_is_eisdir() {
        let process = boot_process();
        mkdir(&process, "/d").unwrap();
        let err = open(&process, "/d", FileMode::WRITE, OpenFlags::empty()).unwrap_err();
        assert_eq!(err.errno(), Errno::EISDIR);
    }

    #[test]
    fn wrong_direction_fd_access_is_ebadf() {
        let process = boot_process();
        let fd = open(&process, "/f", FileMode::WRITE, OpenFlags::CREAT).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(read(&process, fd, &mut buf).unwrap_err().errno(), Errno::EBADF);
        close(&process, fd).unwrap();

        let fd = open(&process, "/f", FileMode::READ, OpenFlags::empty()).unwrap();
        assert_eq!(write(&process, fd, b"x").unwrap_err().errno(), Errno::EBADF);
    }

    #[test]
    fn dup2_onto_self_is_a_validated_no_op() {
        let process = boot_process();
        let fd = open(&process, "/f", FileMode::READ, OpenFlags::CREAT).unwrap();
        assert_eq!(dup2(&process, fd, fd).unwrap(), fd);
    }

    #[test]
    fn mkdir_then_rmdir_then_lookup_fails() {
        let process = boot_process();
        mkdir(&process, "/sub").unwrap();
        rmdir(&process, "/sub").unwrap();
        let err = stat(&process, "/sub").unwrap_err();
        assert_eq!(err.errno(), Errno::ENOENT);
    }

    #[test]
    fn chdir_then_relative_open_resolves_against_new_cwd() {
        let process = boot_process();
        mkdir(&process, "/sub").unwrap();
        chdir(&process, "/sub").unwrap();
        let fd = open(&process, "leaf", FileMode::WRITE, OpenFlags::CREAT).unwrap();
        close(&process, fd).unwrap();
        assert!(stat(&process, "/sub/leaf").is_ok());
    }
}
