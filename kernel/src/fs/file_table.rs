// SPDX-License-Identifier: MPL-2.0

//! A process's table of open file descriptors.

use std::sync::Arc;

use nucleus_collections::SlotVec;

use crate::error::{Errno, Result};
use crate::fs::file::File;

pub type Fd = i32;

/// The fixed capacity of a process's fd table. An `open`/`dup`/`dup2` that
/// would need a slot at or beyond this index fails with `EMFILE` instead.
pub const MAX_FDS: usize = 256;

bitflags::bitflags! {
    pub struct FdFlags: u8 {
        const CLOEXEC = 1;
    }
}

struct Entry {
    file: Arc<File>,
    flags: FdFlags,
}

pub struct FileTable {
    table: SlotVec<Entry>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            table: SlotVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.slots_len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Installs `file` at the lowest unused fd and returns it. Fails with
    /// `EMFILE` if that slot would fall outside the table's fixed capacity.
    pub fn insert(&mut self, file: Arc<File>, flags: FdFlags) -> Result<Fd> {
        let fd = self.table.lowest_free_slot();
        if fd >= MAX_FDS {
            return Err(Errno::EMFILE.into());
        }
        let inserted = self.table.put(Entry { file, flags });
        Ok(inserted as Fd)
    }

    /// Installs `file` at exactly `fd`, closing whatever was there. Fails
    /// with `EMFILE` if `fd` falls outside the table's fixed capacity.
    pub fn insert_at(&mut self, fd: Fd, file: Arc<File>, flags: FdFlags) -> Result<()> {
        if fd < 0 || fd as usize >= MAX_FDS {
            return Err(Errno::EMFILE.into());
        }
        self.table.put_at(fd as usize, Entry { file, flags });
        Ok(())
    }

    pub fn get(&self, fd: Fd) -> Result<Arc<File>> {
        if fd < 0 {
            return Err(Errno::EBADF.into());
        }
        self.table
            .get(fd as usize)
            .map(|entry| entry.file.clone())
            .ok_or_else(|| Errno::EBADF.into())
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        if fd < 0 {
            return Err(Errno::EBADF.into());
        }
        self.table
            .remove(fd as usize)
            .map(|_| ())
            .ok_or_else(|| Errno::EBADF.into())
    }

    /// Duplicates `fd` onto the lowest free descriptor that is `>= min_fd`.
    pub fn dup(&mut self, fd: Fd, min_fd: Fd) -> Result<Fd> {
        let file = self.get(fd)?;
        let min_fd = min_fd.max(0) as usize;
        // `slots_len()` may be below `min_fd` (a `dup` with a `min_fd` past
        // every fd ever opened); search up to whichever is larger so the
        // range is never empty — the top of it is always free.
        let search_end = self.table.slots_len().max(min_fd);
        let target = (min_fd..=search_end)
            .find(|idx| self.table.get(*idx).is_none())
            .expect("search_end is always vacant");
        if target >= MAX_FDS {
            return Err(Errno::EMFILE.into());
        }
        self.table.put_at(target, Entry {
            file,
            flags: FdFlags::empty(),
        });
        Ok(target as Fd)
    }

    /// Duplicates `fd` onto exactly `new_fd`, closing `new_fd` first if it
    /// was open and different from `fd`. `dup2(fd, fd)` is a validated
    /// no-op.
    pub fn dup2(&mut self, fd: Fd, new_fd: Fd) -> Result<Fd> {
        let file = self.get(fd)?;
        if fd == new_fd {
            return Ok(fd);
        }
        if new_fd < 0 || new_fd as usize >= MAX_FDS {
            return Err(Errno::EMFILE.into());
        }
        self.table.put_at(new_fd as usize, Entry {
            file,
            flags: FdFlags::empty(),
        });
        Ok(new_fd)
    }

    pub fn close_all(&mut self) -> Vec<Arc<File>> {
        self.table
            .idxes_and_items()
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|idx| self.table.remove(idx).map(|e| e.file))
            .collect()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for FileTable {
    /// Duplicates every entry, exactly as `fork`'s fd-table copy step
    /// requires: each resulting `Arc<File>` is a second reference to the
    /// same open file, not an independent copy.
    fn clone(&self) -> Self {
        let mut table = SlotVec::new();
        for (idx, entry) in self.table.idxes_and_items() {
            table.put_at(
                idx,
                Entry {
                    file: entry.file.clone(),
                    flags: entry.flags,
                },
            );
        }
        Self { table }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::file::FileMode;

    fn a_file() -> Arc<File> {
        File::new(crate::fs::ramfs::new_root(), FileMode::READ)
    }

    #[test]
    fn dup_with_min_fd_past_every_open_fd_does_not_panic() {
        let mut table = FileTable::new();
        let fd = table.insert(a_file(), FdFlags::empty()).unwrap();
        let dup_fd = table.dup(fd, 10).unwrap();
        assert_eq!(dup_fd, 10);
    }

    #[test]
    fn dup_with_min_fd_past_capacity_is_emfile() {
        let mut table = FileTable::new();
        let fd = table.insert(a_file(), FdFlags::empty()).unwrap();
        let err = table.dup(fd, MAX_FDS as Fd).unwrap_err();
        assert_eq!(err.errno(), Errno::EMFILE);
    }
}
