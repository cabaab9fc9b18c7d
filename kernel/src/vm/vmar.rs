// SPDX-License-Identifier: MPL-2.0

//! A process's address-space map: the ordered, non-overlapping set of
//! mapped regions ("vmareas"), plus the simulated page table backing them.

use std::collections::BTreeMap;
use std::sync::Arc;

use nucleus_hal::mm::{Vaddr, VmPerms, VmSpace, PAGE_SIZE};

use crate::error::{Errno, Result};
use crate::vm::mmobj::{put_dyn, MemObject};
use crate::vm::pframe::PageIndex;

/// The lowest virtual address [`AddressSpaceMap::find_range`] will ever
/// return a mapping in. Page zero is kept permanently unmapped so a null
/// pointer dereference always faults.
pub const USER_LOW: Vaddr = PAGE_SIZE;

/// One past the highest virtual address this address space extends to.
pub const USER_HIGH: Vaddr = 0x0000_8000_0000_0000;

/// The direction [`AddressSpaceMap::find_range`] searches in: ascending from
/// [`USER_LOW`] (used for `mmap`'s default placement) or descending from
/// [`USER_HIGH`] (used to place regions, such as a new thread's stack, that
/// should stay out of the heap's way).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindDirection {
    LoHi,
    HiLo,
}

bitflags::bitflags! {
    /// A region's sharing and placement flags, mirroring the specification's
    /// `{shared, private}` (exactly one must be set) plus `{fixed, anon}`
    /// bits.
    pub struct MapFlags: u8 {
        const SHARED = 1 << 0;
        const PRIVATE = 1 << 1;
        const FIXED = 1 << 2;
        const ANON = 1 << 3;
    }
}

/// One mapped region: `[start, end)` of virtual address space, backed by
/// `object` starting at `obj_offset` pages into it.
#[derive(Clone)]
pub struct VmArea {
    pub start: Vaddr,
    pub end: Vaddr,
    pub perms: VmPerms,
    pub flags: MapFlags,
    pub object: Arc<dyn MemObject>,
    pub obj_offset: PageIndex,
}

impl VmArea {
    pub fn contains(&self, addr: Vaddr) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn page_index_for(&self, addr: Vaddr) -> PageIndex {
        self.obj_offset + (addr - self.start) / PAGE_SIZE
    }

    pub fn npages(&self) -> usize {
        (self.end - self.start) / PAGE_SIZE
    }

    /// Whether this region is a `MAP_PRIVATE` mapping: writes are never
    /// visible to any other mapping of the same underlying object, and
    /// `fork` must interpose a shadow over it rather than simply sharing a
    /// reference.
    pub fn is_private(&self) -> bool {
        self.flags.contains(MapFlags::PRIVATE)
    }
}

/// The regions mapped into one address space, plus the page table that
/// realizes them. Regions never overlap; [`insert`](Self::insert) enforces
/// it.
pub struct AddressSpaceMap {
    areas: std::sync::Mutex<BTreeMap<Vaddr, VmArea>>,
    space: VmSpace,
}

impl AddressSpaceMap {
    pub fn new() -> Self {
        Self {
            areas: std::sync::Mutex::new(BTreeMap::new()),
            space: VmSpace::new(),
        }
    }

    pub fn space(&self) -> &VmSpace {
        &self.space
    }

    /// Returns the area containing `addr`, if any.
    pub fn find_range(&self, addr: Vaddr) -> Option<VmArea> {
        let areas = self.areas.lock().unwrap();
        areas
            .range(..=addr)
            .next_back()
            .map(|(_, area)| area.clone())
            .filter(|area| area.contains(addr))
    }

    /// Returns whether every address in `[start, end)` is currently unmapped.
    pub fn is_range_empty(&self, start: Vaddr, end: Vaddr) -> bool {
        let areas = self.areas.lock().unwrap();
        !areas.values().any(|area| area.start < end && start < area.end)
    }

    /// First-fit search for `n` free contiguous pages, within
    /// `[`[`USER_LOW`]`, `[`USER_HIGH`]`)`. `LoHi` returns the lowest such
    /// range; `HiLo` the highest.
    pub fn find_free_range(&self, n: usize, dir: FindDirection) -> Option<Vaddr> {
        let want = n * PAGE_SIZE;
        if want == 0 {
            return None;
        }
        let areas = self.areas.lock().unwrap();
        let mut bounds: Vec<(Vaddr, Vaddr)> = areas.values().map(|a| (a.start, a.end)).collect();
        bounds.sort_by_key(|&(start, _)| start);

        match dir {
            FindDirection::LoHi => {
                let mut cursor = USER_LOW;
                for (start, end) in &bounds {
                    if *start >= cursor && start - cursor >= want {
                        return Some(cursor);
                    }
                    cursor = cursor.max(*end);
                }
                if USER_HIGH - cursor >= want {
                    Some(cursor)
                } else {
                    None
                }
            }
            FindDirection::HiLo => {
                let mut cursor = USER_HIGH;
                for (start, end) in bounds.iter().rev() {
                    if *end <= cursor && cursor - end >= want {
                        return Some(cursor - want);
                    }
                    cursor = cursor.min(*start);
                }
                if cursor - USER_LOW >= want {
                    Some(cursor - want)
                } else {
                    None
                }
            }
        }
    }

    /// Inserts a new, non-overlapping region.
    pub fn insert(
        &self,
        start: Vaddr,
        end: Vaddr,
        perms: VmPerms,
        flags: MapFlags,
        object: Arc<dyn MemObject>,
        obj_offset: PageIndex,
    ) -> Result<()> {
        if start % PAGE_SIZE != 0 || end % PAGE_SIZE != 0 || start >= end {
            return Err(Errno::EINVAL.into());
        }
        if !self.is_range_empty(start, end) {
            return Err(Errno::EINVAL.into());
        }
        self.areas.lock().unwrap().insert(
            start,
            VmArea {
                start,
                end,
                perms,
                flags,
                object,
                obj_offset,
            },
        );
        Ok(())
    }

    /// Removes every area overlapping `[start, end)`, unmapping the page
    /// table entries underneath and releasing each removed area's reference
    /// to its backing object. Partial overlaps are split, keeping whichever
    /// end of the area falls outside `[start, end)`.
    pub fn remove(&self, start: Vaddr, end: Vaddr) -> Result<()> {
        if start % PAGE_SIZE != 0 || end % PAGE_SIZE != 0 || start >= end {
            return Err(Errno::EINVAL.into());
        }
        let mut areas = self.areas.lock().unwrap();
        let overlapping: Vec<Vaddr> = areas
            .values()
            .filter(|area| area.start < end && start < area.end)
            .map(|area| area.start)
            .collect();

        for key in overlapping {
            let area = areas.remove(&key).unwrap();
            if area.start < start {
                let mut head = area.clone();
                head.end = start;
                area.object.add_ref();
                areas.insert(head.start, head);
            }
            if area.end > end {
                let mut tail = area.clone();
                tail.start = end;
                tail.obj_offset += (end - area.start) / PAGE_SIZE;
                area.object.add_ref();
                areas.insert(tail.start, tail);
            }
            put_dyn(&area.object);
        }
        drop(areas);
        self.space.unmap_range(start, end);
        Ok(())
    }

    /// Grows or shrinks the area starting at `start` in place, to end at
    /// `new_end`. Used by `brk`/`sbrk` to resize the heap region without
    /// disturbing its backing object's reference count, since it stays the
    /// same area throughout: shrinking only unmaps the released page-table
    /// range, it does not reclaim those pages from the object's own cache.
    pub(crate) fn resize(&self, start: Vaddr, new_end: Vaddr) -> Result<()> {
        if new_end % PAGE_SIZE != 0 {
            return Err(Errno::EINVAL.into());
        }
        let mut areas = self.areas.lock().unwrap();
        let area = areas.get_mut(&start).ok_or(Errno::EINVAL)?;
        if new_end <= area.start {
            return Err(Errno::EINVAL.into());
        }
        let old_end = area.end;
        area.end = new_end;
        drop(areas);
        if new_end < old_end {
            self.space.unmap_range(new_end, old_end);
        }
        Ok(())
    }

    /// A stable snapshot of the current areas, ordered by start address.
    pub fn areas(&self) -> Vec<VmArea> {
        self.areas.lock().unwrap().values().cloned().collect()
    }

    /// Replaces the backing object of the area starting at `start`, used by
    /// fork to interpose a shadow object after duplicating the area entry.
    pub(crate) fn replace_object(&self, start: Vaddr, object: Arc<dyn MemObject>) {
        if let Some(area) = self.areas.lock().unwrap().get_mut(&start) {
            area.object = object;
        }
    }

    /// Releases every area's object reference and unmaps the whole address
    /// space, leaving it empty. Called both by `proc_cleanup` (so a zombie
    /// process does not hold its memory objects until reaped) and by
    /// [`Drop`].
    pub fn destroy(&self) {
        let mut areas = self.areas.lock().unwrap();
        let drained: Vec<VmArea> = areas.drain().map(|(_, area)| area).collect();
        drop(areas);
        for area in &drained {
            self.space.unmap_range(area.start, area.end);
            put_dyn(&area.object);
        }
    }

    /// Reads `buf.len()` bytes starting at `vaddr`, faulting in pages on
    /// demand.
    pub fn read(&self, vaddr: Vaddr, buf: &mut [u8]) -> Result<usize> {
        self.access(vaddr, buf.len(), VmPerms::READ, |frame, page_off, chunk| {
            frame.read_bytes(page_off, &mut buf[chunk.clone()]).map_err(|_| Errno::EFAULT.into())
        })
    }

    /// Writes `buf` starting at `vaddr`, faulting in pages on demand and
    /// marking each touched page dirty.
    pub fn write(&self, vaddr: Vaddr, buf: &[u8]) -> Result<usize> {
        self.access(vaddr, buf.len(), VmPerms::WRITE, |frame, page_off, chunk| {
            frame.write_bytes(page_off, &buf[chunk.clone()]).map_err(|_| Errno::EFAULT.into())
        })
    }

    fn access(
        &self,
        vaddr: Vaddr,
        len: usize,
        required: VmPerms,
        mut per_page: impl FnMut(nucleus_hal::mm::Frame, usize, std::ops::Range<usize>) -> Result<()>,
    ) -> Result<usize> {
        let mut done = 0;
        while done < len {
            let cur = vaddr + done;
            let page_off = cur % PAGE_SIZE;
            let chunk_len = (PAGE_SIZE - page_off).min(len - done);
            let frame = crate::vm::fault::ensure_mapped(self, cur, required)?;
            per_page(frame, page_off, done..done + chunk_len)?;
            done += chunk_len;
        }
        Ok(done)
    }
}

impl Default for AddressSpaceMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AddressSpaceMap {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::mmobj::{Anonymous, MemObject};

    fn private_anon() -> MapFlags {
        MapFlags::PRIVATE | MapFlags::ANON
    }

    #[test]
    fn insert_rejects_overlap() {
        let map = AddressSpaceMap::new();
        map.insert(0x1000, 0x2000, VmPerms::READ | VmPerms::WRITE, private_anon(), Anonymous::new(), 0)
            .unwrap();
        let err = map
            .insert(0x1800, 0x2800, VmPerms::READ, private_anon(), Anonymous::new(), 0)
            .unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn write_then_read_round_trips_through_fault_handler() {
        let map = AddressSpaceMap::new();
        map.insert(0x1000, 0x3000, VmPerms::READ | VmPerms::WRITE, private_anon(), Anonymous::new(), 0)
            .unwrap();
        map.write(0x1ffe, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        map.read(0x1ffe, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn remove_splits_a_partially_overlapping_area() {
        let map = AddressSpaceMap::new();
        map.insert(0x1000, 0x4000, VmPerms::READ | VmPerms::WRITE, private_anon(), Anonymous::new(), 0)
            .unwrap();
        map.remove(0x2000, 0x3000).unwrap();
        assert!(map.find_range(0x1000).is_some());
        assert!(map.find_range(0x2000).is_none());
        assert!(map.find_range(0x3000).is_some());
    }

    #[test]
    fn find_free_range_lohi_returns_lowest_gap() {
        let map = AddressSpaceMap::new();
        map.insert(USER_LOW, USER_LOW + 2 * PAGE_SIZE, VmPerms::READ, private_anon(), Anonymous::new(), 0)
            .unwrap();
        let found = map.find_free_range(1, FindDirection::LoHi).unwrap();
        assert_eq!(found, USER_LOW + 2 * PAGE_SIZE);
    }

    #[test]
    fn find_free_range_hilo_returns_highest_gap() {
        let map = AddressSpaceMap::new();
        let found = map.find_free_range(1, FindDirection::HiLo).unwrap();
        assert_eq!(found, USER_HIGH - PAGE_SIZE);
    }

    #[test]
    fn destroy_releases_every_area_object_reference() {
        let map = AddressSpaceMap::new();
        let obj = Anonymous::new();
        map.insert(0x1000, 0x2000, VmPerms::READ, private_anon(), obj.clone(), 0).unwrap();
        assert_eq!(obj.ref_count(), 1);
        map.destroy();
        assert_eq!(obj.ref_count(), 0);
    }
}
