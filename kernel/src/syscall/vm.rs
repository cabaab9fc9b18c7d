// SPDX-License-Identifier: MPL-2.0

//! `mmap`/`munmap`/`brk`/`sbrk`: the syscalls that grow and shrink a
//! process's address space atop [`crate::vm::vmar::AddressSpaceMap`].

use std::sync::Arc;

use align_ext::AlignExt;
use nucleus_hal::mm::{Vaddr, VmPerms, PAGE_SIZE};

use crate::error::{Errno, Result};
use crate::fs::file::File;
use crate::process::Process;
use crate::vm::mmobj::{Anonymous, MemObject, Shadow};
use crate::vm::vmar::{FindDirection, MapFlags};

/// Where a process's heap region starts. `brk`'s first call (or `sbrk`'s
/// first nonzero call) creates the heap region here; it grows and shrinks
/// in place from then on.
pub const HEAP_BASE: Vaddr = 0x1000_0000;

fn npages(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

/// Maps `len` bytes, optionally backed by `file` starting at byte `offset`
/// into it (`None` for an anonymous mapping). `flags` must name exactly one
/// of `{SHARED, PRIVATE}`. If `flags` contains `FIXED`, `addr` is taken
/// literally (and whatever was mapped there is unmapped first); otherwise
/// `addr` is a hint and a free range is found by ascending first-fit search.
pub fn mmap(
    process: &Arc<Process>,
    addr: Vaddr,
    len: usize,
    perms: VmPerms,
    flags: MapFlags,
    file: Option<Arc<File>>,
    offset: usize,
) -> Result<Vaddr> {
    if len == 0 {
        return Err(Errno::EINVAL.into());
    }
    let shared = flags.contains(MapFlags::SHARED);
    let private = flags.contains(MapFlags::PRIVATE);
    if shared == private {
        // Exactly one of {shared, private} must be set.
        return Err(Errno::EINVAL.into());
    }
    if offset % PAGE_SIZE != 0 {
        return Err(Errno::EINVAL.into());
    }

    let n = npages(len);
    let span = n.checked_mul(PAGE_SIZE).ok_or(Errno::EINVAL)?;
    let vm = process.vm.lock_irq_disabled();
    let start = if flags.contains(MapFlags::FIXED) {
        let start = addr.align_down(PAGE_SIZE);
        let end = start.checked_add(span).ok_or(Errno::EINVAL)?;
        vm.remove(start, end)?;
        start
    } else {
        vm.find_free_range(n, FindDirection::LoHi).ok_or(Errno::ENOMEM)?
    };
    let end = start.checked_add(span).ok_or(Errno::EINVAL)?;

    let object: Arc<dyn MemObject> = match &file {
        Some(f) => f.vnode().ops().mmap(f.vnode())?,
        None => Anonymous::new(),
    };
    // A private mapping of a file is backed by a shadow over the file's own
    // object, so writes never reach the page cache the filesystem shares
    // with every other opener; a private anonymous mapping needs no such
    // interposition; neither does any shared mapping, which is meant to
    // alias the underlying object directly.
    let object: Arc<dyn MemObject> = if private && file.is_some() {
        Shadow::new(object)
    } else {
        object
    };

    vm.insert(start, end, perms, flags, object, offset / PAGE_SIZE)?;
    Ok(start)
}

/// Unmaps `[addr, addr + len)`, releasing the reference(s) each overlapping
/// region held on its backing object.
pub fn munmap(process: &Arc<Process>, addr: Vaddr, len: usize) -> Result<()> {
    if len == 0 || addr % PAGE_SIZE != 0 {
        return Err(Errno::EINVAL.into());
    }
    let span = npages(len).checked_mul(PAGE_SIZE).ok_or(Errno::EINVAL)?;
    let end = addr.checked_add(span).ok_or(Errno::EINVAL)?;
    process.vm.lock_irq_disabled().remove(addr, end)
}

/// Sets the process's heap break to `addr`, growing or shrinking the heap
/// region in place, and returns the resulting break. `addr == None` returns
/// the current break without changing anything (`sbrk(0)`'s implementation).
pub fn brk(process: &Arc<Process>, addr: Option<Vaddr>) -> Result<Vaddr> {
    let mut brk = process.brk.lock_irq_disabled();
    let current = brk.unwrap_or(HEAP_BASE);
    let target = match addr {
        None => return Ok(current),
        Some(a) => a,
    };
    if target < HEAP_BASE || target % PAGE_SIZE != 0 {
        return Err(Errno::EINVAL.into());
    }
    if target == current {
        *brk = Some(target);
        return Ok(target);
    }

    let vm = process.vm.lock_irq_disabled();
    if current == HEAP_BASE {
        if target > HEAP_BASE {
            vm.insert(
                HEAP_BASE,
                target,
                VmPerms::READ | VmPerms::WRITE,
                MapFlags::PRIVATE | MapFlags::ANON,
                Anonymous::new(),
                0,
            )?;
        }
    } else {
        vm.resize(HEAP_BASE, target)?;
    }
    *brk = Some(target);
    Ok(target)
}

/// Adjusts the heap break by `increment` bytes (rounded up to a whole page)
/// and returns the break's value before the adjustment, as POSIX `sbrk`
/// does.
pub fn sbrk(process: &Arc<Process>, increment: isize) -> Result<Vaddr> {
    let current = brk(process, None)?;
    if increment == 0 {
        return Ok(current);
    }
    let target = if increment > 0 {
        current.checked_add(increment as usize)
    } else {
        current.checked_sub((-increment) as usize)
    }
    .ok_or(Errno::EINVAL)?;
    brk(process, Some(target.align_up(PAGE_SIZE)))?;
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::process::Process;

    fn boot_process() -> Arc<Process> {
        crate::test_support::init();
        let root = crate::fs::root();
        Process::create("test", None, root)
    }

    #[test]
    fn anonymous_mmap_is_readable_and_writable() {
        let process = boot_process();
        let addr = mmap(
            &process,
            0,
            PAGE_SIZE,
            VmPerms::READ | VmPerms::WRITE,
            MapFlags::PRIVATE | MapFlags::ANON,
            None,
            0,
        )
        .unwrap();
        process.vm.lock_irq_disabled().write(addr, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        process.vm.lock_irq_disabled().read(addr, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    /// The highest page-aligned address representable in a `usize`; adding
    /// even one more page overflows.
    fn near_max_page() -> Vaddr {
        (usize::MAX / PAGE_SIZE) * PAGE_SIZE
    }

    #[test]
    fn mmap_fixed_overflowing_the_address_space_is_einval() {
        let process = boot_process();
        let err = mmap(
            &process,
            near_max_page(),
            PAGE_SIZE * 4,
            VmPerms::READ | VmPerms::WRITE,
            MapFlags::PRIVATE | MapFlags::ANON | MapFlags::FIXED,
            None,
            0,
        )
        .unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn munmap_overflowing_the_address_space_is_einval() {
        let process = boot_process();
        let err = munmap(&process, near_max_page(), PAGE_SIZE * 4).unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn mmap_rejects_zero_length() {
        let process = boot_process();
        let err = mmap(
            &process,
            0,
            0,
            VmPerms::READ,
            MapFlags::PRIVATE | MapFlags::ANON,
            None,
            0,
        )
        .unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn mmap_rejects_neither_or_both_of_shared_and_private() {
        let process = boot_process();
        let err = mmap(&process, 0, PAGE_SIZE, VmPerms::READ, MapFlags::ANON, None, 0).unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn munmap_then_access_faults() {
        let process = boot_process();
        let addr = mmap(
            &process,
            0,
            PAGE_SIZE,
            VmPerms::READ | VmPerms::WRITE,
            MapFlags::PRIVATE | MapFlags::ANON,
            None,
            0,
        )
        .unwrap();
        munmap(&process, addr, PAGE_SIZE).unwrap();
        let mut buf = [0u8; 1];
        assert!(process.vm.lock_irq_disabled().read(addr, &mut buf).is_err());
    }

    #[test]
    fn sbrk_zero_reports_current_break_without_growing() {
        let process = boot_process();
        let first = sbrk(&process, 0).unwrap();
        assert_eq!(first, HEAP_BASE);
        let second = sbrk(&process, 0).unwrap();
        assert_eq!(second, HEAP_BASE);
    }

    #[test]
    fn sbrk_grows_the_heap_and_is_immediately_writable() {
        let process = boot_process();
        let old_brk = sbrk(&process, PAGE_SIZE as isize).unwrap();
        assert_eq!(old_brk, HEAP_BASE);
        process.vm.lock_irq_disabled().write(HEAP_BASE, &[42]).unwrap();
        let mut buf = [0u8; 1];
        process.vm.lock_irq_disabled().read(HEAP_BASE, &mut buf).unwrap();
        assert_eq!(buf, [42]);
    }

    #[test]
    fn brk_below_heap_base_is_einval() {
        let process = boot_process();
        let err = brk(&process, Some(HEAP_BASE - PAGE_SIZE)).unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn brk_shrink_unmaps_the_released_tail() {
        let process = boot_process();
        brk(&process, Some(HEAP_BASE + 2 * PAGE_SIZE)).unwrap();
        process.vm.lock_irq_disabled().write(HEAP_BASE + PAGE_SIZE, &[1]).unwrap();
        brk(&process, Some(HEAP_BASE + PAGE_SIZE)).unwrap();
        let mut buf = [0u8; 1];
        assert!(process.vm.lock_irq_disabled().read(HEAP_BASE + PAGE_SIZE, &mut buf).is_err());
    }
}
