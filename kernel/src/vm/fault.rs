// SPDX-License-Identifier: MPL-2.0

//! The page-fault handler: the single place that turns "access to `vaddr`
//! isn't satisfiable by the page table" into "fault in (or materialize) the
//! right page from the right memory object and map it."

use nucleus_hal::mm::{Frame, PageFaultErrorCode, Vaddr, VmPerms, PAGE_SIZE};

use crate::error::{Errno, Result};
use crate::vm::vmar::{AddressSpaceMap, MapFlags};

/// Handles one page fault against `map`: finds the area covering the
/// faulting address, checks its permissions cover what was required, faults
/// in (or copies, for a private write) the backing page, and installs it in
/// the page table.
pub fn handle_page_fault(map: &AddressSpaceMap, vaddr: Vaddr, required: VmPerms) -> Result<Frame> {
    let area = map.find_range(vaddr).ok_or(Errno::EFAULT)?;
    if !area.perms.contains(required) {
        return Err(Errno::EFAULT.into());
    }

    let page_index = area.page_index_for(vaddr);
    let forwrite = required.contains(VmPerms::WRITE) && area.is_private();
    let pf = area.object.lookuppage(page_index, forwrite)?;
    if required.contains(VmPerms::WRITE) {
        pf.pin();
        area.object.dirtypage(&pf);
        pf.unpin();
    }

    // A page behind a shadow object is writable in the page table only once
    // a write has actually materialized a copy owned by that shadow itself:
    // until then the resident page may belong to an ancestor in the chain,
    // shared with the other side of a fork, and must stay read-only so the
    // next write re-faults and performs the copy. A non-shadow object (a
    // shared mapping, or a private one that has never been forked) has
    // nothing to protect against and is writable as soon as its own
    // permissions allow.
    let install_writable = area.perms.contains(VmPerms::WRITE)
        && (area.object.shadowed().is_none() || area.object.page_cache().get(page_index).is_some());
    let install_perms = if install_writable {
        area.perms
    } else {
        area.perms - VmPerms::WRITE
    };

    let page_vaddr = vaddr - (vaddr % PAGE_SIZE);
    map.space()
        .map(page_vaddr, pf.frame().clone(), install_perms)
        .map_err(|_| Errno::EFAULT)?;
    Ok(pf.frame().clone())
}

/// Returns the frame currently satisfying `vaddr` for `required` access,
/// running the fault handler first if the page table doesn't have it yet.
pub fn ensure_mapped(map: &AddressSpaceMap, vaddr: Vaddr, required: VmPerms) -> Result<Frame> {
    match map.space().translate(vaddr, required) {
        Ok(frame) => Ok(frame),
        Err(fault) => {
            if fault.code == PageFaultErrorCode::ProtectionViolation && !required.contains(VmPerms::WRITE) {
                return Err(Errno::EFAULT.into());
            }
            handle_page_fault(map, vaddr, required)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::mmobj::Anonymous;

    fn private_anon() -> MapFlags {
        MapFlags::PRIVATE | MapFlags::ANON
    }

    #[test]
    fn first_touch_demand_pages_a_fresh_zeroed_frame() {
        let map = AddressSpaceMap::new();
        map.insert(0x1000, 0x2000, VmPerms::READ | VmPerms::WRITE, private_anon(), Anonymous::new(), 0)
            .unwrap();
        let frame = ensure_mapped(&map, 0x1000, VmPerms::READ).unwrap();
        let mut buf = [0xffu8; 8];
        frame.read_bytes(0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn fault_outside_any_area_is_efault() {
        let map = AddressSpaceMap::new();
        let err = ensure_mapped(&map, 0x9000, VmPerms::READ).unwrap_err();
        assert_eq!(err.errno(), Errno::EFAULT);
    }

    #[test]
    fn write_fault_against_read_only_area_is_efault() {
        let map = AddressSpaceMap::new();
        map.insert(0x1000, 0x2000, VmPerms::READ, private_anon(), Anonymous::new(), 0).unwrap();
        let err = ensure_mapped(&map, 0x1000, VmPerms::WRITE).unwrap_err();
        assert_eq!(err.errno(), Errno::EFAULT);
    }

    #[test]
    fn post_fork_shadow_read_maps_read_only_until_first_write() {
        let parent = AddressSpaceMap::new();
        parent
            .insert(0x1000, 0x2000, VmPerms::READ | VmPerms::WRITE, private_anon(), Anonymous::new(), 0)
            .unwrap();
        let child = crate::vm::fork::fork_address_space(&parent).unwrap();

        // A read-only touch against a freshly interposed shadow must not
        // install a writable PTE: the resident page still belongs to the
        // shadowed ancestor the other side of the fork can also reach, so an
        // in-place write through the page table would bypass the fault
        // handler and skip the copy.
        ensure_mapped(&child, 0x1000, VmPerms::READ).unwrap();
        let err = child.space().translate(0x1000, VmPerms::WRITE).unwrap_err();
        assert_eq!(err.code, PageFaultErrorCode::ProtectionViolation);

        ensure_mapped(&child, 0x1000, VmPerms::WRITE).unwrap();
        assert!(child.space().translate(0x1000, VmPerms::WRITE).is_ok());
    }
}
