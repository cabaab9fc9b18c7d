// SPDX-License-Identifier: MPL-2.0

//! `fork`'s address-space duplication: give the child its own copy of every
//! mapped region, sharing pages copy-on-write rather than copying them
//! eagerly.
//!
//! For each private region, both the parent and the child end up looking at
//! a freshly created [`Shadow`] of the region's old object — two distinct
//! shadows of the same ancestor, so that once either side writes, only that
//! side materializes its own page; the other keeps reading through to the
//! shared, now-immutable-in-practice ancestor. A shared (`MAP_SHARED`)
//! region instead just takes one added reference to the same object in both
//! address spaces, with no shadow interposed: writes by either side are
//! meant to be visible to the other, which is exactly what sharing the
//! object directly (rather than forking its page cache into two shadows)
//! gives for free.

use crate::error::Result;
use crate::vm::mmobj::{put_dyn, Shadow};
use crate::vm::vmar::AddressSpaceMap;

/// Duplicates `parent`'s address space for a newly forked child, interposing
/// a shadow object over every private region and adding a reference for
/// every shared one. Invalidating the parent's page-table entries for the
/// duplicated range is the caller's responsibility (see
/// [`crate::syscall::proc::fork`]): it must happen after every region has
/// been processed, and a TLB flush is never modeled as failable here.
pub fn fork_address_space(parent: &AddressSpaceMap) -> Result<AddressSpaceMap> {
    let child = AddressSpaceMap::new();

    for area in parent.areas() {
        if !area.is_private() {
            // Shared: one more reference on the same object, no shadow.
            area.object.add_ref();
            if let Err(e) = child.insert(area.start, area.end, area.perms, area.flags, area.object.clone(), area.obj_offset) {
                put_dyn(&area.object);
                return Err(e);
            }
            parent.space().unmap_range(area.start, area.end);
            continue;
        }

        let parent_shadow = Shadow::new(area.object.clone());
        let child_shadow = Shadow::new(area.object.clone());
        // The area's old direct reference is superseded by the two shadows'
        // references to the same object.
        put_dyn(&area.object);

        if let Err(e) = child.insert(area.start, area.end, area.perms, area.flags, child_shadow.clone(), area.obj_offset) {
            // Nothing was committed to `child` yet; undo the two
            // interpositions we already made before propagating the error.
            roll_back(&area.object, parent_shadow, child_shadow);
            return Err(e);
        }
        parent.replace_object(area.start, parent_shadow);
        parent.space().unmap_range(area.start, area.end);
    }

    Ok(child)
}

fn roll_back(
    original: &std::sync::Arc<dyn crate::vm::mmobj::MemObject>,
    parent_shadow: std::sync::Arc<Shadow>,
    child_shadow: std::sync::Arc<Shadow>,
) {
    original.add_ref();
    put_dyn(&(parent_shadow as std::sync::Arc<dyn crate::vm::mmobj::MemObject>));
    put_dyn(&(child_shadow as std::sync::Arc<dyn crate::vm::mmobj::MemObject>));
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_hal::mm::VmPerms;

    use crate::vm::mmobj::{Anonymous, MemObject};
    use crate::vm::vmar::MapFlags;

    fn private_anon() -> MapFlags {
        MapFlags::PRIVATE | MapFlags::ANON
    }

    #[test]
    fn child_and_parent_diverge_after_writing_their_own_copy() {
        let parent = AddressSpaceMap::new();
        parent
            .insert(0x1000, 0x2000, VmPerms::READ | VmPerms::WRITE, private_anon(), Anonymous::new(), 0)
            .unwrap();
        parent.write(0x1000, &[1]).unwrap();

        let child = fork_address_space(&parent).unwrap();

        // Before either side writes post-fork, both see the inherited byte.
        let mut buf = [0u8; 1];
        child.read(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [1]);

        // The child writes its own copy; the parent's view is unaffected.
        child.write(0x1000, &[2]).unwrap();
        parent.read(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [1]);
        child.read(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [2]);
    }

    #[test]
    fn shared_region_survives_fork_as_one_reference_no_shadow() {
        let parent = AddressSpaceMap::new();
        let obj = Anonymous::new();
        parent
            .insert(0x1000, 0x2000, VmPerms::READ | VmPerms::WRITE, MapFlags::SHARED | MapFlags::ANON, obj.clone(), 0)
            .unwrap();
        assert_eq!(obj.ref_count(), 1);

        let child = fork_address_space(&parent).unwrap();
        assert_eq!(obj.ref_count(), 2);

        // Shared: a write from either side is visible to the other.
        child.write(0x1000, &[9]).unwrap();
        let mut buf = [0u8; 1];
        parent.read(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [9]);
    }
}
