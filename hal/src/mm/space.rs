// SPDX-License-Identifier: MPL-2.0

use std::collections::BTreeMap;

use align_ext::AlignExt;

use super::{Frame, Vaddr, VmPerms, PAGE_SIZE};
use crate::prelude::*;
use crate::sync::SpinLock;

/// The reason a [`VmSpace`] access failed to translate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PageFaultErrorCode {
    /// No page is mapped at the faulting address.
    NotMapped,
    /// A page is mapped, but not with the permission the access needed
    /// (e.g. a write to a read-only mapping).
    ProtectionViolation,
}

/// A page fault: an access to `vaddr` that the page table could not satisfy.
#[derive(Clone, Copy, Debug)]
pub struct PageFault {
    pub vaddr: Vaddr,
    pub required: VmPerms,
    pub code: PageFaultErrorCode,
}

#[derive(Clone)]
struct Mapping {
    frame: Frame,
    perms: VmPerms,
}

/// A simulated hardware page table for one address space.
///
/// Real page-table/TLB management is out of scope for this kernel core: the
/// VM object graph only needs something it can ask "what, if anything, is
/// mapped at this virtual page, with what permissions" and "map/unmap/
/// reprotect this virtual page". This is a `BTreeMap<Vaddr, Frame>` standing
/// in for that hardware, keyed by page-aligned virtual address.
pub struct VmSpace {
    mappings: SpinLock<BTreeMap<Vaddr, Mapping>>,
}

impl VmSpace {
    /// Creates a new, empty address space.
    pub fn new() -> Self {
        Self {
            mappings: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Maps `frame` at `vaddr` with the given permissions.
    ///
    /// `vaddr` must already be page-aligned; replaces whatever was
    /// previously mapped there, if anything.
    pub fn map(&self, vaddr: Vaddr, frame: Frame, perms: VmPerms) -> Result<()> {
        if !vaddr.is_aligned(PAGE_SIZE) {
            return Err(Error::InvalidArgs);
        }
        self.mappings
            .lock_irq_disabled()
            .insert(vaddr, Mapping { frame, perms });
        Ok(())
    }

    /// Removes the mapping at `vaddr`, if any.
    pub fn unmap(&self, vaddr: Vaddr) {
        self.mappings.lock_irq_disabled().remove(&vaddr.align_down(PAGE_SIZE));
    }

    /// Removes every mapping whose page lies in `[start, end)`.
    pub fn unmap_range(&self, start: Vaddr, end: Vaddr) {
        let mut mappings = self.mappings.lock_irq_disabled();
        let in_range: Vec<Vaddr> = mappings
            .range(start.align_down(PAGE_SIZE)..end.align_up(PAGE_SIZE))
            .map(|(&vaddr, _)| vaddr)
            .collect();
        for vaddr in in_range {
            mappings.remove(&vaddr);
        }
    }

    /// Changes the permissions of the mapping at `vaddr`, if any is present.
    pub fn protect(&self, vaddr: Vaddr, perms: VmPerms) {
        if let Some(mapping) = self
            .mappings
            .lock_irq_disabled()
            .get_mut(&vaddr.align_down(PAGE_SIZE))
        {
            mapping.perms = perms;
        }
    }

    /// Returns the frame mapped at `vaddr`, if any, ignoring permissions.
    pub fn frame_at(&self, vaddr: Vaddr) -> Option<Frame> {
        self.mappings
            .lock_irq_disabled()
            .get(&vaddr.align_down(PAGE_SIZE))
            .map(|mapping| mapping.frame.clone())
    }

    /// Looks up whether `vaddr` is mapped with (at least) `required` permissions.
    ///
    /// Returns `Ok(frame)` if the access is satisfiable, or the
    /// [`PageFault`] that a real MMU would have raised otherwise.
    pub fn translate(&self, vaddr: Vaddr, required: VmPerms) -> std::result::Result<Frame, PageFault> {
        let mappings = self.mappings.lock_irq_disabled();
        match mappings.get(&vaddr.align_down(PAGE_SIZE)) {
            None => Err(PageFault {
                vaddr,
                required,
                code: PageFaultErrorCode::NotMapped,
            }),
            Some(mapping) if !mapping.perms.contains(required) => Err(PageFault {
                vaddr,
                required,
                code: PageFaultErrorCode::ProtectionViolation,
            }),
            Some(mapping) => Ok(mapping.frame.clone()),
        }
    }

    /// Returns whether any page in `[start, end)` is currently mapped.
    pub fn has_mapping_in(&self, start: Vaddr, end: Vaddr) -> bool {
        self.mappings
            .lock_irq_disabled()
            .range(start.align_down(PAGE_SIZE)..end.align_up(PAGE_SIZE))
            .next()
            .is_some()
    }
}

impl Default for VmSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::FrameAllocOptions;

    fn frame() -> Frame {
        FrameAllocOptions::new().alloc().unwrap()
    }

    #[test]
    fn unmapped_address_faults_as_not_mapped() {
        let space = VmSpace::new();
        let err = space.translate(0x1000, VmPerms::READ).unwrap_err();
        assert_eq!(err.code, PageFaultErrorCode::NotMapped);
    }

    #[test]
    fn mapped_page_translates_with_sufficient_perms() {
        let space = VmSpace::new();
        let f = frame();
        space.map(0x1000, f.clone(), VmPerms::READ | VmPerms::WRITE).unwrap();
        let got = space.translate(0x1000, VmPerms::READ).unwrap();
        assert_eq!(got.paddr(), f.paddr());
    }

    #[test]
    fn write_to_read_only_page_faults() {
        let space = VmSpace::new();
        space.map(0x1000, frame(), VmPerms::READ).unwrap();
        let err = space.translate(0x1000, VmPerms::WRITE).unwrap_err();
        assert_eq!(err.code, PageFaultErrorCode::ProtectionViolation);
    }

    #[test]
    fn protect_upgrades_permissions_in_place() {
        let space = VmSpace::new();
        space.map(0x1000, frame(), VmPerms::READ).unwrap();
        space.protect(0x1000, VmPerms::READ | VmPerms::WRITE);
        assert!(space.translate(0x1000, VmPerms::WRITE).is_ok());
    }

    #[test]
    fn unmap_range_clears_every_page_in_the_span() {
        let space = VmSpace::new();
        space.map(0x1000, frame(), VmPerms::READ).unwrap();
        space.map(0x2000, frame(), VmPerms::READ).unwrap();
        space.map(0x3000, frame(), VmPerms::READ).unwrap();
        space.unmap_range(0x1000, 0x3000);
        assert!(space.translate(0x1000, VmPerms::READ).is_err());
        assert!(space.translate(0x2000, VmPerms::READ).is_err());
        assert!(space.translate(0x3000, VmPerms::READ).is_ok());
    }

    #[test]
    fn map_rejects_unaligned_vaddr() {
        let space = VmSpace::new();
        assert!(space.map(0x1001, frame(), VmPerms::READ).is_err());
    }
}
