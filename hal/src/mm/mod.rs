// SPDX-License-Identifier: MPL-2.0

//! A software simulation of physical memory and a hardware page table.
//!
//! The physical page allocator and the page-table/TLB layer are out of
//! scope for this kernel core: the VM object graph and page-fault handler
//! built on top of [`crate`] only need *an* interface that hands out
//! zero-filled pages and lets a task map/unmap/reprotect virtual pages in
//! some address space, and reads back which virtual pages are currently
//! mapped. This module provides exactly that, backed by the host heap and a
//! `BTreeMap` instead of a physical frame pool and real page-table
//! hardware.

mod frame;
mod space;

pub use self::frame::{Frame, FrameAllocOptions};
pub use self::space::{PageFault, PageFaultErrorCode, VmSpace};

/// The size, in bytes, of a single page.
pub const PAGE_SIZE: usize = 4096;

/// A virtual address.
pub type Vaddr = usize;

/// A physical address.
///
/// Since there is no real physical memory in this simulation, this is
/// simply the identity of a [`Frame`], unique for as long as the frame is
/// alive.
pub type Paddr = usize;

bitflags::bitflags! {
    /// Access permissions of a mapped page, mirroring the POSIX `PROT_*` bits
    /// a `mmap`-family syscall would pass down to the page table.
    pub struct VmPerms: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

impl Default for VmPerms {
    fn default() -> Self {
        VmPerms::empty()
    }
}
