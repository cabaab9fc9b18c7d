// SPDX-License-Identifier: MPL-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Paddr, PAGE_SIZE};
use crate::prelude::*;

/// A handle to a page frame (a physical memory page).
///
/// A cloned `Frame` refers to the same underlying page: behind the scenes a
/// reference count is kept so that the backing storage is only released
/// once every handle to it is dropped, exactly as it would be for a real
/// physical page. Call [`Frame::duplicate`] to get an independent copy
/// instead of another handle to the same page, e.g. when breaking
/// copy-on-write sharing.
#[derive(Clone)]
pub struct Frame {
    paddr: Paddr,
    content: Arc<Mutex<Box<[u8; PAGE_SIZE]>>>,
}

fn next_paddr() -> Paddr {
    static NEXT: AtomicUsize = AtomicUsize::new(PAGE_SIZE);
    NEXT.fetch_add(PAGE_SIZE, Ordering::Relaxed)
}

impl Frame {
    fn new(initial: Box<[u8; PAGE_SIZE]>) -> Self {
        Self {
            paddr: next_paddr(),
            content: Arc::new(Mutex::new(initial)),
        }
    }

    /// Returns the (simulated) physical address backing this frame.
    ///
    /// Stable for the lifetime of the frame; unique across all live frames.
    pub fn paddr(&self) -> Paddr {
        self.paddr
    }

    /// Returns the size of the frame, always [`PAGE_SIZE`].
    pub fn size(&self) -> usize {
        PAGE_SIZE
    }

    /// Returns the number of live handles to this frame, mirroring the
    /// physical-page reference count a real allocator would track.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.content)
    }

    /// Copies `buf.len()` bytes out of the frame starting at `offset`.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        if offset.checked_add(buf.len()).is_none_or(|end| end > PAGE_SIZE) {
            return Err(Error::InvalidArgs);
        }
        let content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        buf.copy_from_slice(&content[offset..offset + buf.len()]);
        Ok(())
    }

    /// Copies `buf` into the frame starting at `offset`.
    pub fn write_bytes(&self, offset: usize, buf: &[u8]) -> Result<()> {
        if offset.checked_add(buf.len()).is_none_or(|end| end > PAGE_SIZE) {
            return Err(Error::InvalidArgs);
        }
        let mut content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        content[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    /// Fills the whole frame with zeros.
    pub fn zero(&self) {
        let mut content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        content.fill(0);
    }

    /// Allocates a brand new frame with the same contents as this one.
    ///
    /// Unlike [`Clone`], the returned frame does not alias this one: writes
    /// to either are invisible to the other. This is what a copy-on-write
    /// fault handler calls once it decides sharing must end.
    pub fn duplicate(&self) -> Self {
        let content = self.content.lock().unwrap_or_else(|e| e.into_inner());
        Self::new(Box::new(**content))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("paddr", &self.paddr)
            .field("refs", &self.reference_count())
            .finish()
    }
}

/// Builder for allocating a new [`Frame`].
pub struct FrameAllocOptions {
    zeroed: bool,
}

impl FrameAllocOptions {
    /// Creates a new set of options. Frames are zeroed by default.
    pub fn new() -> Self {
        Self { zeroed: true }
    }

    /// Sets whether the allocated frame should be zeroed.
    ///
    /// Skipping zeroing is only safe when the caller immediately overwrites
    /// every byte of the frame before anything else can observe it.
    pub fn zeroed(mut self, zeroed: bool) -> Self {
        self.zeroed = zeroed;
        self
    }

    /// Allocates a single frame.
    ///
    /// This simulation always zeroes fresh frames; `zeroed(false)` is
    /// accepted for API parity but has no observable effect, since there is
    /// no stale physical memory here to leak.
    pub fn alloc(&self) -> Result<Frame> {
        let _ = self.zeroed;
        Ok(Frame::new(Box::new([0u8; PAGE_SIZE])))
    }
}

impl Default for FrameAllocOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_frames_are_zeroed_by_default() {
        let frame = FrameAllocOptions::new().alloc().unwrap();
        let mut buf = [0xFFu8; 16];
        frame.read_bytes(0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn write_then_read_round_trips() {
        let frame = FrameAllocOptions::new().alloc().unwrap();
        frame.write_bytes(10, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        frame.read_bytes(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let frame = FrameAllocOptions::new().alloc().unwrap();
        assert!(frame.write_bytes(PAGE_SIZE - 1, &[1, 2]).is_err());
    }

    #[test]
    fn clone_aliases_but_duplicate_does_not() {
        let frame = FrameAllocOptions::new().alloc().unwrap();
        frame.write_bytes(0, &[7]).unwrap();

        let alias = frame.clone();
        assert_eq!(alias.paddr(), frame.paddr());
        assert_eq!(frame.reference_count(), 2);

        let copy = frame.duplicate();
        assert_ne!(copy.paddr(), frame.paddr());
        let mut buf = [0u8; 1];
        copy.read_bytes(0, &mut buf).unwrap();
        assert_eq!(buf, [7]);

        copy.write_bytes(0, &[9]).unwrap();
        frame.read_bytes(0, &mut buf).unwrap();
        assert_eq!(buf, [7], "duplicate must not alias the original");
    }
}
