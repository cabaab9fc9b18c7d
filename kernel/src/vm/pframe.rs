// SPDX-License-Identifier: MPL-2.0

//! Page frames: a cache of one resident page per (memory object, page
//! index), shared by every memory-object variant in [`super::mmobj`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use nucleus_hal::mm::Frame;
use nucleus_hal::sync::SpinLock;

use crate::sched::WaitQueue;

pub type PageIndex = usize;

/// A cached page belonging to exactly one (memory object, page index) pair.
///
/// `busy` guards the window between a frame being registered in its
/// object's cache and its content actually being filled in: a second
/// faulting thread that finds the same pframe already present, still busy,
/// waits on [`Self::wait_until_ready`] rather than racing to fill it twice.
pub struct PFrame {
    index: PageIndex,
    frame: SpinLock<Option<Frame>>,
    busy: AtomicBool,
    pin_count: AtomicUsize,
    dirty: AtomicBool,
    waiters: WaitQueue,
}

impl PFrame {
    fn new_busy(index: PageIndex) -> Arc<Self> {
        Arc::new(Self {
            index,
            frame: SpinLock::new(None),
            busy: AtomicBool::new(true),
            pin_count: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            waiters: WaitQueue::new(),
        })
    }

    pub fn index(&self) -> PageIndex {
        self.index
    }

    /// The backing physical page.
    ///
    /// # Panics
    ///
    /// Panics if called before the frame has finished filling; callers only
    /// ever see a [`PFrame`] after [`super::mmobj::lookup_or_fill`] returns
    /// it, by which point it is always populated.
    pub fn frame(&self) -> Frame {
        self.frame
            .lock_irq_disabled()
            .clone()
            .expect("pframe read before fill completed")
    }

    fn set_frame(&self, frame: Frame) {
        *self.frame.lock_irq_disabled() = Some(frame);
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn mark_ready(&self) {
        self.busy.store(false, Ordering::Release);
        self.waiters.broadcast_on();
    }

    fn wait_until_ready(&self) {
        while self.is_busy() {
            self.waiters.sleep_on();
        }
    }

    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        self.pin_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

/// The resident-page cache embedded in every memory-object variant.
///
/// A plain field rather than a base class: Rust has no struct inheritance,
/// so each variant in [`super::mmobj`] holds one of these and the shared
/// lookup/fill/drain logic is free functions operating on it instead of
/// being built into a common supertype.
#[derive(Default)]
pub struct PageCache {
    pages: SpinLock<HashMap<PageIndex, Arc<PFrame>>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            pages: SpinLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, index: PageIndex) -> Option<Arc<PFrame>> {
        self.pages.lock_irq_disabled().get(&index).cloned()
    }

    pub fn len(&self) -> usize {
        self.pages.lock_irq_disabled().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every resident page, unpinning none of them: callers that
    /// reach this (an object becoming unreachable) already hold the last
    /// references to these pages.
    pub fn drain(&self) -> Vec<Arc<PFrame>> {
        self.pages
            .lock_irq_disabled()
            .drain()
            .map(|(_, pf)| pf)
            .collect()
    }
}

/// Finds the resident page for `index` in `cache`, filling it via `fill` if
/// absent. At most one [`PFrame`] per index is ever created: a thread that
/// loses the race to create one waits for the winner's fill to complete.
pub fn lookup_or_fill<F>(cache: &PageCache, index: PageIndex, fill: F) -> crate::error::Result<Arc<PFrame>>
where
    F: FnOnce() -> crate::error::Result<Frame>,
{
    loop {
        let existing = cache.pages.lock_irq_disabled().get(&index).cloned();
        if let Some(pf) = existing {
            if pf.is_busy() {
                pf.wait_until_ready();
                continue;
            }
            return Ok(pf);
        }

        let pf = PFrame::new_busy(index);
        {
            let mut pages = cache.pages.lock_irq_disabled();
            if pages.contains_key(&index) {
                // Lost the race to another filler; retry from the top.
                continue;
            }
            pages.insert(index, pf.clone());
        }

        let frame = match fill() {
            Ok(frame) => frame,
            Err(e) => {
                // Don't leave a permanently-busy entry behind: any thread
                // already waiting on `pf` would sleep on it forever, and no
                // later fault could ever retry the fill. Evict it and wake
                // waiters so they race to fill it again instead.
                cache.pages.lock_irq_disabled().remove(&index);
                pf.mark_ready();
                return Err(e);
            }
        };
        pf.set_frame(frame);
        pf.mark_ready();
        return Ok(pf);
    }
}
