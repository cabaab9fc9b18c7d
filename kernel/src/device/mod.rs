// SPDX-License-Identifier: MPL-2.0

//! The character/block device vtable and the handful of trivial devices
//! `devfs` pre-wires at boot.
//!
//! Real device drivers — disk, tty, block — are out of scope for this
//! kernel core (see the crate-level overview); what lives here is only the
//! interface the VFS device-special path and [`crate::vm::mmobj`] consume,
//! plus `/dev/null` and `/dev/zero`, which are simple enough that "the
//! device" and "the interface to the device" are the same few lines. The
//! `/dev/tty*` entries are wired up against a minimal in-memory stand-in
//! that satisfies the same interface without claiming to be a real line
//! discipline.

use std::sync::Arc;

use nucleus_hal::sync::SpinLock;

use crate::error::{Errno, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Character,
    Block,
}

/// The operations the VFS device-special path and `mmap` dispatch through.
pub trait Device: Send + Sync {
    fn kind(&self) -> DeviceKind;

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize>;
    fn write(&self, offset: usize, buf: &[u8]) -> Result<usize>;
}

/// `/dev/null`: reads as EOF, accepts and discards any write.
pub struct NullDevice;

impl Device for NullDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Character
    }

    fn read(&self, _offset: usize, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn write(&self, _offset: usize, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }
}

/// `/dev/zero`: reads as an endless stream of zero bytes, accepts and
/// discards any write.
pub struct ZeroDevice;

impl Device for ZeroDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Character
    }

    fn read(&self, _offset: usize, buf: &mut [u8]) -> Result<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, _offset: usize, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }
}

/// `/dev/tty0`, `/dev/tty1`, `/dev/tty2`: a minimal in-memory line buffer
/// standing in for a real terminal driver, sufficient to exercise the
/// device-special read/write path end to end without a tty/line-discipline
/// implementation.
pub struct TtyDevice {
    buf: SpinLock<Vec<u8>>,
}

impl TtyDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            buf: SpinLock::new(Vec::new()),
        })
    }
}

impl Device for TtyDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Character
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let contents = self.buf.lock_irq_disabled();
        if offset >= contents.len() {
            return Ok(0);
        }
        let n = (contents.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&contents[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, _offset: usize, buf: &[u8]) -> Result<usize> {
        self.buf.lock_irq_disabled().extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// A block device reached through the special-file read/write path, which
/// the specification requires to report "unsupported" (block I/O only ever
/// happens through a mapped memory object, never a byte-offset read/write).
pub struct BlockDevice;

impl Device for BlockDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Block
    }

    fn read(&self, _offset: usize, _buf: &mut [u8]) -> Result<usize> {
        Err(Errno::ENOSYS.into())
    }

    fn write(&self, _offset: usize, _buf: &[u8]) -> Result<usize> {
        Err(Errno::ENOSYS.into())
    }
}
