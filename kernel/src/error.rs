// SPDX-License-Identifier: MPL-2.0

//! The error taxonomy returned by VFS, VM, and process-lifecycle operations.
//!
//! Every kind here is one of the error conditions enumerated in the
//! specification's error-handling design: each fallible operation returns
//! one of these, and the syscall layer negates the numeric value at the
//! boundary, exactly as a real kernel does with `errno`.

use int_to_c_enum::TryFromInt;

/// One of the error kinds a VFS, VM, or process-lifecycle operation can fail with.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, TryFromInt)]
pub enum Errno {
    /// Operation not permitted (link of a directory, write without write mode, ...).
    EPERM = 1,
    /// No such file or directory.
    ENOENT = 2,
    /// No such process.
    ESRCH = 3,
    /// A cancellable sleep or lock was interrupted by cancellation.
    EINTR = 4,
    /// Bad file descriptor.
    EBADF = 9,
    /// No child processes (waitpid on a pid that is not a child).
    ECHILD = 10,
    /// Out of memory: the page/object allocator failed.
    ENOMEM = 12,
    /// Bad address: a user pointer did not resolve to a valid page fault result.
    EFAULT = 14,
    /// File exists (create/mkdir/mknod/link target already present).
    EEXIST = 17,
    /// Cross-device link.
    EXDEV = 18,
    /// Not a directory.
    ENOTDIR = 20,
    /// Is a directory.
    EISDIR = 21,
    /// Invalid argument.
    EINVAL = 22,
    /// Too many open files (fd table full).
    EMFILE = 24,
    /// Name too long (a pathname component exceeds the maximum length).
    ENAMETOOLONG = 36,
    /// Function not implemented / operation not supported by this vnode or device.
    ENOSYS = 38,
    /// Directory not empty.
    ENOTEMPTY = 39,
}

/// The result type returned from the APIs of this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// The error type returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn errno(&self) -> Errno {
        self.errno
    }

    pub const fn message(&self) -> Option<&'static str> {
        self.msg
    }

    /// The negated numeric value a syscall dispatcher returns to userspace.
    pub const fn to_syscall_return(self) -> isize {
        -(self.errno as isize)
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{:?}: {}", self.errno, msg),
            None => write!(f, "{:?}", self.errno),
        }
    }
}

impl std::error::Error for Error {}

/// Returns early with an [`Error`] built from an [`Errno`].
#[macro_export]
macro_rules! return_errno {
    ($errno:expr) => {
        return Err($crate::error::Error::new($errno))
    };
}

/// Returns early with an [`Error`] built from an [`Errno`] and a static message.
#[macro_export]
macro_rules! return_errno_with_message {
    ($errno:expr, $msg:expr) => {
        return Err($crate::error::Error::with_message($errno, $msg))
    };
}
