//! errno plumbing for the raw syscall layer.
//!
//! Linux reports failures as `-1` with the error number in the thread's
//! `errno` slot. [`check`] folds that convention into a `Result`; the typed
//! modules then map [`Errno`] values onto per-operation error enums.

use libc::c_long;

/// Type alias for `Result` with [`Errno`] as the error type.
pub type Result<T, E = Errno> = core::result::Result<T, E>;

/// A captured `errno` value.
///
/// The inner value is always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(i32);

impl Errno {
    /// Wraps a raw error number.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Reads the calling thread's current `errno`.
    pub fn last() -> Self {
        Self(unsafe { *libc::__errno_location() })
    }

    /// The raw error number.
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

/// Conversion of a typed error back into an errno value, used by FFI entry
/// points that report errors as C `int` codes.
pub trait ToErrno {
    /// Converts this error into a raw errno value.
    fn to_errno(self) -> i32;
}

impl ToErrno for Errno {
    fn to_errno(self) -> i32 {
        self.0
    }
}

/// Folds a raw syscall return value into a `Result`.
///
/// Returns the (non-negative) syscall result on success and the thread's
/// `errno` on failure.
pub fn check(ret: c_long) -> Result<c_long> {
    if ret < 0 { Err(Errno::last()) } else { Ok(ret) }
}
