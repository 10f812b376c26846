//! Thread identity and signalling syscalls.

use libc::c_int;

pub use crate::raw::Tid;
use crate::{
    raw,
    result::{Errno, check},
};

/// The calling thread's kernel thread id.
///
/// Uncached; callers that need the id on a hot path should cache it in
/// thread-local storage.
pub fn gettid() -> Tid {
    raw::gettid()
}

/// Delivers `sig` to a thread of the current process.
///
/// Used to interrupt a thread blocked in a futex wait: a signal whose
/// handler is installed without `SA_RESTART` makes the wait return
/// `EINTR`.
pub fn kill_thread(tid: Tid, sig: c_int) -> Result<(), KillError> {
    check(raw::tgkill_current_process(tid, sig))
        .map(drop)
        .map_err(|errno| match errno.raw() {
            libc::ESRCH => KillError::NoSuchThread,
            _ => KillError::Unknown(errno),
        })
}

/// Error type for [`kill_thread`].
#[derive(Debug, thiserror::Error)]
pub enum KillError {
    /// The thread has already exited.
    #[error("no such thread")]
    NoSuchThread,
    /// An unknown error occurred.
    #[error("unknown error: {0}")]
    Unknown(Errno),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gettid_is_stable_within_a_thread() {
        assert_eq!(gettid(), gettid());
        assert!(gettid() > 0);
    }
}
