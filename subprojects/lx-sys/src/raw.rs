//! Raw syscall API.
//!
//! Every function here is a direct syscall invocation. Return values are the
//! raw kernel results (`-1` with `errno` set on failure); decoding lives in
//! [`result`](crate::result) and the typed modules.

use libc::{c_int, c_long, pid_t, timespec};

/// A kernel thread id, as returned by `gettid(2)`.
///
/// Alias for `pid_t`.
pub type Tid = pid_t;

/// `futex(2)` multiplexed syscall.
///
/// | Arg | Name | Description |
/// | --- | --- | --- |
/// | IN | _uaddr_ | Futex word. Must be 4-byte aligned. |
/// | IN | _op_ | One of the `libc::FUTEX_*` operations, optionally or-ed with `FUTEX_PRIVATE_FLAG`. |
/// | IN | _val_ | Operation-dependent value (expected word value, wake count, ...). |
/// | IN | _timeout_ | Relative timeout for wait operations, or the move count for requeue operations (passed in the same register). |
/// | IN | _uaddr2_ | Second futex word for requeue operations, otherwise null. |
/// | IN | _val3_ | Third operation-dependent value. |
///
/// # Safety
///
/// `uaddr` (and `uaddr2` for requeue operations) must point to 4-byte
/// aligned memory that is mapped in the caller's address space for the whole
/// duration of the call. For wait operations the word must stay mapped until
/// the thread has been woken or requeued.
pub unsafe fn futex(
    uaddr: *const u32,
    op: c_int,
    val: u32,
    timeout: *const timespec,
    uaddr2: *const u32,
    val3: u32,
) -> c_long {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            uaddr,
            op,
            val,
            timeout,
            uaddr2,
            val3,
        )
    }
}

/// `clock_gettime(2)`.
///
/// # Safety
///
/// `ts` must point to writable memory for one `timespec`.
pub unsafe fn clock_gettime(clock: libc::clockid_t, ts: *mut timespec) -> c_int {
    unsafe { libc::clock_gettime(clock, ts) }
}

/// `gettid(2)`. Always succeeds.
pub fn gettid() -> Tid {
    // The raw syscall is used instead of `libc::gettid` so the function
    // works against pre-2.30 glibc as well.
    unsafe { libc::syscall(libc::SYS_gettid) as Tid }
}

/// `tgkill(2)` targeted at a thread of the current process.
///
/// Returns the raw syscall result.
pub fn tgkill_current_process(tid: Tid, sig: c_int) -> c_long {
    unsafe { libc::syscall(libc::SYS_tgkill, libc::getpid(), tid, sig) }
}
