//! Typed futex operations.
//!
//! The futex word is always a 4-byte aligned `u32` in the caller's address
//! space. Operations on words private to the calling process pass
//! `FUTEX_PRIVATE_FLAG` so the kernel can skip the cross-process hash;
//! waits, wakes and requeues on one word must agree on the flag or they will
//! not observe each other.
//!
//! # References
//!
//! - [futex(2)](https://man7.org/linux/man-pages/man2/futex.2.html)
//! - Ulrich Drepper, *Futexes Are Tricky*

use core::ptr;

use libc::c_int;

use crate::{
    clock::{self, ClockId, Timespec},
    raw,
    result::{Errno, ToErrno, check},
};

fn op(base: c_int, private: bool) -> c_int {
    if private { base | libc::FUTEX_PRIVATE_FLAG } else { base }
}

/// Blocks until the word at `addr` is woken, as long as it still holds
/// `expected` when the kernel examines it.
///
/// | Arg | Name | Description |
/// | --- | --- | --- |
/// | IN | _addr_ | Futex word to sleep on. |
/// | IN | _expected_ | Value the word must still hold for the thread to be put to sleep. |
/// | IN | _private_ | Whether the word is private to this process. |
///
/// Returns `Ok(())` when woken. A wake-up carries no payload; callers must
/// re-examine the word, and spurious returns are possible.
///
/// # Safety
///
/// `addr` must point to a 4-byte aligned `u32` that stays mapped until this
/// thread has been woken or requeued away from it.
pub unsafe fn wait(addr: *const u32, expected: u32, private: bool) -> Result<(), WaitError> {
    unsafe { wait_until(addr, expected, ClockId::Monotonic, None, private) }
}

/// Blocks on the word at `addr` until woken or until `deadline` passes on
/// `clock`.
///
/// | Arg | Name | Description |
/// | --- | --- | --- |
/// | IN | _addr_ | Futex word to sleep on. |
/// | IN | _expected_ | Value the word must still hold for the thread to be put to sleep. |
/// | IN | _clock_ | Clock the deadline is measured against. |
/// | IN | _deadline_ | Absolute deadline, or `None` to wait indefinitely. |
/// | IN | _private_ | Whether the word is private to this process. |
///
/// The deadline is converted to an interval against `clock` immediately
/// before sleeping; a deadline that has already passed reports
/// [`WaitError::TimedOut`] without entering the kernel.
///
/// # Safety
///
/// Same contract as [`wait`].
pub unsafe fn wait_until(
    addr: *const u32,
    expected: u32,
    clock: ClockId,
    deadline: Option<Timespec>,
    private: bool,
) -> Result<(), WaitError> {
    let rel;
    let timeout: *const libc::timespec = match deadline {
        None => ptr::null(),
        Some(at) => {
            let Some(remaining) = at.checked_sub(clock::now(clock)) else {
                return Err(WaitError::TimedOut);
            };
            rel = remaining.to_raw();
            &rel
        }
    };

    let ret = unsafe {
        raw::futex(
            addr,
            op(libc::FUTEX_WAIT, private),
            expected,
            timeout,
            ptr::null(),
            0,
        )
    };
    check(ret).map(drop).map_err(|errno| match errno.raw() {
        libc::EAGAIN => WaitError::ValueMismatch,
        libc::EINTR => WaitError::Interrupted,
        libc::ETIMEDOUT => WaitError::TimedOut,
        _ => WaitError::Unknown(errno),
    })
}

/// Error type for [`wait`] and [`wait_until`].
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// The word did not hold the expected value; the thread was not put to
    /// sleep.
    #[error("futex word changed before sleeping")]
    ValueMismatch,
    /// The wait was interrupted by a signal.
    #[error("interrupted by a signal")]
    Interrupted,
    /// The deadline passed before a wake arrived.
    #[error("wait timed out")]
    TimedOut,
    /// An unknown error occurred.
    #[error("unknown error: {0}")]
    Unknown(Errno),
}

impl ToErrno for WaitError {
    fn to_errno(self) -> i32 {
        match self {
            WaitError::ValueMismatch => libc::EAGAIN,
            WaitError::Interrupted => libc::EINTR,
            WaitError::TimedOut => libc::ETIMEDOUT,
            WaitError::Unknown(errno) => errno.to_errno(),
        }
    }
}

/// Wakes up to `count` threads sleeping on the word at `addr`.
///
/// `count <= 0` wakes all of them. Returns the number of threads actually
/// woken.
///
/// # Safety
///
/// `addr` must point to a 4-byte aligned `u32` mapped in this process. The
/// word's contents are not examined; waking a word that no longer backs a
/// futex is harmless beyond a possible spurious wake-up of an unrelated
/// waiter.
pub unsafe fn wake(addr: *const u32, count: i32, private: bool) -> Result<u32, Errno> {
    let count = if count <= 0 { i32::MAX } else { count };
    let ret = unsafe {
        raw::futex(
            addr,
            op(libc::FUTEX_WAKE, private),
            count as u32,
            ptr::null(),
            ptr::null(),
            0,
        )
    };
    check(ret).map(|woken| woken as u32)
}

/// Wakes `wake_count` threads sleeping on `addr` and moves up to
/// `move_count` further sleepers onto the word at `target` without waking
/// them.
///
/// | Arg | Name | Description |
/// | --- | --- | --- |
/// | IN | _addr_ | Word the sleepers are currently parked on. |
/// | IN | _wake_count_ | Threads to wake outright. |
/// | IN | _move_count_ | Threads to transplant onto `target`. |
/// | IN | _target_ | Destination futex word. |
/// | IN | _private_ | Whether **both** words are private to this process. |
///
/// Returns the number of threads woken. The kernel applies the private flag
/// to both words, so a requeue from a private word onto a process-shared
/// one is rejected; callers fall back to a plain [`wake`] in that case.
///
/// # Safety
///
/// `addr` and `target` must point to 4-byte aligned `u32`s mapped in this
/// process; `target` must stay mapped until the transplanted threads have
/// been woken from it.
pub unsafe fn requeue(
    addr: *const u32,
    wake_count: u32,
    move_count: u32,
    target: *const u32,
    private: bool,
) -> Result<u32, RequeueError> {
    let ret = unsafe {
        raw::futex(
            addr,
            op(libc::FUTEX_REQUEUE, private),
            wake_count,
            move_count as usize as *const libc::timespec,
            target,
            0,
        )
    };
    check(ret)
        .map(|woken| woken as u32)
        .map_err(|errno| match errno.raw() {
            libc::EINVAL => RequeueError::Rejected,
            _ => RequeueError::Unknown(errno),
        })
}

/// Error type for [`requeue`].
#[derive(Debug, thiserror::Error)]
pub enum RequeueError {
    /// The kernel refused the requeue (misaligned words, or a requeue
    /// across the private/shared boundary).
    #[error("requeue rejected")]
    Rejected,
    /// An unknown error occurred.
    #[error("unknown error: {0}")]
    Unknown(Errno),
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering::SeqCst};
    use std::{sync::Arc, thread, time::Duration};

    use super::*;
    use crate::clock;

    #[test]
    fn wait_reports_value_mismatch() {
        let word = AtomicU32::new(1);
        let res = unsafe { wait(word.as_ptr(), 0, true) };
        assert!(matches!(res, Err(WaitError::ValueMismatch)));
    }

    #[test]
    fn wait_until_honours_the_deadline() {
        let word = AtomicU32::new(0);
        let deadline =
            clock::now(ClockId::Monotonic).saturating_add(Duration::from_millis(20));
        let res =
            unsafe { wait_until(word.as_ptr(), 0, ClockId::Monotonic, Some(deadline), true) };
        assert!(matches!(res, Err(WaitError::TimedOut)));
        assert!(clock::now(ClockId::Monotonic).checked_sub(deadline).is_some());
    }

    #[test]
    fn wait_until_rejects_elapsed_deadlines_without_sleeping() {
        let word = AtomicU32::new(0);
        let past = Timespec::new(0, 0);
        let res = unsafe { wait_until(word.as_ptr(), 0, ClockId::Monotonic, Some(past), true) };
        assert!(matches!(res, Err(WaitError::TimedOut)));
    }

    #[test]
    fn wake_rouses_a_sleeping_thread() {
        let word = Arc::new(AtomicU32::new(0));
        let sleeper = {
            let word = Arc::clone(&word);
            thread::spawn(move || unsafe { wait(word.as_ptr(), 0, true) })
        };
        thread::sleep(Duration::from_millis(50));
        word.store(1, SeqCst);
        let woken = unsafe { wake(word.as_ptr(), 1, true) }.unwrap();
        assert!(woken <= 1);
        // Either the sleeper was parked and got the wake, or it lost the
        // race with the store and never slept at all.
        match sleeper.join().unwrap() {
            Ok(()) | Err(WaitError::ValueMismatch) => {}
            other => panic!("unexpected wait outcome: {other:?}"),
        }
    }
}
