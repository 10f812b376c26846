//! FFI bindings for the `lx-sys-sync` crate - Condvar

use core::ffi::c_int;

use lx_sys::{
    clock::{ClockId, Timespec},
    result::ToErrno,
};

use crate::{Condvar, Mutex};

/// Initializes a condition variable in place.
///
/// # Safety
///
/// The caller must ensure that:
/// * `cond` points to memory that can hold a `Condvar`
/// * the memory stays valid and is not moved for the lifetime of the
///   condition variable
///
/// # Parameters
///
/// * `cond`: Pointer to the condition variable to initialise
/// * `clock`: `clockid_t` the timed waits are measured against
/// * `pshared`: Non-zero to create a process-shared condition variable
///
/// # Returns
///
/// * `0` on success
/// * `EINVAL` if the clock cannot back a condition variable
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__cond_init(
    cond: *mut Condvar,
    clock: libc::clockid_t,
    pshared: c_int,
) -> c_int {
    let Some(clock) = ClockId::from_raw(clock) else {
        return libc::EINVAL;
    };
    let cv = if pshared != 0 {
        Condvar::process_shared(clock)
    } else {
        Condvar::with_clock(clock)
    };
    unsafe { cond.write(cv) };
    0
}

/// Waits on a condition variable until woken.
///
/// The mutex is released while waiting and re-acquired before returning,
/// regardless of the outcome.
///
/// # Safety
///
/// The caller must ensure that:
/// * `cond` and `mutex` point to valid initialised objects
/// * the calling thread holds the mutex
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__cond_wait(cond: *const Condvar, mutex: *const Mutex) -> c_int {
    let mutex = unsafe { &*mutex };
    match unsafe { &*cond }.wait(mutex) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

/// Waits on a condition variable until woken or until an absolute deadline
/// passes on the condvar's clock.
///
/// # Safety
///
/// Same contract as [`__lx_sys_sync__cond_wait`]; additionally `deadline`,
/// when non-null, must point to a readable `timespec`.
///
/// # Returns
///
/// * `0` on success
/// * `ETIMEDOUT` if the deadline passed
/// * `EINVAL` if the deadline is malformed
/// * Another errno value on error; the mutex is held in every case
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__cond_timedwait(
    cond: *const Condvar,
    mutex: *const Mutex,
    deadline: *const libc::timespec,
) -> c_int {
    let cond = unsafe { &*cond };
    let mutex = unsafe { &*mutex };
    let res = if deadline.is_null() {
        cond.wait(mutex)
    } else {
        cond.wait_until(mutex, Timespec::from_raw(unsafe { *deadline }))
    };
    match res {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

/// Wakes at most one waiter.
///
/// # Safety
///
/// `cond` must point to a valid initialised condition variable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__cond_signal(cond: *const Condvar) -> c_int {
    unsafe { &*cond }.signal();
    0
}

/// Wakes all current waiters.
///
/// # Safety
///
/// `cond` must point to a valid initialised condition variable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__cond_broadcast(cond: *const Condvar) -> c_int {
    unsafe { &*cond }.broadcast();
    0
}

/// Wakes up to `count` waiters; `count <= 0` wakes all of them.
///
/// # Safety
///
/// `cond` must point to a valid initialised condition variable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__cond_wake(cond: *const Condvar, count: c_int) -> c_int {
    unsafe { &*cond }.wake(count);
    0
}
