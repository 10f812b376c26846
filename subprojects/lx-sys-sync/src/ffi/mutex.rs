//! FFI bindings for the `lx-sys-sync` crate - Mutex

use core::ffi::c_int;

use lx_sys::result::ToErrno;

use crate::{Mutex, MutexType};

/// Initializes a mutex in place.
///
/// # Safety
///
/// The caller must ensure that:
/// * `mutex` points to memory that can hold a `Mutex`
/// * the memory stays valid for the lifetime of the mutex
///
/// # Parameters
///
/// * `mutex`: Pointer to the mutex to initialise
/// * `ty`: Bitwise-or of `MutexType` flags
///
/// # Returns
///
/// * `0` on success
/// * `EINVAL` for unknown or conflicting flags
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__mutex_init(mutex: *mut Mutex, ty: u32) -> c_int {
    let Some(ty) = MutexType::from_bits(ty) else {
        return libc::EINVAL;
    };
    if ty.contains(MutexType::ERRORCHECK | MutexType::RECURSIVE) {
        return libc::EINVAL;
    }
    unsafe { mutex.write(Mutex::with_type(ty)) };
    0
}

/// Acquires a mutex, blocking until it is available.
///
/// # Safety
///
/// `mutex` must point to a valid initialised mutex.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__mutex_lock(mutex: *const Mutex) -> c_int {
    match unsafe { &*mutex }.lock() {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

/// Attempts to acquire a mutex without blocking.
///
/// # Safety
///
/// `mutex` must point to a valid initialised mutex.
///
/// # Returns
///
/// * `0` on success
/// * `EBUSY` if another thread owns the mutex
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__mutex_trylock(mutex: *const Mutex) -> c_int {
    match unsafe { &*mutex }.try_lock() {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

/// Releases a mutex.
///
/// # Safety
///
/// `mutex` must point to a valid initialised mutex owned by the calling
/// thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __lx_sys_sync__mutex_unlock(mutex: *const Mutex) -> c_int {
    match unsafe { &*mutex }.unlock() {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}
