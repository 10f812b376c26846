//! # Mutex
//!
//! A futex-backed mutex. The lock word holds the owner's kernel thread id
//! with the high bit marking contention, so an unlocking thread knows
//! whether a wake is needed; a separate waiter counter covers the window in
//! which a sleeper has announced itself but not yet marked the word. This
//! is the same shape as a Horizon-style owner-handle lock word with a wait
//! mask, with the kernel arbitration calls replaced by futex wait/wake.
//!
//! The condition variable consumes a few internals beyond the lock/unlock
//! surface: the lock word address (as a requeue target), the waiter
//! counter, the owner check and the process-shared bit.

use core::{
    cell::UnsafeCell,
    sync::atomic::{
        AtomicI32, AtomicU32,
        Ordering::{Acquire, Relaxed, SeqCst},
    },
};

use bitflags::bitflags;

use lx_sys::{futex, result::ToErrno, thread::Tid};
use lx_sys_thread::current_tid;

/// Bitmask for the contention flag in the lock word.
///
/// When set, at least one thread has gone to sleep on the word and the
/// releasing swap must be followed by a wake. Thread ids never reach this
/// bit.
pub(crate) const CONTENDED_BIT: u32 = 0x8000_0000;

/// Mask extracting the owner thread id from the lock word.
const OWNER_MASK: u32 = !CONTENDED_BIT;

bitflags! {
    /// Mutex behaviour flags.
    ///
    /// The empty set is a plain mutex: relocking deadlocks, unlock by a
    /// non-owner is not diagnosed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MutexType: u32 {
        /// Relocking by the owner and unlocking by a non-owner report
        /// errors instead of deadlocking or corrupting state.
        const ERRORCHECK = 0x01;
        /// Relocking by the owner nests; the mutex is released when the
        /// lock count returns to zero.
        const RECURSIVE = 0x02;
        /// The lock word is shared between processes; futex operations on
        /// it must not use the private fast path.
        const PROCESS_SHARED = 0x80;
    }
}

/// A mutual exclusion primitive with owner tracking.
// NOTE: repr(C) so FFI callers can allocate and initialise it in place.
#[repr(C)]
pub struct Mutex {
    /// 0 when free, otherwise owner tid possibly or-ed with
    /// [`CONTENDED_BIT`]. Doubles as the futex word and as the requeue
    /// target for signalled condvar waiters.
    lock: AtomicU32,
    /// Threads currently committed to sleeping on `lock`, plus requeued
    /// condvar waiters parked on it.
    waiters: AtomicI32,
    ty: MutexType,
    /// Recursion depth. Only ever touched by the owning thread.
    count: UnsafeCell<u32>,
}

// SAFETY: `count` is only accessed by the thread that holds the lock.
unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    /// Creates a plain mutex.
    pub const fn new() -> Self {
        Self::with_type(MutexType::empty())
    }

    /// Creates a mutex with the given behaviour flags.
    pub const fn with_type(ty: MutexType) -> Self {
        Self {
            lock: AtomicU32::new(0),
            waiters: AtomicI32::new(0),
            ty,
            count: UnsafeCell::new(0),
        }
    }

    /// Acquires the mutex, sleeping while another thread owns it.
    pub fn lock(&self) -> Result<(), LockError> {
        loop {
            match self.try_lock() {
                Ok(()) => return Ok(()),
                Err(TryLockError::WouldDeadlock) => return Err(LockError::WouldDeadlock),
                Err(TryLockError::WouldBlock) => {}
            }

            let cur = self.lock.load(SeqCst);
            if cur == 0 {
                continue;
            }
            let marked = cur | CONTENDED_BIT;
            self.waiters.fetch_add(1, SeqCst);
            if cur != marked {
                let _ = self.lock.compare_exchange(cur, marked, SeqCst, SeqCst);
            }
            // Sleeps only if the word still carries the marked value; a
            // release in between falls through to the retry above.
            let _ = unsafe { futex::wait(self.lock.as_ptr(), marked, self.futex_private()) };
            self.waiters.fetch_sub(1, SeqCst);
        }
    }

    /// Attempts to acquire the mutex without blocking.
    pub fn try_lock(&self) -> Result<(), TryLockError> {
        let tid = current_tid() as u32;
        match self.lock.compare_exchange(0, tid, Acquire, Relaxed) {
            Ok(_) => {
                if self.ty.contains(MutexType::RECURSIVE) {
                    // SAFETY: we just became the owner.
                    unsafe { *self.count.get() = 1 };
                }
                Ok(())
            }
            Err(cur) if cur & OWNER_MASK == tid => {
                if self.ty.contains(MutexType::RECURSIVE) {
                    // SAFETY: the calling thread is the owner.
                    unsafe { *self.count.get() += 1 };
                    Ok(())
                } else if self.ty.contains(MutexType::ERRORCHECK) {
                    Err(TryLockError::WouldDeadlock)
                } else {
                    Err(TryLockError::WouldBlock)
                }
            }
            Err(_) => Err(TryLockError::WouldBlock),
        }
    }

    /// Releases the mutex, waking one sleeper if any thread is parked on
    /// the lock word.
    pub fn unlock(&self) -> Result<(), UnlockError> {
        let tid = current_tid() as u32;
        if self.tracks_ownership() && self.lock.load(Relaxed) & OWNER_MASK != tid {
            return Err(UnlockError::NotOwner);
        }
        if self.ty.contains(MutexType::RECURSIVE) {
            // SAFETY: the calling thread is the owner (checked above).
            let count = unsafe { &mut *self.count.get() };
            if *count > 1 {
                *count -= 1;
                return Ok(());
            }
            *count = 0;
        }
        // The waiter count is read before the releasing swap: a thread that
        // announces itself afterwards also marks the word, and the swapped
        // value's contention bit covers it.
        let waiters = self.waiters.load(SeqCst);
        let old = self.lock.swap(0, SeqCst);
        if waiters > 0 || old & CONTENDED_BIT != 0 {
            let _ = unsafe { futex::wake(self.lock.as_ptr(), 1, self.futex_private()) };
        }
        Ok(())
    }

    /// Whether lock/unlock mismatches are diagnosable for this mutex.
    pub(crate) fn tracks_ownership(&self) -> bool {
        self.ty
            .intersects(MutexType::ERRORCHECK | MutexType::RECURSIVE)
    }

    /// Whether `tid` currently owns the mutex.
    pub(crate) fn owned_by(&self, tid: Tid) -> bool {
        self.lock.load(Relaxed) & OWNER_MASK == tid as u32
    }

    /// Whether the lock word may be visible to other processes.
    pub(crate) fn is_process_shared(&self) -> bool {
        self.ty.contains(MutexType::PROCESS_SHARED)
    }

    fn futex_private(&self) -> bool {
        !self.is_process_shared()
    }

    /// The futex word address, used as the target of condvar requeues.
    pub(crate) fn lock_word(&self) -> *const u32 {
        self.lock.as_ptr()
    }

    /// Announces a thread parked on the lock word without going through
    /// [`lock`](Self::lock) — a requeued condvar waiter.
    pub(crate) fn add_waiter(&self) {
        self.waiters.fetch_add(1, SeqCst);
    }

    /// Undoes [`add_waiter`](Self::add_waiter) once the requeued thread has
    /// left the lock word.
    pub(crate) fn sub_waiter(&self) {
        self.waiters.fetch_sub(1, SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> i32 {
        self.waiters.load(SeqCst)
    }
}

/// Error type for [`Mutex::lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The calling thread already owns this error-checking mutex.
    #[error("relocking would deadlock")]
    WouldDeadlock,
    /// The previous owner died while holding the lock. The caller owns the
    /// mutex and is expected to make the protected state consistent.
    ///
    /// Part of the robust-mutex interface; this implementation plumbs the
    /// value through but never produces it itself.
    #[error("previous owner died while holding the lock")]
    OwnerDied,
}

impl ToErrno for LockError {
    fn to_errno(self) -> i32 {
        match self {
            LockError::WouldDeadlock => libc::EDEADLK,
            LockError::OwnerDied => libc::EOWNERDEAD,
        }
    }
}

/// Error type for [`Mutex::try_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryLockError {
    /// Another thread owns the mutex.
    #[error("mutex is busy")]
    WouldBlock,
    /// The calling thread already owns this error-checking mutex.
    #[error("relocking would deadlock")]
    WouldDeadlock,
}

impl ToErrno for TryLockError {
    fn to_errno(self) -> i32 {
        match self {
            TryLockError::WouldBlock => libc::EBUSY,
            TryLockError::WouldDeadlock => libc::EDEADLK,
        }
    }
}

/// Error type for [`Mutex::unlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UnlockError {
    /// The calling thread does not own the mutex.
    #[error("calling thread does not own the mutex")]
    NotOwner,
}

impl ToErrno for UnlockError {
    fn to_errno(self) -> i32 {
        match self {
            UnlockError::NotOwner => libc::EPERM,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use static_assertions::const_assert_eq;

    use super::*;

    // Lock word, waiter counter, type word, recursion counter.
    const_assert_eq!(core::mem::size_of::<Mutex>(), 4 * core::mem::size_of::<u32>());

    #[test]
    fn provides_mutual_exclusion() {
        struct Shared {
            mutex: Mutex,
            counter: UnsafeCell<u64>,
        }
        // SAFETY: `counter` is only touched while `mutex` is held.
        unsafe impl Sync for Shared {}

        let shared = Shared {
            mutex: Mutex::new(),
            counter: UnsafeCell::new(0),
        };
        thread::scope(|s| {
            for _ in 0..4 {
                let shared = &shared;
                s.spawn(move || {
                    for _ in 0..10_000 {
                        shared.mutex.lock().unwrap();
                        unsafe { *shared.counter.get() += 1 };
                        shared.mutex.unlock().unwrap();
                    }
                });
            }
        });
        assert_eq!(shared.counter.into_inner(), 40_000);
        assert_eq!(shared.mutex.waiter_count(), 0);
    }

    #[test]
    fn try_lock_reports_busy() {
        let mutex = Mutex::new();
        mutex.lock().unwrap();
        thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(mutex.try_lock(), Err(TryLockError::WouldBlock));
            });
        });
        mutex.unlock().unwrap();
        assert_eq!(mutex.try_lock(), Ok(()));
        mutex.unlock().unwrap();
    }

    #[test]
    fn errorcheck_diagnoses_relock_and_foreign_unlock() {
        let mutex = Mutex::with_type(MutexType::ERRORCHECK);
        mutex.lock().unwrap();
        assert_eq!(mutex.lock(), Err(LockError::WouldDeadlock));
        thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(mutex.unlock(), Err(UnlockError::NotOwner));
            });
        });
        mutex.unlock().unwrap();
    }

    #[test]
    fn recursive_lock_nests() {
        let mutex = Mutex::with_type(MutexType::RECURSIVE);
        mutex.lock().unwrap();
        mutex.lock().unwrap();
        mutex.unlock().unwrap();
        // Still held after one unlock.
        thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(mutex.try_lock(), Err(TryLockError::WouldBlock));
            });
        });
        mutex.unlock().unwrap();
        assert_eq!(mutex.try_lock(), Ok(()));
        mutex.unlock().unwrap();
    }

    #[test]
    fn contended_lock_parks_and_wakes() {
        let mutex = Mutex::new();
        mutex.lock().unwrap();
        thread::scope(|s| {
            let contender = s.spawn(|| {
                mutex.lock().unwrap();
                mutex.unlock().unwrap();
            });
            thread::sleep(Duration::from_millis(20));
            assert!(!contender.is_finished());
            mutex.unlock().unwrap();
        });
        assert_eq!(mutex.waiter_count(), 0);
    }
}
