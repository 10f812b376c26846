//! Self-synchronised-destruction-safe lock.
//!
//! A two-bit spin/futex lock whose release path consists of a single swap
//! plus at most one wake on an address captured beforehand. The releasing
//! thread never re-reads the lock word after the swap, so another thread
//! that observes the lock as free may immediately destroy the memory the
//! word lives in.
//!
//! The condition variable uses this lock in two places where that property
//! is load-bearing: the list lock inside the condvar object (which may be
//! destroyed the moment the last waiter is gone) and the per-waiter barrier
//! word (which lives on a stack frame that is reclaimed when the wait
//! returns).

use core::sync::atomic::{
    AtomicU32,
    Ordering::{Acquire, Relaxed, Release},
};

use lx_sys::futex;

/// The lock is free.
const FREE: u32 = 0;
/// Held, and no waiter has announced itself.
const HELD: u32 = 1;
/// Held, and the releasing swap must issue a wake.
const CONTENDED: u32 = 2;

/// A futex-backed lock safe for self-synchronised destruction.
// NOTE: The in-memory representation must be a bare u32 so the word can
// double as a futex and be embedded in FFI-visible structs.
#[repr(transparent)]
pub struct SsdLock(AtomicU32);

impl SsdLock {
    /// Creates the lock in the free state.
    pub const fn new() -> Self {
        Self(AtomicU32::new(FREE))
    }

    /// Creates the lock already held.
    ///
    /// Used for the per-waiter barrier, which is born locked and released
    /// exactly once by the waking thread.
    pub const fn new_held() -> Self {
        Self(AtomicU32::new(HELD))
    }

    /// Acquires the lock, sleeping on the word while it is contended.
    pub fn lock(&self) {
        if self.0.compare_exchange(FREE, HELD, Acquire, Relaxed).is_ok() {
            return;
        }
        // Force the contended state. The CAS may miss (the holder released
        // in between, or another waiter already forced it); either way the
        // wait below re-examines the word before sleeping.
        let _ = self.0.compare_exchange(HELD, CONTENDED, Relaxed, Relaxed);
        loop {
            // Wake-ups may be spurious or stolen; only the CAS decides.
            let _ = unsafe { futex::wait(self.0.as_ptr(), CONTENDED, true) };
            if self
                .0
                .compare_exchange(FREE, CONTENDED, Acquire, Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Releases the lock.
    ///
    /// The swap is the final access to the lock word. The wake that may
    /// follow targets an address captured before the swap; callers must
    /// keep that address mapped until the wake has been issued, which is
    /// the releasing thread's obligation, not the lock's.
    pub fn unlock(&self) {
        let addr = self.0.as_ptr();
        if self.0.swap(FREE, Release) == CONTENDED {
            let _ = unsafe { futex::wake(addr, 1, true) };
        }
    }
}

impl Default for SsdLock {
    fn default() -> Self {
        Self::new()
    }
}
