//! # lx-sys-sync
//!
//! POSIX-style synchronisation primitives built on the Linux futex: a
//! mutex with owner tracking and an optional process-shared mode, and a
//! condition variable implementing the timed-wait / wake protocol with a
//! waiter list, FIFO broadcast and waiter-to-mutex requeue hand-off.
//!
//! The condition variable keeps one stack-allocated node per blocked
//! waiter on an intrusive list; see the [`condvar`] module docs for the
//! liveness protocol that makes this sound.
//!
//! # References
//!
//! - [futex(2)](https://man7.org/linux/man-pages/man2/futex.2.html)
//! - [pthread_cond_timedwait(3)](https://man7.org/linux/man-pages/man3/pthread_cond_timedwait.3.html)

#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(feature = "ffi")]
mod ffi;

mod condvar;
mod mutex;
mod ssd;

#[doc(inline)]
pub use self::{
    condvar::{Condvar, WaitError},
    mutex::{LockError, Mutex, MutexType, TryLockError, UnlockError},
    ssd::SsdLock,
};
