//! # lx-std-sync
//!
//! Standard-library-flavoured wrappers over the `lx-sys-sync` primitives:
//! a [`Mutex`] protecting its data behind an RAII guard, and a [`Condvar`]
//! that operates on guards, so the futex-level wait/wake protocol is
//! exercised through ordinary safe Rust.

mod condvar;
mod mutex;
mod result;

pub use self::{
    condvar::{Condvar, WaitTimeoutResult},
    mutex::{Mutex, MutexGuard},
    result::{TryLockError, TryLockResult},
};
