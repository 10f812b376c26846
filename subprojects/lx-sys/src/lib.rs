//! # lx-sys
//!
//! The raw Linux syscall surface consumed by the synchronisation crates:
//! the futex family (wait, wake, requeue), clock reads and the minimal
//! thread syscalls (`gettid`, `tgkill`).
//!
//! The [`raw`] module issues the syscalls and reports the raw return value;
//! the typed modules ([`futex`], [`clock`], [`thread`]) decode errno into
//! one error enum per operation.
//!
//! # References
//!
//! - [futex(2)](https://man7.org/linux/man-pages/man2/futex.2.html)
//! - [clock_gettime(2)](https://man7.org/linux/man-pages/man2/clock_gettime.2.html)
//! - [tgkill(2)](https://man7.org/linux/man-pages/man2/tgkill.2.html)

#![no_std]

#[cfg(test)]
extern crate std;

pub mod clock;
pub mod futex;
pub mod raw;
pub mod result;
pub mod thread;
