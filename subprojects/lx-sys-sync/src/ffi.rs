//! FFI bindings for the `lx-sys-sync` crate.
//!
//! Errors are reported as errno-style `int` codes, `0` meaning success, so
//! the entry points can back a C pthread-like surface directly.

mod condvar;
mod mutex;
