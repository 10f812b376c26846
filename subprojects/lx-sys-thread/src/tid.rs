//! Cached kernel thread id.

use std::cell::Cell;

use lx_sys::thread::{self, Tid};

std::thread_local! {
    static CACHED_TID: Cell<Tid> = const { Cell::new(0) };
}

/// The calling thread's kernel thread id.
///
/// The first call per thread issues `gettid(2)`; later calls read the
/// thread-local cache. Thread ids are never 0, so 0 doubles as the
/// "not yet read" marker.
pub fn current_tid() -> Tid {
    CACHED_TID.with(|cell| {
        let tid = cell.get();
        if tid != 0 {
            return tid;
        }
        let tid = thread::gettid();
        cell.set(tid);
        tid
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tids_differ_between_threads() {
        let here = current_tid();
        let there = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn cached_tid_matches_the_syscall() {
        assert_eq!(current_tid(), lx_sys::thread::gettid());
    }
}
