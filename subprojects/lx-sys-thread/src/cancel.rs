//! Cooperative cancellation.
//!
//! Cancellation is deferred: a cancelling thread raises a per-target flag
//! and kicks the target with a signal, and the target observes the flag at
//! its next cancellation point. Blocking primitives cooperate by calling
//! [`test`] before committing to a wait and by treating an `EINTR` return
//! with [`pending`] set as a cancellation.
//!
//! The kick signal's handler is installed without `SA_RESTART`, which is
//! what turns an in-flight futex wait into an `EINTR` return. The handler
//! itself does nothing; all state lives in the flag.
//!
//! The kick is inherently best-effort: a signal that lands in the window
//! between the target's flag check and its entry into the kernel is
//! consumed without effect, and the cancellation is then observed at the
//! next wake-up (timeout, signal or spurious). Callers that need bounded
//! delivery combine cancellation with a deadline.

use std::sync::{
    Arc, Once,
    atomic::{AtomicBool, Ordering::SeqCst},
};

use libc::c_int;

use lx_sys::thread::{Tid, kill_thread};

use crate::current_tid;

/// Signal used to kick a cancellation target out of a blocking syscall.
///
/// `SIGURG` is ignored by default, so delivering it to a thread that is not
/// blocked in a cancellation-aware wait has no observable effect.
const KICK_SIGNAL: c_int = libc::SIGURG;

static INSTALL_HANDLER: Once = Once::new();

extern "C" fn kick_handler(_sig: c_int) {}

fn install_handler() {
    INSTALL_HANDLER.call_once(|| unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = kick_handler as extern "C" fn(c_int) as usize;
        // No SA_RESTART: the whole point is that interrupted waits return
        // EINTR instead of being transparently resumed.
        sa.sa_flags = 0;
        libc::sigemptyset(&mut sa.sa_mask);
        let rc = libc::sigaction(KICK_SIGNAL, &sa, std::ptr::null_mut());
        debug_assert_eq!(rc, 0);
    });
}

std::thread_local! {
    static CANCEL_FLAG: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

/// The error produced at a cancellation point once cancellation is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation canceled")]
pub struct Canceled;

/// A handle through which another thread can cancel the thread that
/// created it.
#[derive(Clone)]
pub struct CancelHandle {
    tid: Tid,
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Requests cancellation of the owning thread.
    ///
    /// Raises the thread's cancellation flag and kicks it in case it is
    /// currently blocked. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, SeqCst);
        // ESRCH just means the target already exited; nothing to deliver.
        let _ = kill_thread(self.tid, KICK_SIGNAL);
    }
}

/// Creates a cancellation handle for the calling thread.
///
/// Installs the process-wide kick handler on first use.
pub fn handle() -> CancelHandle {
    install_handler();
    CancelHandle {
        tid: current_tid(),
        flag: CANCEL_FLAG.with(Arc::clone),
    }
}

/// Whether cancellation of the calling thread is pending.
pub fn pending() -> bool {
    CANCEL_FLAG.with(|flag| flag.load(SeqCst))
}

/// Cancellation point: fails with [`Canceled`] once cancellation is
/// pending.
pub fn test() -> Result<(), Canceled> {
    if pending() { Err(Canceled) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn fresh_threads_are_not_pending() {
        assert!(!thread::spawn(pending).join().unwrap());
    }

    #[test]
    fn cancel_is_observed_at_the_next_test() {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let target = thread::spawn(move || {
            handle_tx.send(handle()).unwrap();
            go_rx.recv().unwrap();
            test()
        });
        let handle: CancelHandle = handle_rx.recv().unwrap();
        handle.cancel();
        go_tx.send(()).unwrap();
        assert_eq!(target.join().unwrap(), Err(Canceled));
    }

    #[test]
    fn kick_interrupts_a_blocked_futex_wait() {
        use core::sync::atomic::AtomicU32;

        let (handle_tx, handle_rx) = mpsc::channel();
        let target = thread::spawn(move || {
            handle_tx.send(handle()).unwrap();
            let word = AtomicU32::new(0);
            loop {
                if pending() {
                    return true;
                }
                let deadline = lx_sys::clock::now(lx_sys::clock::ClockId::Monotonic)
                    .saturating_add(Duration::from_secs(5));
                match unsafe {
                    lx_sys::futex::wait_until(
                        word.as_ptr(),
                        0,
                        lx_sys::clock::ClockId::Monotonic,
                        Some(deadline),
                        true,
                    )
                } {
                    Err(lx_sys::futex::WaitError::TimedOut) => return false,
                    _ => continue,
                }
            }
        });
        let handle: CancelHandle = handle_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        handle.cancel();
        assert!(target.join().unwrap(), "cancellation was not observed");
    }
}
