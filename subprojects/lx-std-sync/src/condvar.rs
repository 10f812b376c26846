//! # Condition variable

use core::time::Duration;

use lx_sys_sync::{self as sys, WaitError};

use crate::mutex::MutexGuard;

/// A type indicating whether a timed wait on a condition variable returned
/// due to a time out or not.
///
/// It is returned by the [`wait_timeout`] method.
///
/// [`wait_timeout`]: Condvar::wait_timeout
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct WaitTimeoutResult(bool);

impl WaitTimeoutResult {
    /// Returns `true` if the wait was known to have timed out.
    pub fn timed_out(&self) -> bool {
        self.0
    }
}

/// A condition variable.
///
/// Condition variables represent the ability to block a thread such that
/// it consumes no CPU time while waiting for an event to occur. They are
/// typically associated with a boolean predicate (a condition) and a
/// mutex; the predicate is always re-verified inside the mutex before
/// determining that a thread must block, because wake-ups can be spurious.
///
/// All concurrent waiters of one `Condvar` must wait through guards of the
/// same [`Mutex`](crate::Mutex).
pub struct Condvar {
    inner: sys::Condvar,
}

impl Condvar {
    /// Creates a new condition variable ready to be waited on and
    /// notified.
    pub const fn new() -> Self {
        Self {
            inner: sys::Condvar::new(),
        }
    }

    /// Blocks the current thread until this condition variable receives a
    /// notification.
    ///
    /// The mutex behind `guard` is atomically released and re-acquired
    /// before this call returns. Spurious wakeups are permitted; callers
    /// loop on their predicate.
    pub fn wait<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let res = self.inner.wait(guard.mutex().raw());
        // At this layer every non-fatal outcome, including a cancellation
        // kick, surfaces as a spurious wake-up: the mutex is held again
        // and the caller's predicate loop decides.
        debug_assert!(!matches!(res, Err(WaitError::PermissionDenied)));
        guard
    }

    /// Waits on this condition variable for a notification, timing out
    /// after a specified duration.
    ///
    /// The semantics of this function are equivalent to [`wait`] except
    /// that the thread will be blocked for roughly no longer than `dur`.
    ///
    /// [`wait`]: Self::wait
    pub fn wait_timeout<'a, T: ?Sized>(
        &self,
        guard: MutexGuard<'a, T>,
        dur: Duration,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        let res = self.inner.wait_for(guard.mutex().raw(), dur);
        let timed_out = matches!(res, Err(WaitError::TimedOut));
        (guard, WaitTimeoutResult(timed_out))
    }

    /// Blocks the current thread until the provided condition becomes
    /// false, re-checking it on every wake-up.
    pub fn wait_while<'a, T, F>(&self, mut guard: MutexGuard<'a, T>, mut condition: F) -> MutexGuard<'a, T>
    where
        T: ?Sized,
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Wakes up one blocked thread on this condvar.
    ///
    /// Calls to `notify_one` are not buffered in any way: if no thread is
    /// waiting, the notification is lost.
    ///
    /// To wake up all threads, see [`notify_all`].
    ///
    /// [`notify_all`]: Self::notify_all
    pub fn notify_one(&self) {
        self.inner.signal();
    }

    /// Wakes up all blocked threads on this condvar, oldest waiter first.
    pub fn notify_all(&self) {
        self.inner.broadcast();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, thread, time::Duration};

    use crate::Mutex;

    use super::*;

    #[test]
    fn predicate_loop_sees_the_notification() {
        let ready = Mutex::new(false);
        let cv = Condvar::new();
        thread::scope(|s| {
            let consumer = s.spawn(|| {
                let mut guard = ready.lock();
                while !*guard {
                    guard = cv.wait(guard);
                }
            });
            thread::sleep(Duration::from_millis(20));
            *ready.lock() = true;
            cv.notify_one();
            consumer.join().unwrap();
        });
        assert!(*ready.lock());
    }

    #[test]
    fn wait_timeout_expires_without_notification() {
        let flag = Mutex::new(false);
        let cv = Condvar::new();
        let guard = flag.lock();
        let (guard, result) = cv.wait_timeout(guard, Duration::from_millis(10));
        assert!(result.timed_out());
        assert!(!*guard);
    }

    #[test]
    fn producer_consumer_queue_drains() {
        let queue = Mutex::new(VecDeque::new());
        let cv = Condvar::new();
        let mut received = Vec::new();
        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..100 {
                    queue.lock().push_back(i);
                    cv.notify_one();
                }
            });
            let mut guard = queue.lock();
            while received.len() < 100 {
                guard = cv.wait_while(guard, |q| q.is_empty());
                while let Some(v) = guard.pop_front() {
                    received.push(v);
                }
            }
        });
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn notify_all_releases_every_waiter() {
        let gate = Mutex::new(false);
        let cv = Condvar::new();
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let guard = gate.lock();
                    let _guard = cv.wait_while(guard, |open| !*open);
                });
            }
            thread::sleep(Duration::from_millis(30));
            *gate.lock() = true;
            cv.notify_all();
        });
    }
}
