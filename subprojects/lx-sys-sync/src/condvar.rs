//! # Condition variable
//!
//! A POSIX-style condition variable over the futex. Waiters are represented
//! by nodes with automatic storage on the waiting thread, linked into a
//! doubly-linked list hanging off the condvar; waking detaches a batch of
//! nodes from the old end of the list and hands each woken waiter the job
//! of moving one more batch member onto the mutex, so a broadcast issues a
//! single kernel wake instead of a thundering herd.
//!
//! Two locking regimes protect a node over its life:
//!
//! - while attached, the list (and the node's links) are mutated only under
//!   the condvar's internal [`SsdLock`];
//! - once a waking thread has detached a batch, the batch is owned by
//!   whoever holds the associated mutex, and each node additionally carries
//!   a barrier lock, born held, that keeps its waiter from touching the
//!   batch before the waking thread is done with it.
//!
//! No thread may access a node after its owning thread returns from the
//! wait; the wake/unwait hand-off below exists to enforce exactly that.
//! The list pointers are non-owning; the borrow a blocked waiter holds on
//! the condvar is what keeps the condvar itself immovable while nodes are
//! attached.
//!
//! Process-shared condvars cannot see other processes' stacks, so they skip
//! the list entirely and run a sequence-counter protocol on the `seq` word.

use core::{
    cell::UnsafeCell,
    ptr,
    sync::atomic::{
        AtomicBool, AtomicI32, AtomicPtr, AtomicU32,
        Ordering::{Relaxed, SeqCst},
    },
    time::Duration,
};

use lx_sys::{
    clock::{self, ClockId, Timespec},
    futex,
    result::{Errno, ToErrno},
};
use lx_sys_thread::{cancel, current_tid};

use crate::{
    mutex::{LockError, Mutex},
    ssd::SsdLock,
};

/// Attached and eligible for a wake.
const WAITING: u32 = 0;
/// Claimed by a waking thread; the node is on a detached batch.
const SIGNALED: u32 = 1;
/// The waiter is removing itself after a timeout or cancellation.
const LEAVING: u32 = 2;

/// Old `waiters` value seen by the leaving waiter that must wake a
/// destroyer blocked on the counter (process-shared teardown handshake).
const DESTROY_SENTINEL: i32 = -0x7fff_ffff;

/// Per-wait node. Lives on the waiting thread's stack for the duration of
/// one wait call.
struct Waiter {
    prev: UnsafeCell<*mut Waiter>,
    next: UnsafeCell<*mut Waiter>,
    /// State machine word; also the futex word the private-case waiter
    /// sleeps on.
    state: AtomicU32,
    /// Born held; released by the waking thread once it is done mutating
    /// the batch.
    barrier: SsdLock,
    /// Set once a requeue has moved this waiter onto the mutex, so the
    /// extra waiter-count increment can be undone.
    requeued: AtomicBool,
    /// Installed by a waking thread that caught this node LEAVING; the
    /// waiter decrements it exactly once before proceeding past removal.
    notify: AtomicPtr<AtomicI32>,
}

impl Waiter {
    fn new() -> Self {
        Self {
            prev: UnsafeCell::new(ptr::null_mut()),
            next: UnsafeCell::new(ptr::null_mut()),
            state: AtomicU32::new(WAITING),
            barrier: SsdLock::new_held(),
            requeued: AtomicBool::new(false),
            notify: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// A condition variable.
///
/// Pairs with [`Mutex`]: all concurrent waiters of one condvar must use the
/// same mutex. Waits are subject to spurious wake-ups; callers re-test
/// their predicate in a loop.
// NOTE: repr(C) so FFI callers can allocate and initialise it in place.
#[repr(C)]
pub struct Condvar {
    /// Protects `head`/`tail` and attached nodes' links.
    lock: SsdLock,
    /// Wake sequence; the futex word in the process-shared case.
    seq: AtomicU32,
    /// Attached-waiter count, process-shared case only. Negative only
    /// during the teardown handshake.
    waiters: AtomicI32,
    /// Newest attached waiter (private case).
    head: UnsafeCell<*mut Waiter>,
    /// Oldest attached waiter (private case).
    tail: UnsafeCell<*mut Waiter>,
    clock: ClockId,
    shared: bool,
}

// SAFETY: the raw list pointers are only dereferenced under `lock` while
// the nodes are attached, and under the associated mutex plus the per-node
// barrier once detached; the protocol in `timed_wait`/`wake`/`Unwait`
// guarantees a node outlives every foreign access.
unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Condvar {
    /// Creates a condvar measuring deadlines against the realtime clock.
    pub const fn new() -> Self {
        Self::with_clock(ClockId::Realtime)
    }

    /// Creates a condvar measuring deadlines against `clock`.
    pub const fn with_clock(clock: ClockId) -> Self {
        Self::init(clock, false)
    }

    /// Creates a process-shared condvar.
    ///
    /// Usable across processes through shared memory, paired with a
    /// [`MutexType::PROCESS_SHARED`](crate::MutexType::PROCESS_SHARED)
    /// mutex.
    pub const fn process_shared(clock: ClockId) -> Self {
        Self::init(clock, true)
    }

    const fn init(clock: ClockId, shared: bool) -> Self {
        Self {
            lock: SsdLock::new(),
            seq: AtomicU32::new(0),
            waiters: AtomicI32::new(0),
            head: UnsafeCell::new(ptr::null_mut()),
            tail: UnsafeCell::new(ptr::null_mut()),
            clock,
            shared,
        }
    }

    /// Waits until woken.
    ///
    /// The caller must hold `mutex`; it holds it again when this returns,
    /// whatever the outcome.
    pub fn wait(&self, mutex: &Mutex) -> Result<(), WaitError> {
        self.timed_wait(mutex, None)
    }

    /// Waits until woken or until `deadline` passes on this condvar's
    /// clock.
    pub fn wait_until(&self, mutex: &Mutex, deadline: Timespec) -> Result<(), WaitError> {
        self.timed_wait(mutex, Some(deadline))
    }

    /// Waits until woken or until `timeout` has elapsed.
    pub fn wait_for(&self, mutex: &Mutex, timeout: Duration) -> Result<(), WaitError> {
        let deadline = clock::now(self.clock).saturating_add(timeout);
        self.timed_wait(mutex, Some(deadline))
    }

    /// Wakes at most one waiter.
    pub fn signal(&self) {
        self.wake(1);
    }

    /// Wakes every current waiter, oldest first.
    pub fn broadcast(&self) {
        self.wake(-1);
    }

    /// Wakes up to `count` waiters; `count <= 0` wakes all of them.
    pub fn wake(&self, count: i32) {
        let count = if count <= 0 { i32::MAX } else { count };
        if self.shared {
            if self.waiters.load(SeqCst) == 0 {
                return;
            }
            self.seq.fetch_add(1, SeqCst);
            let _ = unsafe { futex::wake(self.seq.as_ptr(), count, false) };
            return;
        }
        self.wake_attached(count);
    }

    fn timed_wait(&self, mutex: &Mutex, deadline: Option<Timespec>) -> Result<(), WaitError> {
        if mutex.tracks_ownership() && !mutex.owned_by(current_tid()) {
            return Err(WaitError::PermissionDenied);
        }
        if let Some(at) = deadline {
            if !at.nanos_in_range() {
                return Err(WaitError::InvalidDeadline);
            }
        }
        // Cancellation point. Failing here leaves the mutex held and the
        // condvar untouched.
        if cancel::test().is_err() {
            return Err(WaitError::Canceled);
        }

        let node = Waiter::new();
        let fut: &AtomicU32;
        let expected: u32;
        if self.shared {
            fut = &self.seq;
            expected = self.seq.load(SeqCst);
            self.waiters.fetch_add(1, SeqCst);
        } else {
            fut = &node.state;
            expected = WAITING;
            let node_ptr = &node as *const Waiter as *mut Waiter;
            self.lock.lock();
            // New nodes go in at the head; the tail stays the oldest.
            // SAFETY: list mutation under the condvar lock.
            unsafe {
                let head = *self.head.get();
                *node.next.get() = head;
                if head.is_null() {
                    *self.tail.get() = node_ptr;
                } else {
                    *(*head).prev.get() = node_ptr;
                }
                *self.head.get() = node_ptr;
            }
            self.lock.unlock();
        }

        let _ = mutex.unlock();

        // From here on the node may be reachable by other threads; the
        // guard makes sure `unwait` runs exactly once on every exit path,
        // including an unwind through this frame.
        let mut cleanup = Unwait {
            cv: self,
            mutex,
            node: &node,
            seq: expected,
            armed: true,
        };

        let mut status = Ok(());
        loop {
            if fut.load(SeqCst) != expected {
                break;
            }
            let res = unsafe {
                futex::wait_until(fut.as_ptr(), expected, self.clock, deadline, !self.shared)
            };
            match res {
                // Woken, or never slept because the word moved on; the
                // re-check at the top of the loop decides. Plain wake-ups
                // with an unchanged word are spurious and retried.
                Ok(()) | Err(futex::WaitError::ValueMismatch) => {}
                Err(futex::WaitError::Interrupted) => {
                    if cancel::pending() {
                        status = Err(WaitError::Canceled);
                        break;
                    }
                }
                Err(futex::WaitError::TimedOut) => {
                    status = Err(WaitError::TimedOut);
                    break;
                }
                Err(futex::WaitError::Unknown(errno)) => {
                    status = Err(WaitError::Unknown(errno));
                    break;
                }
            }
        }

        cleanup.armed = false;
        cleanup.unwait(status)
    }

    /// Private-case wake: claims up to `n` of the oldest attached waiters,
    /// detaches them as one batch and starts the hand-off.
    fn wake_attached(&self, mut n: i32) {
        // Waiters caught mid-departure decrement this before proceeding;
        // the batch must not be released to anyone until they are gone.
        let quiesce = AtomicI32::new(0);
        let quiesce_ptr = &quiesce as *const AtomicI32 as *mut AtomicI32;

        // Oldest successfully claimed node; the terminal end of the batch.
        let mut oldest: *mut Waiter = ptr::null_mut();

        self.lock.lock();
        // SAFETY: list traversal and the split below happen under the
        // condvar lock; claimed nodes cannot advance past their barrier.
        unsafe {
            let mut p = *self.tail.get();
            while n != 0 && !p.is_null() {
                if (*p)
                    .state
                    .compare_exchange(WAITING, SIGNALED, SeqCst, SeqCst)
                    .is_ok()
                {
                    n -= 1;
                    if oldest.is_null() {
                        oldest = p;
                    }
                } else {
                    // Already LEAVING. It unlinks itself; it must be
                    // counted and waited for, or it could still be
                    // splicing batch links when the batch is handed over.
                    quiesce.fetch_add(1, SeqCst);
                    (*p).notify.store(quiesce_ptr, SeqCst);
                }
                p = *(*p).prev.get();
            }
            // Split: everything examined leaves with the batch, the
            // remainder keeps the list.
            if !p.is_null() {
                let boundary = *(*p).next.get();
                if !boundary.is_null() {
                    *(*boundary).prev.get() = ptr::null_mut();
                }
                *(*p).next.get() = ptr::null_mut();
            } else {
                *self.head.get() = ptr::null_mut();
            }
            *self.tail.get() = p;
        }
        self.lock.unlock();

        // Quiescence point: wait out every waiter caught LEAVING above.
        loop {
            let cur = quiesce.load(SeqCst);
            if cur == 0 {
                break;
            }
            let _ =
                unsafe { futex::wait(quiesce.as_ptr() as *const u32, cur as u32, true) };
        }

        if oldest.is_null() {
            return;
        }

        // Release the batch. Only the terminal (oldest) node gets a kernel
        // wake; the others reach the mutex via the requeue hand-off in
        // unwait. Each node's links are read before its barrier is
        // dropped, because the barrier is the last thing keeping its
        // owner from unlinking it.
        // SAFETY: every remaining batch node is SIGNALED and its owner is
        // blocked on the barrier before touching the list.
        unsafe {
            let mut p = oldest;
            while !(*p).prev.get().read().is_null() {
                p = *(*p).prev.get();
            }
            while !p.is_null() {
                let next = *(*p).next.get();
                if next.is_null() {
                    let _ = futex::wake((*p).state.as_ptr(), 1, true);
                }
                (*p).barrier.unlock();
                p = next;
            }
        }
    }

    #[cfg(test)]
    fn attached_waiters(&self) -> usize {
        self.lock.lock();
        let mut count = 0;
        unsafe {
            let mut p = *self.tail.get();
            while !p.is_null() {
                count += 1;
                p = *(*p).prev.get();
            }
        }
        self.lock.unlock();
        count
    }

    #[cfg(test)]
    fn single_attached(&self) -> bool {
        self.lock.lock();
        let (head, tail) = unsafe { (*self.head.get(), *self.tail.get()) };
        self.lock.unlock();
        head == tail && !head.is_null()
    }
}

/// The cleanup half of a wait: removal, mutex reacquisition and the
/// requeue hand-off.
///
/// Runs exactly once per wait, either as the tail of the normal return
/// path or, through `Drop`, when an unwind passes the wait frame.
struct Unwait<'a> {
    cv: &'a Condvar,
    mutex: &'a Mutex,
    node: &'a Waiter,
    /// Expected futex value captured at enqueue (the wake sequence in the
    /// process-shared case).
    seq: u32,
    armed: bool,
}

impl Drop for Unwait<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.unwait(Ok(()));
        }
    }
}

impl Unwait<'_> {
    /// Detaches the node, reacquires the caller's mutex and merges the
    /// mutex outcome into the wait outcome. Mutex errors win: the caller
    /// must learn the state of the mutex above all else.
    fn unwait(&mut self, wait_status: Result<(), WaitError>) -> Result<(), WaitError> {
        let cv = self.cv;
        let mutex = self.mutex;
        let node = self.node;
        let node_ptr = node as *const Waiter as *mut Waiter;
        let mut status = wait_status;

        if cv.shared {
            // A wake that advanced the sequence may have been consumed by
            // this very thread; cancelling now could lose it.
            if status == Err(WaitError::Canceled) && cv.seq.load(SeqCst) != self.seq {
                status = Ok(());
            }
            if cv.waiters.fetch_sub(1, SeqCst) == DESTROY_SENTINEL {
                let _ =
                    unsafe { futex::wake(cv.waiters.as_ptr() as *const u32, 1, false) };
            }
            return match mutex.lock() {
                Ok(()) => status,
                Err(LockError::OwnerDied) => Err(WaitError::OwnerDied),
                Err(_) => deadlock_thread(),
            };
        }

        let claimed = node
            .state
            .compare_exchange(WAITING, LEAVING, SeqCst, SeqCst)
            .is_err();

        if !claimed {
            // Still attached: remove ourselves. A concurrent wake that has
            // already observed LEAVING is parked on the notify handshake
            // and will not hand the batch over before the splice below is
            // done.
            cv.lock.lock();
            // SAFETY: unlink under the condvar lock. head/tail only need
            // fixing while the node is on the attached list; on a detached
            // batch neither matches and the splice alone is correct.
            unsafe {
                let prev = *node.prev.get();
                let next = *node.next.get();
                if *cv.head.get() == node_ptr {
                    *cv.head.get() = next;
                } else if !prev.is_null() {
                    *(*prev).next.get() = next;
                }
                if *cv.tail.get() == node_ptr {
                    *cv.tail.get() = prev;
                } else if !next.is_null() {
                    *(*next).prev.get() = prev;
                }
            }
            cv.lock.unlock();

            let notify = node.notify.load(SeqCst);
            if !notify.is_null() {
                // SAFETY: the waking thread keeps the counter alive until
                // it reads zero, which cannot happen before this
                // decrement.
                unsafe {
                    if (*notify).fetch_sub(1, SeqCst) == 1 {
                        let _ = futex::wake((*notify).as_ptr() as *const u32, 1, true);
                    }
                }
            }
        }

        match mutex.lock() {
            Ok(()) => {}
            Err(LockError::OwnerDied) => status = Err(WaitError::OwnerDied),
            // The mutex is all that protects the detached batch. Running
            // on without it would let this frame's node be spliced by
            // threads whose view of the list no longer exists.
            Err(_) => deadlock_thread(),
        }

        if !claimed {
            return status;
        }

        // Claimed by a waking thread: the node sits on a detached batch,
        // now owned through the mutex. Cycling the barrier makes sure the
        // waking thread is done mutating the batch.
        node.barrier.lock();
        node.barrier.unlock();

        if node.requeued.load(Relaxed) {
            // The requeue moved this thread onto the mutex word and
            // counted it as a mutex waiter; the lock() above counted it
            // again.
            mutex.sub_waiter();
        }

        // SAFETY: batch links are stable under the mutex.
        unsafe {
            self.requeue_next(node_ptr);

            let prev = *node.prev.get();
            let next = *node.next.get();
            if !prev.is_null() {
                *(*prev).next.get() = next;
            }
            if !next.is_null() {
                *(*next).prev.get() = prev;
            }
        }

        // A consumed wake precludes cancellation.
        if status == Err(WaitError::Canceled) {
            status = Ok(());
        }

        status
    }

    /// Hands the wake on: picks the next batch member that has not been
    /// requeued yet and moves it from its state word onto the mutex, so it
    /// is woken at mutex-release time instead of contending now.
    ///
    /// # Safety
    ///
    /// Caller holds the mutex that owns the batch `node` is on.
    unsafe fn requeue_next(&self, node: *mut Waiter) {
        let mutex = self.mutex;
        unsafe {
            let mut p = node;
            while !(*p).next.get().read().is_null() {
                p = *(*p).next.get();
            }
            while !p.is_null() && (p == node || (*p).requeued.load(Relaxed)) {
                p = *(*p).prev.get();
            }
            if p.is_null() {
                return;
            }
            (*p).requeued.store(true, Relaxed);
            mutex.add_waiter();
            let state_ptr = (*p).state.as_ptr();
            if mutex.is_process_shared() {
                // The kernel applies the private flag to both words of a
                // requeue, and these sleepers parked privately; moving
                // them onto a shared word would strand them. Wake instead.
                let _ = futex::wake(state_ptr, 1, true);
            } else if futex::requeue(state_ptr, 0, 1, mutex.lock_word(), true).is_err() {
                let _ = futex::wake(state_ptr, 1, true);
            }
        }
    }
}

/// Parks the calling thread forever on a lock word nothing ever releases.
///
/// Reached only when the caller's mutex cannot be reacquired after a wait:
/// at that point the detached batch has no protector and any further step
/// could corrupt other threads' stacks.
fn deadlock_thread() -> ! {
    let gate = SsdLock::new();
    gate.lock();
    loop {
        gate.lock();
    }
}

/// Error type for the wait operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The calling thread does not own the mutex (ownership-tracking
    /// mutex types only).
    #[error("calling thread does not own the mutex")]
    PermissionDenied,
    /// The deadline's nanosecond field is out of range.
    #[error("malformed deadline")]
    InvalidDeadline,
    /// The deadline passed before a wake arrived.
    #[error("wait timed out")]
    TimedOut,
    /// Propagated from mutex reacquisition; the mutex is held and the
    /// caller is expected to recover the protected state.
    #[error("previous owner of the mutex died")]
    OwnerDied,
    /// The wait was cancelled before a wake was consumed. The mutex is
    /// held.
    #[error("wait canceled")]
    Canceled,
    /// An unknown error occurred.
    #[error("unknown error: {0}")]
    Unknown(Errno),
}

impl ToErrno for WaitError {
    fn to_errno(self) -> i32 {
        match self {
            WaitError::PermissionDenied => libc::EPERM,
            WaitError::InvalidDeadline => libc::EINVAL,
            WaitError::TimedOut => libc::ETIMEDOUT,
            WaitError::OwnerDied => libc::EOWNERDEAD,
            WaitError::Canceled => libc::ECANCELED,
            WaitError::Unknown(errno) => errno.to_errno(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Mutex as StdMutex, mpsc},
        thread,
        time::Duration,
        vec::Vec,
    };

    use lx_sys_thread::cancel;

    use super::*;
    use crate::mutex::MutexType;

    /// Spins until `cond` holds, failing the test after five seconds.
    fn wait_for_condition(mut cond: impl FnMut() -> bool) {
        for _ in 0..5000 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached within five seconds");
    }

    /// Generous per-wait backstop so a broken wake path fails fast instead
    /// of hanging the suite.
    const BACKSTOP: Duration = Duration::from_secs(5);

    #[test]
    fn signal_wakes_a_single_waiter() {
        let cv = Condvar::new();
        let m = Mutex::new();
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                m.lock().unwrap();
                let r = cv.wait_for(&m, Duration::from_secs(1));
                assert!(m.owned_by(current_tid()));
                m.unlock().unwrap();
                r
            });
            wait_for_condition(|| cv.attached_waiters() == 1);
            cv.signal();
            assert_eq!(waiter.join().unwrap(), Ok(()));
        });
        assert_eq!(cv.attached_waiters(), 0);
        assert_eq!(m.waiter_count(), 0);
    }

    #[test]
    fn broadcast_wakes_in_fifo_order() {
        let cv = Condvar::new();
        let m = Mutex::new();
        let order = StdMutex::new(Vec::new());
        let (cv, m, order) = (&cv, &m, &order);
        thread::scope(|s| {
            for i in 0..3usize {
                s.spawn(move || {
                    m.lock().unwrap();
                    cv.wait_for(&m, BACKSTOP).unwrap();
                    order.lock().unwrap().push(i);
                    m.unlock().unwrap();
                });
                // Serialise enqueue order.
                wait_for_condition(|| cv.attached_waiters() == i + 1);
            }
            // Give the waiters time to actually park on their futex words.
            thread::sleep(Duration::from_millis(30));
            cv.broadcast();
        });
        assert_eq!(*order.lock().unwrap(), [0, 1, 2]);
        assert_eq!(cv.attached_waiters(), 0);
        assert_eq!(m.waiter_count(), 0);
    }

    #[test]
    fn timeout_leaves_an_empty_list() {
        let cv = Condvar::new();
        let m = Mutex::new();
        m.lock().unwrap();
        let started = clock::now(ClockId::Monotonic);
        let r = cv.wait_for(&m, Duration::from_millis(10));
        let elapsed = clock::now(ClockId::Monotonic).checked_sub(started).unwrap();
        m.unlock().unwrap();
        assert_eq!(r, Err(WaitError::TimedOut));
        assert!(elapsed.sec > 0 || elapsed.nsec >= 10_000_000);
        assert_eq!(cv.attached_waiters(), 0);
    }

    #[test]
    fn monotonic_clock_waits_time_out_too() {
        let cv = Condvar::with_clock(ClockId::Monotonic);
        let m = Mutex::new();
        m.lock().unwrap();
        let deadline = clock::now(ClockId::Monotonic).saturating_add(Duration::from_millis(10));
        let r = cv.wait_until(&m, deadline);
        m.unlock().unwrap();
        assert_eq!(r, Err(WaitError::TimedOut));
    }

    #[test]
    fn malformed_deadline_is_rejected() {
        let cv = Condvar::new();
        let m = Mutex::new();
        m.lock().unwrap();
        let r = cv.wait_until(&m, Timespec::new(1, 2_000_000_000));
        m.unlock().unwrap();
        assert_eq!(r, Err(WaitError::InvalidDeadline));
        assert_eq!(cv.attached_waiters(), 0);
    }

    #[test]
    fn wait_without_owning_an_errorcheck_mutex_is_denied() {
        let cv = Condvar::new();
        let m = Mutex::with_type(MutexType::ERRORCHECK);
        assert_eq!(cv.wait_for(&m, BACKSTOP), Err(WaitError::PermissionDenied));
    }

    #[test]
    fn cancel_vs_signal_race_resolves_cleanly() {
        for _ in 0..50 {
            let cv = Condvar::new();
            let m = Mutex::new();
            let (tx, rx) = mpsc::channel();
            thread::scope(|s| {
                let waiter = s.spawn(|| {
                    tx.send(cancel::handle()).unwrap();
                    m.lock().unwrap();
                    let r = cv.wait_for(&m, BACKSTOP);
                    // The mutex is held on every return path.
                    assert!(m.owned_by(current_tid()));
                    m.unlock().unwrap();
                    r
                });
                let handle = rx.recv().unwrap();
                wait_for_condition(|| cv.attached_waiters() == 1);
                let canceller = s.spawn(move || handle.cancel());
                cv.signal();
                canceller.join().unwrap();
                let r = waiter.join().unwrap();
                // Exactly one of: the signal was consumed, or the wait was
                // cancelled. A timeout would mean a wake was lost.
                assert!(
                    matches!(r, Ok(()) | Err(WaitError::Canceled)),
                    "unexpected outcome: {r:?}"
                );
            });
            assert_eq!(cv.attached_waiters(), 0);
            assert_eq!(m.waiter_count(), 0);
        }
    }

    #[test]
    fn signal_already_consumed_suppresses_cancellation() {
        let cv = Condvar::new();
        let m = Mutex::new();
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                tx.send(cancel::handle()).unwrap();
                m.lock().unwrap();
                let r = cv.wait_for(&m, BACKSTOP);
                m.unlock().unwrap();
                r
            });
            let handle = rx.recv().unwrap();
            wait_for_condition(|| cv.attached_waiters() == 1);
            thread::sleep(Duration::from_millis(20));
            // The wake claims the waiter before the cancel lands; the
            // waiter must complete normally rather than lose it.
            cv.signal();
            handle.cancel();
            assert_eq!(waiter.join().unwrap(), Ok(()));
        });
    }

    #[test]
    fn wake_two_of_three_leaves_the_youngest() {
        let cv = Condvar::new();
        let m = Mutex::new();
        let order = StdMutex::new(Vec::new());
        let (cv, m, order) = (&cv, &m, &order);
        thread::scope(|s| {
            for i in 0..3usize {
                s.spawn(move || {
                    m.lock().unwrap();
                    cv.wait_for(&m, BACKSTOP).unwrap();
                    order.lock().unwrap().push(i);
                    m.unlock().unwrap();
                });
                wait_for_condition(|| cv.attached_waiters() == i + 1);
            }
            thread::sleep(Duration::from_millis(30));
            cv.wake(2);
            wait_for_condition(|| order.lock().unwrap().len() == 2);
            // Oldest two woken, in order; the youngest is still attached
            // and is now both ends of the list.
            assert_eq!(*order.lock().unwrap(), [0, 1]);
            assert_eq!(cv.attached_waiters(), 1);
            assert!(cv.single_attached());
            cv.broadcast();
        });
        assert_eq!(*order.lock().unwrap(), [0, 1, 2]);
        assert_eq!(cv.attached_waiters(), 0);
    }

    #[test]
    fn broadcast_handoff_restores_mutex_waiter_accounting() {
        let cv = Condvar::new();
        let m = Mutex::new();
        let order = StdMutex::new(Vec::new());
        let (cv, m, order) = (&cv, &m, &order);
        thread::scope(|s| {
            for i in 0..4usize {
                s.spawn(move || {
                    m.lock().unwrap();
                    cv.wait_for(&m, BACKSTOP).unwrap();
                    order.lock().unwrap().push(i);
                    m.unlock().unwrap();
                });
                wait_for_condition(|| cv.attached_waiters() == i + 1);
            }
            thread::sleep(Duration::from_millis(30));
            // Broadcast while holding the mutex: every waiter must fold
            // into the mutex queue and come out exactly once as it is
            // released, oldest first.
            m.lock().unwrap();
            cv.broadcast();
            m.unlock().unwrap();
        });
        assert_eq!(*order.lock().unwrap(), [0, 1, 2, 3]);
        assert_eq!(cv.attached_waiters(), 0);
        assert_eq!(m.waiter_count(), 0);
    }

    #[test]
    fn signal_wakes_at_most_one() {
        let cv = Condvar::new();
        let m = Mutex::new();
        let woken = StdMutex::new(0usize);
        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    m.lock().unwrap();
                    cv.wait_for(&m, BACKSTOP).unwrap();
                    *woken.lock().unwrap() += 1;
                    m.unlock().unwrap();
                });
            }
            wait_for_condition(|| cv.attached_waiters() == 2);
            thread::sleep(Duration::from_millis(30));
            cv.signal();
            wait_for_condition(|| *woken.lock().unwrap() == 1);
            // The second waiter stays put.
            thread::sleep(Duration::from_millis(50));
            assert_eq!(*woken.lock().unwrap(), 1);
            assert_eq!(cv.attached_waiters(), 1);
            cv.broadcast();
        });
        assert_eq!(*woken.lock().unwrap(), 2);
    }

    #[test]
    fn process_shared_pair_signals_across_threads() {
        let cv = Condvar::process_shared(ClockId::Realtime);
        let m = Mutex::with_type(MutexType::PROCESS_SHARED);
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                m.lock().unwrap();
                let r = cv.wait_for(&m, BACKSTOP);
                m.unlock().unwrap();
                r
            });
            thread::sleep(Duration::from_millis(30));
            cv.signal();
            assert_eq!(waiter.join().unwrap(), Ok(()));
        });
        // The attached-waiter counter must be back to zero.
        assert_eq!(cv.waiters.load(SeqCst), 0);
    }

    #[test]
    fn process_shared_timeout_decrements_the_counter() {
        let cv = Condvar::process_shared(ClockId::Realtime);
        let m = Mutex::with_type(MutexType::PROCESS_SHARED);
        m.lock().unwrap();
        let r = cv.wait_for(&m, Duration::from_millis(10));
        m.unlock().unwrap();
        assert_eq!(r, Err(WaitError::TimedOut));
        assert_eq!(cv.waiters.load(SeqCst), 0);
    }

    #[test]
    fn pending_cancellation_fails_before_enqueue() {
        let cv = Condvar::new();
        let m = Mutex::new();
        let outcome = thread::scope(|s| {
            s.spawn(|| {
                let h = cancel::handle();
                h.cancel();
                m.lock().unwrap();
                let r = cv.wait_for(&m, BACKSTOP);
                m.unlock().unwrap();
                (r, cv.attached_waiters())
            })
            .join()
            .unwrap()
        });
        assert_eq!(outcome, (Err(WaitError::Canceled), 0));
    }
}
