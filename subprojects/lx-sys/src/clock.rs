//! Clock reads and the timespec type used for absolute deadlines.

use core::time::Duration;

use crate::raw;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// The clocks a timed wait can be measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ClockId {
    /// Wall-clock time, subject to adjustment.
    Realtime = libc::CLOCK_REALTIME,
    /// Monotonic time since an unspecified starting point.
    Monotonic = libc::CLOCK_MONOTONIC,
}

impl ClockId {
    /// Converts a raw `clockid_t` into a [`ClockId`].
    ///
    /// Returns `None` for clock ids a condition variable cannot be bound to.
    pub const fn from_raw(raw: libc::clockid_t) -> Option<Self> {
        match raw {
            libc::CLOCK_REALTIME => Some(Self::Realtime),
            libc::CLOCK_MONOTONIC => Some(Self::Monotonic),
            _ => None,
        }
    }

    /// The raw `clockid_t` value.
    pub const fn to_raw(self) -> libc::clockid_t {
        self as libc::clockid_t
    }
}

/// A point in time on some clock, or a span between two such points.
///
/// Layout-compatible with the kernel's `timespec` on 64-bit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Timespec {
    /// Whole seconds.
    pub sec: i64,
    /// Nanoseconds. Valid instants keep this in `0..NANOS_PER_SEC`; see
    /// [`nanos_in_range`](Self::nanos_in_range).
    pub nsec: i64,
}

impl Timespec {
    /// Creates a timespec from raw parts.
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Whether the nanosecond field is within `0..NANOS_PER_SEC`.
    ///
    /// Timed waits reject deadlines for which this does not hold.
    pub const fn nanos_in_range(&self) -> bool {
        self.nsec >= 0 && self.nsec < NANOS_PER_SEC
    }

    /// The span from `earlier` to `self`, or `None` if `self` is before
    /// `earlier`.
    pub fn checked_sub(self, earlier: Timespec) -> Option<Timespec> {
        let mut sec = self.sec - earlier.sec;
        let mut nsec = self.nsec - earlier.nsec;
        if nsec < 0 {
            nsec += NANOS_PER_SEC;
            sec -= 1;
        }
        if sec < 0 { None } else { Some(Timespec { sec, nsec }) }
    }

    /// This instant moved `dur` into the future, saturating on overflow.
    pub fn saturating_add(self, dur: Duration) -> Timespec {
        let mut sec = self.sec.saturating_add(dur.as_secs() as i64);
        let mut nsec = self.nsec + i64::from(dur.subsec_nanos());
        if nsec >= NANOS_PER_SEC {
            nsec -= NANOS_PER_SEC;
            sec = sec.saturating_add(1);
        }
        Timespec { sec, nsec }
    }

    /// Conversion to the libc representation.
    pub const fn to_raw(self) -> libc::timespec {
        libc::timespec {
            tv_sec: self.sec,
            tv_nsec: self.nsec,
        }
    }

    /// Conversion from the libc representation.
    pub const fn from_raw(ts: libc::timespec) -> Self {
        Self {
            sec: ts.tv_sec,
            nsec: ts.tv_nsec,
        }
    }
}

/// Reads the current time of `clock`.
pub fn now(clock: ClockId) -> Timespec {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // Cannot fail for the clock ids representable by `ClockId`.
    let rc = unsafe { raw::clock_gettime(clock.to_raw(), &mut ts) };
    debug_assert_eq!(rc, 0);
    Timespec::from_raw(ts)
}

#[cfg(test)]
mod tests {
    use static_assertions::const_assert_eq;

    use super::*;

    // The FFI surface passes `Timespec` and `libc::timespec` interchangeably.
    const_assert_eq!(
        core::mem::size_of::<Timespec>(),
        core::mem::size_of::<libc::timespec>()
    );

    #[test]
    fn checked_sub_handles_nanosecond_borrow() {
        let later = Timespec::new(2, 100);
        let earlier = Timespec::new(1, 200);
        assert_eq!(later.checked_sub(earlier), Some(Timespec::new(0, NANOS_PER_SEC - 100)));
    }

    #[test]
    fn checked_sub_reports_elapsed_deadlines() {
        let deadline = Timespec::new(1, 0);
        let now = Timespec::new(2, 0);
        assert_eq!(deadline.checked_sub(now), None);
    }

    #[test]
    fn saturating_add_carries_into_seconds() {
        let base = Timespec::new(0, NANOS_PER_SEC - 1);
        let bumped = base.saturating_add(Duration::from_nanos(2));
        assert_eq!(bumped, Timespec::new(1, 1));
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = now(ClockId::Monotonic);
        let b = now(ClockId::Monotonic);
        assert!(b.checked_sub(a).is_some());
    }
}
