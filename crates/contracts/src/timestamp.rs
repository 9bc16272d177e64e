//! Timestamp - a point on the capture clock
//!
//! Driver buffer timestamps arrive as `timeval`s on the kernel's clock, so
//! the engine cannot use `std::time::Instant` (which has no public
//! constructor from raw seconds). A `Timestamp` is the offset from the
//! clock's epoch instead.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

use nix::time::{clock_gettime, ClockId};
use serde::{Deserialize, Serialize};

/// Point in time on the capture clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// Clock epoch.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Create a timestamp from an offset since the clock epoch.
    #[inline]
    pub const fn from_duration(since_epoch: Duration) -> Self {
        Self(since_epoch)
    }

    /// Create a timestamp from `timeval`-style seconds and microseconds.
    #[inline]
    pub fn from_timeval(sec: i64, usec: i64) -> Self {
        let secs = Duration::from_secs(sec.max(0) as u64);
        let micros = Duration::from_micros(usec.max(0) as u64);
        Self(secs + micros)
    }

    /// Create a timestamp from milliseconds since the epoch.
    #[inline]
    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    /// Read CLOCK_MONOTONIC, the clock V4L2 stamps buffers with.
    ///
    /// Falls back to the epoch if the clock cannot be read, which only
    /// happens on kernels without a monotonic clock.
    pub fn monotonic() -> Self {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => Self(Duration::new(
                ts.tv_sec().max(0) as u64,
                ts.tv_nsec().clamp(0, 999_999_999) as u32,
            )),
            Err(_) => Self::ZERO,
        }
    }

    /// Offset since the clock epoch.
    #[inline]
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[inline]
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// Absolute distance between two timestamps.
    #[inline]
    pub fn abs_diff(&self, other: Timestamp) -> Duration {
        if self.0 >= other.0 {
            self.0 - other.0
        } else {
            other.0 - self.0
        }
    }

    /// Move the timestamp back by `offset`, clamping at the epoch.
    #[inline]
    pub fn saturating_sub(&self, offset: Duration) -> Timestamp {
        Self(self.0.saturating_sub(offset))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

/// Renders as `seconds.microseconds`, e.g. `12.040000`.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0.as_secs(), self.0.subsec_micros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abs_diff_is_symmetric() {
        let small = Timestamp::from_timeval(0, 40);
        let large = Timestamp::from_timeval(0, 60);

        assert_eq!(small.abs_diff(large), Duration::from_micros(20));
        assert_eq!(large.abs_diff(small), Duration::from_micros(20));
        assert_eq!(large.abs_diff(large), Duration::ZERO);
    }

    #[test]
    fn test_saturating_since() {
        let a = Timestamp::from_millis(100);
        let b = Timestamp::from_millis(140);

        assert_eq!(b.saturating_since(a), Duration::from_millis(40));
        assert_eq!(a.saturating_since(b), Duration::ZERO);
    }

    #[test]
    fn test_sub_clamps_at_epoch() {
        let t = Timestamp::from_millis(10);
        assert_eq!(t - Duration::from_millis(84), Timestamp::ZERO);
        assert_eq!(t - Duration::from_millis(4), Timestamp::from_millis(6));
    }

    #[test]
    fn test_timeval_conversion_carries_usec() {
        let t = Timestamp::from_timeval(2, 1_500_000);
        assert_eq!(t.as_duration(), Duration::from_millis(3500));
    }

    #[test]
    fn test_display() {
        let t = Timestamp::from_timeval(12, 40_000);
        assert_eq!(t.to_string(), "12.040000");
    }

    #[test]
    fn test_monotonic_does_not_go_backwards() {
        let a = Timestamp::monotonic();
        let b = Timestamp::monotonic();
        assert!(b >= a);
    }
}
