//! # Time Types
//!
//! Monotonic time for the scheduling kernel. The kernel itself never reads a
//! clock; an execution engine advances a [`Timestamp`] explicitly (virtual
//! time) or samples a platform source and converts. Keeping the types here
//! means every tie-break and sleep deadline is expressed in one unit space.

use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Nanoseconds since an arbitrary epoch (typically "scheduler start").
pub type Nanoseconds = u64;

// =============================================================================
// TIMESTAMP
// =============================================================================

/// A point on the kernel's monotonic timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    nanos: Nanoseconds,
}

impl Timestamp {
    /// The origin of the timeline.
    pub const ZERO: Timestamp = Timestamp { nanos: 0 };

    /// Create from nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Create from microseconds.
    pub const fn from_micros(micros: u64) -> Self {
        Self {
            nanos: micros * 1_000,
        }
    }

    /// Create from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    /// Create from seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            nanos: secs * 1_000_000_000,
        }
    }

    /// Get nanoseconds.
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Get microseconds.
    pub const fn as_micros(&self) -> u64 {
        self.nanos / 1_000
    }

    /// Get milliseconds.
    pub const fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Elapsed time since an earlier timestamp (saturating at zero).
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration {
            nanos: self.nanos.saturating_sub(earlier.nanos),
        }
    }

    /// The later of two timestamps.
    pub fn max(self, other: Timestamp) -> Timestamp {
        if self.nanos >= other.nanos { self } else { other }
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp {
            nanos: self.nanos.saturating_add(rhs.nanos),
        }
    }
}

impl AddAssign<Duration> for Timestamp {
    fn add_assign(&mut self, rhs: Duration) {
        self.nanos = self.nanos.saturating_add(rhs.nanos);
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        self.duration_since(rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t+{}us", self.as_micros())
    }
}

// =============================================================================
// DURATION
// =============================================================================

/// A span on the kernel's timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    nanos: Nanoseconds,
}

impl Duration {
    /// The empty span.
    pub const ZERO: Duration = Duration { nanos: 0 };

    /// Create from nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Create from microseconds.
    pub const fn from_micros(micros: u64) -> Self {
        Self {
            nanos: micros * 1_000,
        }
    }

    /// Create from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    /// Create from seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            nanos: secs * 1_000_000_000,
        }
    }

    /// Get nanoseconds.
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Get milliseconds.
    pub const fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Whether the span is empty.
    pub const fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Subtraction saturating at zero.
    pub fn saturating_sub(self, rhs: Duration) -> Duration {
        Duration {
            nanos: self.nanos.saturating_sub(rhs.nanos),
        }
    }
}

impl Sub<Duration> for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.nanos / 1_000)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversions() {
        let ts = Timestamp::from_millis(150);
        assert_eq!(ts.as_nanos(), 150_000_000);
        assert_eq!(ts.as_micros(), 150_000);
        assert_eq!(ts.as_millis(), 150);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let start = Timestamp::from_millis(100);
        let later = start + Duration::from_millis(50);
        assert_eq!(later.as_millis(), 150);
        assert_eq!(later.duration_since(start), Duration::from_millis(50));

        // Saturates instead of wrapping backwards
        assert_eq!(start.duration_since(later), Duration::ZERO);
        assert_eq!(later - start, Duration::from_millis(50));
    }

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp::from_micros(10);
        let b = Timestamp::from_micros(20);
        assert!(a < b);
        assert_eq!(a.max(b), b);
        assert_eq!(b.max(a), b);
    }

    #[test]
    fn test_duration_saturating_sub() {
        let a = Duration::from_millis(10);
        let b = Duration::from_millis(30);
        assert_eq!(b - a, Duration::from_millis(20));
        assert_eq!(a - b, Duration::ZERO);
        assert!(Duration::ZERO.is_zero());
    }
}
