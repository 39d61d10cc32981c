//! Logical and physical time
//!
//! Physical time is a nanosecond-resolution reading of the system
//! clock. Logical time is a [`Tag`]: a time point paired with a
//! microstep that orders simultaneous events. Tags are totally
//! ordered lexicographically.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use std::time::Duration;

/// Nanosecond-resolution instant on the system clock.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TimePoint {
    nanos: u64,
}

impl TimePoint {
    /// The earliest representable time point.
    pub const MIN: TimePoint = TimePoint { nanos: 0 };

    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub fn nanos(self) -> u64 {
        self.nanos
    }

    /// Duration since an earlier time point; zero if `earlier` is not
    /// actually earlier.
    pub fn duration_since(self, earlier: TimePoint) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }
}

impl Add<Duration> for TimePoint {
    type Output = TimePoint;

    fn add(self, rhs: Duration) -> TimePoint {
        TimePoint {
            nanos: self.nanos.saturating_add(rhs.as_nanos() as u64),
        }
    }
}

impl Sub<TimePoint> for TimePoint {
    type Output = Duration;

    fn sub(self, rhs: TimePoint) -> Duration {
        self.duration_since(rhs)
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.nanos / 1_000_000_000, self.nanos % 1_000_000_000)
    }
}

/// Read the physical clock.
pub fn get_physical_time() -> TimePoint {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    TimePoint {
        nanos: since_epoch.as_nanos() as u64,
    }
}

/// A logical instant: a time point plus a microstep resolving
/// simultaneous events. Ordering is lexicographic.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Tag {
    time_point: TimePoint,
    microstep: u64,
}

impl Tag {
    pub fn new(time_point: TimePoint, microstep: u64) -> Self {
        Self {
            time_point,
            microstep,
        }
    }

    pub fn from_physical_time(time_point: TimePoint) -> Self {
        Self {
            time_point,
            microstep: 0,
        }
    }

    pub fn from_logical_time(logical: LogicalTime) -> Self {
        Self {
            time_point: logical.time_point,
            microstep: logical.microstep,
        }
    }

    pub fn time_point(self) -> TimePoint {
        self.time_point
    }

    pub fn microstep(self) -> u64 {
        self.microstep
    }

    /// Delay by `offset`. A nonzero offset moves the time point and
    /// resets the microstep; a zero offset advances the microstep.
    pub fn delay(self, offset: Duration) -> Tag {
        if offset.is_zero() {
            Tag {
                time_point: self.time_point,
                microstep: self.microstep + 1,
            }
        } else {
            Tag {
                time_point: self.time_point + offset,
                microstep: 0,
            }
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.time_point, self.microstep)
    }
}

/// The scheduler's current logical time. Only ever advances.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogicalTime {
    time_point: TimePoint,
    microstep: u64,
}

impl LogicalTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_point(self) -> TimePoint {
        self.time_point
    }

    pub fn microstep(self) -> u64 {
        self.microstep
    }

    pub fn as_tag(self) -> Tag {
        Tag::from_logical_time(self)
    }

    /// Advance to `tag`. Logical time never regresses; a violation is
    /// an internal invariant failure.
    pub fn advance_to(&mut self, tag: Tag) {
        debug_assert!(self.as_tag() < tag, "logical time may only advance");
        self.time_point = tag.time_point();
        self.microstep = tag.microstep();
    }
}
