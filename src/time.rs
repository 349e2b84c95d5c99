//! Timekeeping for the DP master
//!
//! All protocol timing is expressed with the two types from this module.  Both have microsecond
//! resolution.  An [`Instant`] is only meaningful relative to other instants from the same clock,
//! which is the clock of the PHY in use (see [`ProfibusPhy::now()`][crate::phy::ProfibusPhy::now]).
use core::ops;

/// A point in time, in microseconds since an arbitrary epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    micros: i64,
}

impl Instant {
    pub const ZERO: Instant = Instant { micros: 0 };

    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self {
            micros: millis * 1000,
        }
    }

    /// Read the monotonic system clock.
    ///
    /// The epoch is the first call of this function within the process.
    pub fn now() -> Self {
        static EPOCH: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
        let epoch = *EPOCH.get_or_init(std::time::Instant::now);
        let elapsed = std::time::Instant::now().duration_since(epoch);
        Self {
            micros: i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX),
        }
    }

    #[inline]
    pub const fn total_micros(self) -> i64 {
        self.micros
    }

    #[inline]
    pub const fn total_millis(self) -> i64 {
        self.micros / 1000
    }
}

/// A span of time, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration {
    micros: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration { micros: 0 };
    pub const MAX: Duration = Duration { micros: u64::MAX };

    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            micros: millis * 1000,
        }
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            micros: secs * 1000000,
        }
    }

    #[inline]
    pub const fn total_micros(self) -> u64 {
        self.micros
    }

    #[inline]
    pub const fn total_millis(self) -> u64 {
        self.micros / 1000
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Duration) -> Duration {
        Duration {
            micros: self.micros.saturating_sub(rhs.micros),
        }
    }
}

impl From<Duration> for core::time::Duration {
    fn from(value: Duration) -> Self {
        core::time::Duration::from_micros(value.micros)
    }
}

impl From<core::time::Duration> for Duration {
    fn from(value: core::time::Duration) -> Self {
        Duration {
            micros: u64::try_from(value.as_micros()).unwrap_or(u64::MAX),
        }
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant {
            micros: self
                .micros
                .saturating_add(i64::try_from(rhs.micros).unwrap_or(i64::MAX)),
        }
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

/// Time elapsed between two instants.  Saturates at zero when `rhs` is later than `self`.
impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration {
            micros: u64::try_from(self.micros.saturating_sub(rhs.micros)).unwrap_or(0),
        }
    }
}

impl ops::Add<Duration> for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration {
            micros: self.micros.saturating_add(rhs.micros),
        }
    }
}

impl ops::AddAssign<Duration> for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl ops::Mul<u32> for Duration {
    type Output = Duration;

    fn mul(self, rhs: u32) -> Duration {
        Duration {
            micros: self.micros.saturating_mul(u64::from(rhs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_arithmetic() {
        let start = Instant::ZERO;
        let later = start + Duration::from_millis(300);
        assert_eq!(later.total_millis(), 300);
        assert_eq!(later - start, Duration::from_micros(300000));
        // Going backwards saturates
        assert_eq!(start - later, Duration::ZERO);
    }

    #[test]
    fn now_is_monotonic() {
        let a = Instant::now();
        let b = Instant::now();
        assert!(b >= a);
    }

    #[test]
    fn std_duration_conversion() {
        let d = Duration::from_millis(12);
        let std_d: core::time::Duration = d.into();
        assert_eq!(std_d.as_micros(), 12000);
        assert_eq!(Duration::from(std_d), d);
    }
}
