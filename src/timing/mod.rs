//! Media clock for video presentation timestamps
//!
//! Timestamps are rational: elapsed ticks over a fixed clock rate. Video uses
//! the RTP 90 kHz rate.

use std::fmt;
use std::time::{Duration, Instant};

/// RTP clock rate for video
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// A presentation timestamp expressed as `ticks / clock_rate` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediaTime {
    pub ticks: u64,
    pub clock_rate: u32,
}

impl MediaTime {
    pub fn from_duration(elapsed: Duration, clock_rate: u32) -> Self {
        let ticks = elapsed.as_nanos() * u128::from(clock_rate) / 1_000_000_000;
        Self {
            ticks: ticks as u64,
            clock_rate,
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.ticks as f64 / f64::from(self.clock_rate)
    }

    /// Time elapsed since an earlier timestamp on the same clock, or `None`
    /// if `earlier` is not strictly before `self`
    pub fn checked_since(&self, earlier: MediaTime) -> Option<Duration> {
        if self.clock_rate != earlier.clock_rate || self.clock_rate == 0 {
            return None;
        }
        let ticks = self.ticks.checked_sub(earlier.ticks).filter(|t| *t > 0)?;
        let nanos = u128::from(ticks) * 1_000_000_000 / u128::from(self.clock_rate);
        Some(Duration::from_nanos(nanos as u64))
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ticks, self.clock_rate)
    }
}

/// Monotonic clock anchored at the moment a source was opened
///
/// All frame timestamps of one source derive from this single start instant,
/// so they never go backwards.
#[derive(Debug, Clone, Copy)]
pub struct MediaClock {
    start: Instant,
    clock_rate: u32,
}

impl MediaClock {
    /// Create a 90 kHz clock with the current instant as time zero
    pub fn video() -> Self {
        Self::from_instant(Instant::now(), VIDEO_CLOCK_RATE)
    }

    pub fn from_instant(start: Instant, clock_rate: u32) -> Self {
        Self { start, clock_rate }
    }

    /// Timestamp for the current instant
    #[inline]
    pub fn now(&self) -> MediaTime {
        self.at(Instant::now())
    }

    /// Timestamp for a given instant; instants before the start clamp to zero
    #[inline]
    pub fn at(&self, instant: Instant) -> MediaTime {
        MediaTime::from_duration(instant.saturating_duration_since(self.start), self.clock_rate)
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::video()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_at_90khz() {
        let start = Instant::now();
        let clock = MediaClock::from_instant(start, VIDEO_CLOCK_RATE);

        let t = clock.at(start + Duration::from_millis(500));
        assert_eq!(t.ticks, 45_000);
        assert_eq!(t.clock_rate, 90_000);
        assert_eq!(t.to_string(), "45000/90000");
        assert!((t.as_secs_f64() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic() {
        let clock = MediaClock::video();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a);
    }

    #[test]
    fn test_checked_since() {
        let start = Instant::now();
        let clock = MediaClock::from_instant(start, VIDEO_CLOCK_RATE);
        let a = clock.at(start + Duration::from_millis(100));
        let b = clock.at(start + Duration::from_millis(160));

        assert_eq!(b.checked_since(a), Some(Duration::from_millis(60)));
        assert_eq!(a.checked_since(b), None);
        assert_eq!(a.checked_since(a), None);

        let other_rate = MediaTime {
            ticks: 0,
            clock_rate: 48_000,
        };
        assert_eq!(b.checked_since(other_rate), None);
    }

    #[test]
    fn test_before_start_clamps() {
        let start = Instant::now() + Duration::from_secs(1);
        let clock = MediaClock::from_instant(start, VIDEO_CLOCK_RATE);
        assert_eq!(clock.at(Instant::now()).ticks, 0);
    }
}
