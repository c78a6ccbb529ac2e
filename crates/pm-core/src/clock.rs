//! Wall-clock access.
//!
//! Campaign timestamps cross process restarts, so they are plain epoch
//! seconds; the monotonic clock is only used inside a single process
//! (command durations, countdowns).

use chrono::{DateTime, Local, Utc};

/// Source of wall-clock time.
pub trait Clock {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Offset of local time from UTC, in seconds (east positive).
    fn local_offset_secs(&self) -> i64;

    /// Current time as whole epoch seconds.
    fn epoch_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

/// The operating system clock and time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_offset_secs(&self) -> i64 {
        i64::from(Local::now().offset().local_minus_utc())
    }
}

/// A clock frozen at a fixed instant, for tests and dry runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub now: DateTime<Utc>,
    pub offset_secs: i64,
}

impl FixedClock {
    /// Clock at `epoch` seconds, running in UTC.
    pub fn at_epoch(epoch: i64) -> Self {
        Self {
            now: DateTime::from_timestamp(epoch, 0).unwrap_or_default(),
            offset_secs: 0,
        }
    }

    pub fn with_offset(mut self, offset_secs: i64) -> Self {
        self.offset_secs = offset_secs;
        self
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn local_offset_secs(&self) -> i64 {
        self.offset_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_epoch() {
        let clock = FixedClock::at_epoch(1_700_000_000).with_offset(3600);
        assert_eq!(clock.epoch_secs(), 1_700_000_000);
        assert_eq!(clock.local_offset_secs(), 3600);
    }

    #[test]
    fn system_offset_is_within_a_day() {
        assert!(SystemClock.local_offset_secs().abs() < 86_400);
    }
}
