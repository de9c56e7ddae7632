//! Time source abstraction for the batch jobs.
//!
//! Jobs never read the system time directly; they receive a [`Clock`] so that
//! tests can pin "now" (and "today", for calendar-gated jobs) to arbitrary
//! instants.

use chrono::{NaiveDate, NaiveDateTime, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in UTC, naive (matches the timestamp columns).
    fn now(&self) -> NaiveDateTime;

    /// Current calendar date in UTC.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Clock pinned to a fixed instant. Used by tests and dry runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_returns_pinned_instant() {
        let instant = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let clock = FixedClock(instant);

        assert_eq!(clock.now(), instant);
        assert_eq!(clock.today(), instant.date());
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
