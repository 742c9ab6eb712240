//! Time source for derived subscription state.
//!
//! Trial and grace-period checks are recomputed against a [`Clock`] on every call, so tests
//! can pin "now" with [`FixedClock`] while production code uses [`SystemClock`].

use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};

/// Supplies the current instant.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current timestamp.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current calendar date.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Returns midnight (UTC) of the current calendar date.
    fn start_of_today(&self) -> DateTime<Utc> {
        self.today().and_time(NaiveTime::MIN).and_utc()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a given instant, advanced manually.
///
/// Clones share the same instant, so a test can keep a handle and move time forward after
/// handing a clone to a subscription.
///
/// # Examples
///
/// ```
/// use chrono::{TimeDelta, TimeZone, Utc};
/// use gu_payment::clock::{Clock, FixedClock};
///
/// let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap());
/// let handle = clock.clone();
/// handle.advance(TimeDelta::days(1));
/// assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 1, 11, 12, 0, 0).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    /// Creates a clock frozen at `instant`.
    #[must_use]
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant: Arc::new(RwLock::new(instant)) }
    }

    /// Moves the clock to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self.instant.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = instant;
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut guard = self.instant.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_start_of_today_truncates_time() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 5, 17, 45, 12).unwrap());
        assert_eq!(clock.start_of_today(), Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_fixed_clock_set() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
        let later = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let first = SystemClock.now();
        let second = SystemClock.now();
        assert!(second >= first);
    }
}
