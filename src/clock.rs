//! Time source for the engine.
//!
//! Schedules are wall-clock ("08:00 every day"), so the engine works in local
//! naive time throughout. Tests pin time with [`FixedClock`].

use std::sync::Mutex;

use chrono::{Duration, Local, NaiveDateTime, Timelike};

use crate::error::CareError;

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time, truncated to whole seconds.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

/// Manually driven clock.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `at` moved by `minutes`, or a configuration error when the result does
/// not fit in a `NaiveDateTime`.
pub fn shift_minutes(at: NaiveDateTime, minutes: i64) -> Result<NaiveDateTime, CareError> {
    Duration::try_minutes(minutes)
        .and_then(|d| at.checked_add_signed(d))
        .ok_or_else(|| CareError::Configuration(format!("{minutes} minutes from {at} is out of range")))
}

pub fn shift_hours(at: NaiveDateTime, hours: i64) -> Result<NaiveDateTime, CareError> {
    let minutes = hours
        .checked_mul(60)
        .ok_or_else(|| CareError::Configuration(format!("{hours} hours is out of range")))?;
    shift_minutes(at, minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn fixed_clock_advances() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(31));
        assert_eq!(clock.now(), start + Duration::minutes(31));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn system_clock_has_no_subseconds() {
        assert_eq!(SystemClock.now().nanosecond(), 0);
    }

    #[test]
    fn clocks_are_object_safe() {
        let clocks: Vec<Box<dyn Clock>> = vec![
            Box::new(SystemClock),
            Box::new(FixedClock::new(NaiveDateTime::default())),
        ];
        assert_eq!(clocks.len(), 2);
    }

    #[test]
    fn shift_rejects_overflow() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
        assert_eq!(shift_minutes(start, 90).unwrap(), start + Duration::minutes(90));
        assert_eq!(shift_hours(start, 48).unwrap(), start + Duration::hours(48));
        assert!(matches!(shift_minutes(start, 1_000_000_000_000), Err(CareError::Configuration(_))));
        assert!(matches!(shift_hours(start, 100_000_000_000), Err(CareError::Configuration(_))));
        assert!(matches!(shift_hours(start, i64::MAX), Err(CareError::Configuration(_))));
    }
}
