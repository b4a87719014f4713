//! Time utilities: timestamps, deadlines and fiscal calendars.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// Engine timing defaults.
pub mod constants {
    /// Default freshness window for non-fixed rates (1 hour).
    pub const DEFAULT_RATE_TTL_SECS: u64 = 60 * 60;

    /// Longest accepted freshness window (30 days).
    pub const MAX_RATE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

    /// Default interval between critical-pair refreshes (6 hours).
    pub const CRITICAL_REFRESH_INTERVAL_SECS: u64 = 6 * 60 * 60;

    /// Default per-provider request timeout (5 seconds).
    pub const PROVIDER_TIMEOUT_MS: u64 = 5_000;

    /// Default bound on a durable-store read or write (5 seconds).
    pub const STORE_TIMEOUT_MS: u64 = 5_000;
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Today's date in UTC.
pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

/// A caller-supplied point in time after which work should stop waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Timestamp,
}

impl Deadline {
    /// Deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self { at: now() + duration }
    }

    pub fn at(at: Timestamp) -> Self {
        Self { at }
    }

    /// Check if the deadline has passed.
    pub fn is_exceeded(&self) -> bool {
        now() >= self.at
    }

    /// Remaining time, clamped at zero.
    pub fn remaining(&self) -> Duration {
        let remaining = self.at - now();
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    pub fn remaining_std(&self) -> std::time::Duration {
        self.remaining().as_std()
    }
}

/// Fiscal-year boundaries for period-end accounting.
///
/// A fiscal year is labelled by the calendar year in which it starts. With
/// the default start month of January it coincides with the calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalCalendar {
    start_month: u32,
}

impl FiscalCalendar {
    pub fn new(start_month: u32) -> Result<Self, CommonError> {
        if !(1..=12).contains(&start_month) {
            return Err(CommonError::InvalidFiscalMonth(start_month));
        }
        Ok(Self { start_month })
    }

    pub fn start_month(&self) -> u32 {
        self.start_month
    }

    /// First and last day (inclusive) of `fiscal_year`.
    pub fn bounds(&self, fiscal_year: i32) -> Option<(NaiveDate, NaiveDate)> {
        let start = NaiveDate::from_ymd_opt(fiscal_year, self.start_month, 1)?;
        let next = NaiveDate::from_ymd_opt(fiscal_year + 1, self.start_month, 1)?;
        Some((start, next.pred_opt()?))
    }

    /// The fiscal year a date falls into.
    pub fn fiscal_year_of(&self, date: NaiveDate) -> i32 {
        if date.month() >= self.start_month {
            date.year()
        } else {
            date.year() - 1
        }
    }

    pub fn contains(&self, fiscal_year: i32, date: NaiveDate) -> bool {
        self.fiscal_year_of(date) == fiscal_year
    }
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self { start_month: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline() {
        let deadline = Deadline::after(Duration::seconds(10));
        assert!(!deadline.is_exceeded());
        assert!(deadline.remaining() > Duration::zero());

        let past = Deadline::at(now() - Duration::seconds(1));
        assert!(past.is_exceeded());
        assert_eq!(past.remaining(), Duration::zero());
        assert_eq!(past.remaining_std(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_calendar_fiscal_year() {
        let calendar = FiscalCalendar::default();
        let (start, end) = calendar.bounds(2025).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert!(calendar.contains(2025, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()));
    }

    #[test]
    fn test_offset_fiscal_year() {
        let calendar = FiscalCalendar::new(7).unwrap();
        let (start, end) = calendar.bounds(2024).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        assert_eq!(calendar.fiscal_year_of(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()), 2024);
        assert_eq!(calendar.fiscal_year_of(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()), 2025);
    }

    #[test]
    fn test_invalid_start_month() {
        assert!(FiscalCalendar::new(0).is_err());
        assert!(FiscalCalendar::new(13).is_err());
    }
}
