//! Calendar clock used for default query windows
//!
//! The metering API defaults its date range to the current month. The clock
//! is injected so that the default window can be pinned in tests.

use chrono::{Datelike, NaiveDate, Utc};

/// Source of "today" in UTC.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;

    /// First day of the month containing [`Clock::today`].
    fn month_start(&self) -> NaiveDate {
        let today = self.today();
        // Day 1 always exists for a valid year/month.
        today.with_day(1).unwrap_or(today)
    }
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Clock frozen at a fixed date
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
