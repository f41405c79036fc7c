//! Booking calendar policy.
//!
//! The timezone and the business-day rule are explicit parameters so
//! date computation is deterministic in tests instead of depending on
//! the host clock's locale.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Fixed business rules applied to every booked action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingPolicy {
    /// Action title, also part of the idempotency key.
    pub title: String,
    /// Tenant-local offset from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

impl BookingPolicy {
    /// The calendar date "today" in the policy's timezone.
    pub fn local_today(&self, now: DateTime<Utc>) -> NaiveDate {
        (now + chrono::Duration::minutes(i64::from(self.utc_offset_minutes))).date_naive()
    }

    /// The date an action booked today lands on.
    pub fn effective_date(&self, today: NaiveDate) -> NaiveDate {
        next_business_day(today)
    }
}

/// The first weekday strictly after `from`. Saturday and Sunday are
/// skipped; no holiday calendar is consulted.
pub fn next_business_day(from: NaiveDate) -> NaiveDate {
    let mut day = from + Days::new(1);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day = day + Days::new(1);
    }
    day
}
