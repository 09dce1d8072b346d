//! Calendar helpers for monthly ticks.

use chrono::{Datelike, Days, Months, NaiveDate};

use crate::error::{Result, SimError};

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Whether `date` is the first day of its month.
pub fn is_month_start(date: NaiveDate) -> bool {
    date.day() == 1
}

/// First day of the month following `date`.
pub fn next_month_start(date: NaiveDate) -> Result<NaiveDate> {
    month_start(date)
        .checked_add_months(Months::new(1))
        .ok_or(SimError::CalendarOverflow(date))
}

/// The first day of each of the `months` months following `from`.
///
/// `month_starts_next(2024-03-15, 3)` yields `[2024-04-01, 2024-05-01, 2024-06-01]`.
pub fn month_starts_next(from: NaiveDate, months: u32) -> Result<Vec<NaiveDate>> {
    let mut out = Vec::with_capacity(months as usize);
    let mut cursor = from;
    for _ in 0..months {
        cursor = next_month_start(cursor)?;
        out.push(cursor);
    }
    Ok(out)
}

/// `date + days`, saturating at the calendar maximum.
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
            .unwrap_or(NaiveDate::MAX)
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
            .unwrap_or(NaiveDate::MIN)
    }
}

/// Whole days from `from` to `to` (negative when `to` precedes `from`).
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}
