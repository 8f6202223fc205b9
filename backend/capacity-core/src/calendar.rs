// src/calendar.rs
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::error::CapacityError;

/// Monday..Sunday span of one ISO week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeekRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl WeekRange {
    pub fn business_days(&self) -> u32 {
        business_days_between(self.start, self.end)
    }
}

/// Returns the Monday and Sunday of ISO week `week` in ISO year `year`.
pub fn week_range(year: i32, week: u32) -> Result<WeekRange, CapacityError> {
    let invalid = || CapacityError::InvalidWeek { year, week };
    let start = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).ok_or_else(invalid)?;
    let end = NaiveDate::from_isoywd_opt(year, week, Weekday::Sun).ok_or_else(invalid)?;
    Ok(WeekRange { start, end })
}

/// Counts Monday-Friday dates in `[start, end]`. Zero when `start > end`.
pub fn business_days_between(start: NaiveDate, end: NaiveDate) -> u32 {
    if start > end {
        return 0;
    }
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| d.weekday().number_from_monday() <= 5)
        .count() as u32
}

pub fn first_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Business days of a calendar month; zero for an out-of-range month.
pub fn business_days_in_month(year: i32, month: u32) -> u32 {
    match (first_day_of_month(year, month), last_day_of_month(year, month)) {
        (Some(first), Some(last)) => business_days_between(first, last),
        _ => 0,
    }
}
