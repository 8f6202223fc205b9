// src/months.rs
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::calendar::{business_days_between, first_day_of_month, last_day_of_month};
use crate::error::CapacityError;

static MONTH_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("static month regex is valid"));

/// First and last calendar day of a selected month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthRange {
    pub year: i32,
    pub month: u32,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
}

impl MonthRange {
    pub fn business_days(&self) -> u32 {
        business_days_between(self.first_day, self.last_day)
    }
}

/// Parses a strict `YYYY-MM` token (month 01..12).
pub fn parse_month_token(token: &str) -> Result<MonthRange, CapacityError> {
    let invalid = || CapacityError::InvalidMonthFormat(token.to_string());
    let caps = MONTH_TOKEN.captures(token).ok_or_else(invalid)?;
    let year: i32 = caps[1].parse().map_err(|_| invalid())?;
    let month: u32 = caps[2].parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    let first_day = first_day_of_month(year, month).ok_or_else(invalid)?;
    let last_day = last_day_of_month(year, month).ok_or_else(invalid)?;
    Ok(MonthRange {
        year,
        month,
        first_day,
        last_day,
    })
}

/// Parses every token in order. Duplicates are kept as given.
pub fn parse_month_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<MonthRange>, CapacityError> {
    tokens
        .iter()
        .map(|t| parse_month_token(t.as_ref()))
        .collect()
}

/// Total business days over all selected months.
pub fn working_days(months: &[MonthRange]) -> u32 {
    months.iter().map(MonthRange::business_days).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_september_2025() {
        let m = parse_month_token("2025-09").unwrap();
        assert_eq!(m.year, 2025);
        assert_eq!(m.month, 9);
        assert_eq!(m.first_day, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(m.last_day, NaiveDate::from_ymd_opt(2025, 9, 30).unwrap());
        assert_eq!(m.business_days(), 22);
    }

    #[test]
    fn february_follows_gregorian_leap_rules() {
        assert_eq!(parse_month_token("2024-02").unwrap().last_day.to_string(), "2024-02-29");
        assert_eq!(parse_month_token("2100-02").unwrap().last_day.to_string(), "2100-02-28");
    }

    #[test]
    fn rejects_malformed_tokens() {
        for bad in [
            "2025-13", "2025-00", "2025-9", "25-09", "2025/09", "2025-09-01", " 2025-09", "", "abcd-ef",
        ] {
            match parse_month_token(bad) {
                Err(CapacityError::InvalidMonthFormat(t)) => assert_eq!(t, bad),
                other => panic!("'{}' should be rejected, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn token_list_fails_on_first_bad_token() {
        let err = parse_month_tokens(&["2025-08", "2025-x9", "2025-10"]).unwrap_err();
        assert!(matches!(err, CapacityError::InvalidMonthFormat(t) if t == "2025-x9"));
    }

    #[test]
    fn duplicate_tokens_are_kept() {
        let months = parse_month_tokens(&["2025-09", "2025-09"]).unwrap();
        assert_eq!(months.len(), 2);
        assert_eq!(working_days(&months), 44);
    }
}
