// src/proration.rs
use crate::calendar::{business_days_between, WeekRange};
use crate::months::MonthRange;

/// Business-day overlap of one week with the selected months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proration {
    pub overlap_days: u32,
    pub week_business_days: u32,
}

impl Proration {
    pub fn for_week(week: &WeekRange, months: &[MonthRange]) -> Self {
        Self {
            overlap_days: overlap_days(week, months),
            week_business_days: week.business_days(),
        }
    }

    /// No business day of the week falls inside any selected month.
    pub fn is_excluded(&self) -> bool {
        self.overlap_days == 0
    }

    pub fn ratio(&self) -> f64 {
        if self.week_business_days == 0 {
            0.0
        } else {
            self.overlap_days as f64 / self.week_business_days as f64
        }
    }

    pub fn apply(&self, value: f64) -> f64 {
        value * self.ratio()
    }
}

/// Sums the business-day overlap of `week` with every month range.
/// A week crossing into two selected months counts both parts.
pub fn overlap_days(week: &WeekRange, months: &[MonthRange]) -> u32 {
    months
        .iter()
        .map(|m| {
            let overlap_start = week.start.max(m.first_day);
            let overlap_end = week.end.min(m.last_day);
            if overlap_start <= overlap_end {
                business_days_between(overlap_start, overlap_end)
            } else {
                0
            }
        })
        .sum()
}

/// Linear proration by business days: `(prorated, overlap_days, week_business_days)`.
pub fn prorate(value: f64, week: &WeekRange, months: &[MonthRange]) -> (f64, u32, u32) {
    let p = Proration::for_week(week, months);
    (p.apply(value), p.overlap_days, p.week_business_days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::week_range;
    use crate::months::{parse_month_token, parse_month_tokens};

    const EPS: f64 = 1e-9;

    #[test]
    fn week_inside_month_keeps_full_value() {
        let week = week_range(2025, 36).unwrap();
        let months = [parse_month_token("2025-09").unwrap()];
        let (prorated, overlap, total) = prorate(120.0, &week, &months);
        assert_eq!(overlap, 5);
        assert_eq!(total, 5);
        assert!((prorated - 120.0).abs() < EPS);
    }

    #[test]
    fn week_crossing_month_end_is_split_by_business_days() {
        // Week 40/2025 runs Mon 2025-09-29 .. Sun 2025-10-05.
        let week = week_range(2025, 40).unwrap();

        let october = [parse_month_token("2025-10").unwrap()];
        let (prorated, overlap, total) = prorate(100.0, &week, &october);
        assert_eq!((overlap, total), (3, 5));
        assert!((prorated - 100.0 * 3.0 / 5.0).abs() < EPS);

        let september = [parse_month_token("2025-09").unwrap()];
        let (prorated, overlap, _) = prorate(100.0, &week, &september);
        assert_eq!(overlap, 2);
        assert!((prorated - 40.0).abs() < EPS);
    }

    #[test]
    fn both_boundary_months_selected_sum_to_full_week() {
        let week = week_range(2025, 40).unwrap();
        let months = parse_month_tokens(&["2025-09", "2025-10"]).unwrap();
        let (prorated, overlap, _) = prorate(80.0, &week, &months);
        assert_eq!(overlap, 5);
        assert!((prorated - 80.0).abs() < EPS);
    }

    #[test]
    fn disjoint_month_excludes_week() {
        let week = week_range(2025, 36).unwrap();
        let months = [parse_month_token("2025-11").unwrap()];
        let p = Proration::for_week(&week, &months);
        assert!(p.is_excluded());
        assert_eq!(p.apply(50.0), 0.0);
    }

    #[test]
    fn weekend_only_overlap_excludes_week() {
        // Week 44/2025 is 2025-10-27 .. 2025-11-02; November starts on a Saturday.
        let week = week_range(2025, 44).unwrap();
        let months = [parse_month_token("2025-11").unwrap()];
        assert!(Proration::for_week(&week, &months).is_excluded());
    }

    #[test]
    fn single_partial_month_never_exceeds_week_days() {
        for week_no in 1..=52 {
            let week = week_range(2025, week_no).unwrap();
            for month in 1..=12 {
                let token = format!("2025-{:02}", month);
                let months = [parse_month_token(&token).unwrap()];
                assert!(overlap_days(&week, &months) <= week.business_days());
            }
        }
    }

    #[test]
    fn zero_business_day_week_prorates_to_zero() {
        let p = Proration {
            overlap_days: 0,
            week_business_days: 0,
        };
        assert_eq!(p.ratio(), 0.0);
        assert_eq!(p.apply(10.0), 0.0);
    }
}
