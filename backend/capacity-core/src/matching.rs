// src/matching.rs
//! Joins free-text device identifiers against production group names.
//!
//! The two source spreadsheets are maintained independently, so a device
//! `"10250"` may appear as `"10250_Frezarki"` in the production report.
//! Strategies are tried in order and the first one that selects any row wins.
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::models::{normalize_key, ProductionRecord, ProductionRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// `group.lower().trim() == key`
    Exact,
    /// `group.lower()` contains `key` (never the reverse direction)
    Contains,
    /// `group.lower()` contains the digits of `key`
    DigitsOnly,
}

/// Cascade for workload lookups during aggregation.
pub const AGGREGATE_CASCADE: &[MatchStrategy] = &[MatchStrategy::Exact, MatchStrategy::Contains];

/// Cascade for the part-level lookup.
pub const PART_CASCADE: &[MatchStrategy] = &[
    MatchStrategy::Exact,
    MatchStrategy::Contains,
    MatchStrategy::DigitsOnly,
];

impl MatchStrategy {
    /// `key` must already be normalized with [`normalize_key`].
    pub fn matches(&self, key: &str, group: &str) -> bool {
        match self {
            MatchStrategy::Exact => normalize_key(group) == key,
            MatchStrategy::Contains => group.to_lowercase().contains(key),
            MatchStrategy::DigitsOnly => {
                let digits = digits_of(key);
                !digits.is_empty() && group.to_lowercase().contains(&digits)
            }
        }
    }
}

fn digits_of(key: &str) -> String {
    key.chars().filter(char::is_ascii_digit).collect()
}

/// Runs `cascade` over `rows`, returning the winning strategy and its rows.
pub fn select_rows<'a, T>(
    key: &str,
    rows: &'a [T],
    group_of: impl Fn(&T) -> &str,
    cascade: &[MatchStrategy],
) -> (Option<MatchStrategy>, Vec<&'a T>) {
    let key = normalize_key(key);
    if key.is_empty() {
        return (None, Vec::new());
    }
    for strategy in cascade {
        let selected: Vec<&T> = rows
            .iter()
            .filter(|&row| strategy.matches(&key, group_of(row)))
            .collect();
        if !selected.is_empty() {
            debug!(
                "Match for '{}' via {:?}: {} row(s)",
                key,
                strategy,
                selected.len()
            );
            return (Some(*strategy), selected);
        }
    }
    (None, Vec::new())
}

/// Outcome of one workload lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadMatch {
    pub strategy: Option<MatchStrategy>,
    pub total: f64,
}

// --- Production Table ---

/// Aggregated production workload, one record per `(group, year, week)`,
/// bucketed by `(year, week)`.
#[derive(Debug, Clone, Default)]
pub struct ProductionTable {
    by_week: HashMap<(i32, u32), Vec<ProductionRecord>>,
    len: usize,
}

impl ProductionTable {
    /// Sums raw rows sharing the same `(group, year, week)`.
    pub fn from_rows(rows: &[ProductionRow]) -> Self {
        let mut sums: HashMap<(String, i32, u32), f64> = HashMap::new();
        let mut order: Vec<(String, i32, u32)> = Vec::new();
        for row in rows {
            let key = (row.group.clone(), row.year, row.week);
            match sums.get_mut(&key) {
                Some(total) => *total += row.praca_tpz,
                None => {
                    sums.insert(key.clone(), row.praca_tpz);
                    order.push(key);
                }
            }
        }
        let records = order.into_iter().map(|key| {
            let praca_tpz = sums[&key];
            let (group, year, week) = key;
            ProductionRecord {
                group,
                year,
                week,
                praca_tpz,
            }
        });
        Self::from_records(records)
    }

    pub fn from_records(records: impl IntoIterator<Item = ProductionRecord>) -> Self {
        let mut table = ProductionTable::default();
        for record in records {
            table
                .by_week
                .entry((record.year, record.week))
                .or_default()
                .push(record);
            table.len += 1;
        }
        table
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn records_for_week(&self, year: i32, week: u32) -> &[ProductionRecord] {
        self.by_week
            .get(&(year, week))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn lookup(
        &self,
        group_key: &str,
        year: i32,
        week: u32,
        cascade: &[MatchStrategy],
    ) -> LoadMatch {
        let bucket = self.records_for_week(year, week);
        let (strategy, rows) = select_rows(group_key, bucket, |r| r.group.as_str(), cascade);
        LoadMatch {
            strategy,
            total: rows.iter().map(|r| r.praca_tpz).sum(),
        }
    }
}

/// Workload hours for a device/group in one ISO week (exact, then contains).
pub fn match_production(group_key: &str, year: i32, week: u32, table: &ProductionTable) -> f64 {
    table.lookup(group_key, year, week, AGGREGATE_CASCADE).total
}
