// src/aggregation.rs
//! Availability vs workload sums over user-selected months.
//!
//! Every path here reads borrowed snapshots only; nothing is cached or
//! mutated between calls, so two identical requests yield identical results.
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::calendar::{week_range, WeekRange};
use crate::error::CapacityError;
use crate::matching::{match_production, select_rows, ProductionTable, PART_CASCADE};
use crate::models::{normalize_key, AvailabilityRecord, LookupMap, ProductionRow};
use crate::months::{parse_month_tokens, working_days, MonthRange};
use crate::proration::Proration;

/// Immutable views of the source tables for one computation.
#[derive(Debug, Clone, Copy)]
pub struct SourceTables<'a> {
    pub availability: &'a [AvailabilityRecord],
    pub production: &'a ProductionTable,
    pub production_rows: &'a [ProductionRow],
    pub departments: &'a LookupMap,
    pub display_names: &'a LookupMap,
}

// --- Result Types ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyAvailability {
    pub week_number: u32,
    pub iso_year: i32,
    pub hours: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub prorated_hours: f64,
    pub load_hours: f64,
    pub prorated_load_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityResult {
    pub device_id: String,
    pub month: String,
    pub working_days_in_month: u32,
    pub weekly: Vec<WeeklyAvailability>,
    /// Prorated or full hours, depending on `prorated`.
    pub monthly_hours_sum: f64,
    pub prorated: bool,
    pub monthly_hours_full_sum: f64,
    pub monthly_hours_prorated_sum: f64,
    pub monthly_load_full_sum: f64,
    pub monthly_load_prorated_sum: f64,
    pub shortage_full: f64,
    pub shortage_prorated: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceAggregate {
    pub device_id: String,
    pub display_name: Option<String>,
    pub department: Option<String>,
    pub monthly_hours_full_sum: f64,
    pub monthly_hours_prorated_sum: f64,
    pub monthly_load_full_sum: f64,
    pub monthly_load_prorated_sum: f64,
    pub shortage_full: f64,
    pub shortage_prorated: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DevicePartLoad {
    pub part_number: String,
    pub week: u32,
    pub year: i32,
    pub praca_tpz: f64,
    pub order_id: Option<String>,
}

// --- Per-Week Step ---

/// One availability row restricted to the selected months.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklyContribution {
    pub hours: f64,
    pub prorated_hours: f64,
    pub load_hours: f64,
    pub prorated_load_hours: f64,
}

/// Returns `None` for rows with an invalid ISO week or no business-day overlap.
fn weekly_contribution(
    row: &AvailabilityRecord,
    months: &[MonthRange],
    production: &ProductionTable,
) -> Option<(WeekRange, WeeklyContribution)> {
    let week = match week_range(row.year, row.week) {
        Ok(week) => week,
        Err(e) => {
            debug!("Skipping availability row for '{}': {}", row.device, e);
            return None;
        }
    };
    let proration = Proration::for_week(&week, months);
    if proration.is_excluded() {
        return None;
    }
    let load_hours = match_production(&row.device, row.year, row.week, production);
    Some((
        week,
        WeeklyContribution {
            hours: row.hours,
            prorated_hours: proration.apply(row.hours),
            load_hours,
            // Load uses the same ratio as availability.
            prorated_load_hours: proration.apply(load_hours),
        },
    ))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Totals {
    hours_full: f64,
    hours_prorated: f64,
    load_full: f64,
    load_prorated: f64,
}

impl Totals {
    fn add(&mut self, c: &WeeklyContribution) {
        self.hours_full += c.hours;
        self.hours_prorated += c.prorated_hours;
        self.load_full += c.load_hours;
        self.load_prorated += c.prorated_load_hours;
    }

    fn shortage_full(&self) -> f64 {
        self.hours_full - self.load_full
    }

    fn shortage_prorated(&self) -> f64 {
        self.hours_prorated - self.load_prorated
    }
}

// --- Operations ---

/// Weekly availability and workload of one device over the selected months.
pub fn compute_availability<S: AsRef<str>>(
    tables: SourceTables<'_>,
    device_id: &str,
    month_tokens: &[S],
    prorate: bool,
) -> Result<AvailabilityResult, CapacityError> {
    let months = parse_month_tokens(month_tokens)?;
    let device_key = normalize_key(device_id);

    let rows: Vec<&AvailabilityRecord> = tables
        .availability
        .iter()
        .filter(|r| normalize_key(&r.device) == device_key)
        .collect();
    if rows.is_empty() {
        return Err(CapacityError::NotFound(format!("device '{}'", device_id)));
    }

    let mut totals = Totals::default();
    let mut weekly = Vec::new();
    for row in rows {
        if let Some((week, c)) = weekly_contribution(row, &months, tables.production) {
            totals.add(&c);
            weekly.push(WeeklyAvailability {
                week_number: row.week,
                iso_year: row.year,
                hours: c.hours,
                start_date: week.start,
                end_date: week.end,
                prorated_hours: c.prorated_hours,
                load_hours: c.load_hours,
                prorated_load_hours: c.prorated_load_hours,
            });
        }
    }
    if weekly.is_empty() {
        return Err(CapacityError::NotFound(format!(
            "no weekly data for device '{}' in the selected months",
            device_id
        )));
    }

    info!(
        "Availability for '{}' over {} month(s): {} week(s), {:.1}h available, {:.1}h load",
        device_id,
        months.len(),
        weekly.len(),
        totals.hours_full,
        totals.load_full
    );

    Ok(AvailabilityResult {
        device_id: device_id.to_string(),
        month: month_tokens
            .iter()
            .map(|t| t.as_ref())
            .collect::<Vec<_>>()
            .join(","),
        working_days_in_month: working_days(&months),
        weekly,
        monthly_hours_sum: if prorate {
            totals.hours_prorated
        } else {
            totals.hours_full
        },
        prorated: prorate,
        monthly_hours_full_sum: totals.hours_full,
        monthly_hours_prorated_sum: totals.hours_prorated,
        monthly_load_full_sum: totals.load_full,
        monthly_load_prorated_sum: totals.load_prorated,
        shortage_full: totals.shortage_full(),
        shortage_prorated: totals.shortage_prorated(),
    })
}

/// Per-device sums for every device with data in the selected months,
/// most negative `shortage_prorated` first.
pub fn compute_device_aggregates<S: AsRef<str>>(
    tables: SourceTables<'_>,
    month_tokens: &[S],
) -> Result<Vec<DeviceAggregate>, CapacityError> {
    let months = parse_month_tokens(month_tokens)?;

    let mut by_device: BTreeMap<&str, Vec<&AvailabilityRecord>> = BTreeMap::new();
    for row in tables.availability {
        by_device.entry(row.device.as_str()).or_default().push(row);
    }

    let mut results = Vec::new();
    for (device, rows) in by_device {
        let mut totals = Totals::default();
        let mut weeks = 0usize;
        for row in rows {
            if let Some((_, c)) = weekly_contribution(row, &months, tables.production) {
                totals.add(&c);
                weeks += 1;
            }
        }
        if weeks == 0 {
            continue;
        }
        results.push(DeviceAggregate {
            device_id: device.to_string(),
            display_name: tables.display_names.get_exact(device).map(str::to_string),
            department: tables
                .departments
                .get_exact_or_contains(device)
                .map(str::to_string),
            monthly_hours_full_sum: totals.hours_full,
            monthly_hours_prorated_sum: totals.hours_prorated,
            monthly_load_full_sum: totals.load_full,
            monthly_load_prorated_sum: totals.load_prorated,
            shortage_full: totals.shortage_full(),
            shortage_prorated: totals.shortage_prorated(),
        });
    }

    results.sort_by(|a, b| a.shortage_prorated.total_cmp(&b.shortage_prorated));
    info!(
        "Aggregated {} device(s) over {} month(s)",
        results.len(),
        months.len()
    );
    Ok(results)
}

/// Raw production rows of a device (exact, contains, then digits-only group
/// match) whose ISO week touches any selected month.
pub fn device_parts<S: AsRef<str>>(
    tables: SourceTables<'_>,
    device_id: &str,
    month_tokens: &[S],
) -> Result<Vec<DevicePartLoad>, CapacityError> {
    let months = parse_month_tokens(month_tokens)?;
    let (strategy, rows) = select_rows(
        device_id,
        tables.production_rows,
        |r| r.group.as_str(),
        PART_CASCADE,
    );

    let mut parts = Vec::new();
    for row in rows {
        let week = match week_range(row.year, row.week) {
            Ok(week) => week,
            Err(e) => {
                debug!("Skipping production row for '{}': {}", row.group, e);
                continue;
            }
        };
        let touches_month = months
            .iter()
            .any(|m| week.end >= m.first_day && week.start <= m.last_day);
        if !touches_month {
            continue;
        }
        parts.push(DevicePartLoad {
            part_number: row.part_number.clone().unwrap_or_default(),
            week: row.week,
            year: row.year,
            praca_tpz: row.praca_tpz,
            order_id: row.order_id.clone(),
        });
    }
    parts.sort_by_key(|p| (p.year, p.week));

    info!(
        "Device parts for '{}' (match: {:?}): {} row(s)",
        device_id,
        strategy,
        parts.len()
    );
    Ok(parts)
}
