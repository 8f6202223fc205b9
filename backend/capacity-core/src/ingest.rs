// src/ingest.rs
//! Reads the delimited exports of the availability and production sheets.
//!
//! Header names differ between releases of the source spreadsheets, so each
//! logical field accepts a list of aliases. Headers and aliases are compared
//! after [`normalize_header`]; a required field with no matching header fails
//! the whole table load with `MissingColumns`.
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{io_context, CapacityError};
use crate::matching::ProductionTable;
use crate::models::{AvailabilityRecord, LookupMap, ProductionRow};

// --- Source Tables ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    Availability,
    Production,
    Departments,
    DisplayNames,
}

impl SourceTable {
    pub const ALL: [SourceTable; 4] = [
        SourceTable::Availability,
        SourceTable::Production,
        SourceTable::Departments,
        SourceTable::DisplayNames,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SourceTable::Availability => "availability",
            SourceTable::Production => "production",
            SourceTable::Departments => "departments",
            SourceTable::DisplayNames => "display_names",
        }
    }

    /// File name of an uploaded override inside the upload directory.
    pub fn upload_file_name(&self) -> &'static str {
        match self {
            SourceTable::Availability => "availability.csv",
            SourceTable::Production => "production.csv",
            SourceTable::Departments => "departments.csv",
            SourceTable::DisplayNames => "display_names.csv",
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, SourceTable::Departments | SourceTable::DisplayNames)
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceTable {
    type Err = CapacityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceTable::ALL
            .into_iter()
            .find(|t| t.name() == s.trim().to_lowercase())
            .ok_or_else(|| CapacityError::UnknownTable(s.to_string()))
    }
}

// --- Header Aliases ---

fn aliases(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityColumns {
    pub device: Vec<String>,
    pub week: Vec<String>,
    pub year: Vec<String>,
    pub hours: Vec<String>,
}

impl Default for AvailabilityColumns {
    fn default() -> Self {
        Self {
            device: aliases(&["device", "urzadzenie", "grupa zasobow", "resource", "maszyna"]),
            week: aliases(&["week", "tydzien", "nr tyg", "tydzien realizacji"]),
            year: aliases(&["year", "rok"]),
            hours: aliases(&[
                "hours",
                "godziny",
                "dostepnosc",
                "dostepnosctygodniowa",
                "dostepnosc tygodniowa",
                "available hours",
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionColumns {
    pub group: Vec<String>,
    pub week: Vec<String>,
    pub workload: Vec<String>,
    pub year: Vec<String>,
    pub year_month: Vec<String>,
    pub deadline: Vec<String>,
    pub part_number: Vec<String>,
    pub order_id: Vec<String>,
}

impl Default for ProductionColumns {
    fn default() -> Self {
        Self {
            group: aliases(&["grupa zasobow", "grupa", "group"]),
            week: aliases(&["tydzien realizacji", "tydzien", "week"]),
            workload: aliases(&["praca+tpz", "praca + tpz", "praca tpz", "praca", "workload"]),
            year: aliases(&["year", "rok"]),
            year_month: aliases(&["rokmies", "rokmiesiac", "rok mies", "rok miesiac"]),
            deadline: aliases(&["termin realizacji", "termin"]),
            part_number: aliases(&["numer czesci", "nr czesci", "numer", "part number", "part"]),
            order_id: aliases(&["id zlecenia", "zlecenie", "nr zlecenia", "order id"]),
        }
    }
}

/// Group and value columns of a two-column lookup table.
pub trait LookupColumns {
    fn group(&self) -> &[String];
    fn value(&self) -> &[String];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepartmentColumns {
    pub group: Vec<String>,
    pub value: Vec<String>,
}

impl Default for DepartmentColumns {
    fn default() -> Self {
        Self {
            group: aliases(&["grupa zasobow", "grupa", "group"]),
            value: aliases(&["dzial", "department"]),
        }
    }
}

impl LookupColumns for DepartmentColumns {
    fn group(&self) -> &[String] {
        &self.group
    }

    fn value(&self) -> &[String] {
        &self.value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayNameColumns {
    pub group: Vec<String>,
    pub value: Vec<String>,
}

impl Default for DisplayNameColumns {
    fn default() -> Self {
        Self {
            group: aliases(&["group", "grupa zasobow", "grupa"]),
            value: aliases(&["name", "names", "nazwaurz.", "nazwa urz.", "nazwa urz", "nazwa urzadzenia"]),
        }
    }
}

impl LookupColumns for DisplayNameColumns {
    fn group(&self) -> &[String] {
        &self.group
    }

    fn value(&self) -> &[String] {
        &self.value
    }
}

/// Accepted header names per logical field of every source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnAliases {
    pub availability: AvailabilityColumns,
    pub production: ProductionColumns,
    pub departments: DepartmentColumns,
    pub display_names: DisplayNameColumns,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        Self {
            availability: AvailabilityColumns::default(),
            production: ProductionColumns::default(),
            departments: DepartmentColumns::default(),
            display_names: DisplayNameColumns::default(),
        }
    }
}

impl ColumnAliases {
    /// Reads a JSON override; tables or fields left out keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, CapacityError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| io_context(e, format!("Failed to read column aliases file: {:?}", path)))?;
        let aliases: ColumnAliases = serde_json::from_str(&json)?;
        info!("Column aliases loaded from {}", path.display());
        Ok(aliases)
    }
}

/// Lowercase, trim, fold Polish diacritics, collapse `_`, `-` and whitespace.
pub fn normalize_header(raw: &str) -> String {
    let folded: String = raw
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'ą' => 'a',
            'ć' => 'c',
            'ę' => 'e',
            'ł' => 'l',
            'ń' => 'n',
            'ó' => 'o',
            'ś' => 's',
            'ź' | 'ż' => 'z',
            '_' | '-' => ' ',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct HeaderIndex {
    headers: Vec<String>,
}

impl HeaderIndex {
    fn new(raw: &csv::ByteRecord) -> Self {
        Self {
            headers: raw
                .iter()
                .map(|h| normalize_header(&String::from_utf8_lossy(h)))
                .collect(),
        }
    }

    /// First alias (in alias order) present among the headers.
    fn find(&self, aliases: &[String]) -> Option<usize> {
        aliases.iter().find_map(|alias| {
            let alias = normalize_header(alias);
            self.headers.iter().position(|h| *h == alias)
        })
    }

    fn require(
        &self,
        table: SourceTable,
        fields: &[(&str, &[String])],
    ) -> Result<Vec<usize>, CapacityError> {
        let mut found = Vec::with_capacity(fields.len());
        let mut missing = Vec::new();
        for (field, field_aliases) in fields {
            match self.find(field_aliases) {
                Some(idx) => found.push(idx),
                None => missing.push(field.to_string()),
            }
        }
        if missing.is_empty() {
            Ok(found)
        } else {
            warn!(
                "Headers of {} table {:?} do not cover fields {:?}",
                table, self.headers, missing
            );
            Err(CapacityError::MissingColumns {
                table: table.name().to_string(),
                missing,
            })
        }
    }
}

// --- Cell Parsing ---

fn cell(record: &csv::ByteRecord, idx: usize) -> String {
    record
        .get(idx)
        .map(|b| String::from_utf8_lossy(b).trim().to_string())
        .unwrap_or_default()
}

fn optional_cell(record: &csv::ByteRecord, idx: Option<usize>) -> Option<String> {
    let value = cell(record, idx?);
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(value)
    }
}

/// Accepts a decimal comma and thousands spaces (`1 234,5`).
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integers may arrive as integral floats (`36.0`) from spreadsheet exports.
pub fn parse_integer(raw: &str) -> Option<i64> {
    let value = parse_number(raw)?;
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

fn parse_year_month(raw: &str) -> Option<i32> {
    let digits: String = raw.trim().chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

fn parse_date_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.year());
        }
    }
    for fmt in ["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date.year());
        }
    }
    None
}

fn reader(bytes: &[u8], delimiter: u8) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes)
}

fn log_skipped(table: SourceTable, kept: usize, skipped: usize) {
    if skipped > 0 {
        warn!(
            "{} table: skipped {} malformed row(s), kept {}",
            table, skipped, kept
        );
    } else {
        info!("{} table: parsed {} row(s)", table, kept);
    }
}

// --- Table Parsers ---

pub fn parse_availability(
    bytes: &[u8],
    columns: &AvailabilityColumns,
    delimiter: u8,
) -> Result<Vec<AvailabilityRecord>, CapacityError> {
    let table = SourceTable::Availability;
    let mut rdr = reader(bytes, delimiter);
    let headers = HeaderIndex::new(rdr.byte_headers()?);
    let idx = headers.require(
        table,
        &[
            ("device", columns.device.as_slice()),
            ("week", columns.week.as_slice()),
            ("year", columns.year.as_slice()),
            ("hours", columns.hours.as_slice()),
        ],
    )?;
    let (device_idx, week_idx, year_idx, hours_idx) = (idx[0], idx[1], idx[2], idx[3]);

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (line, result) in rdr.byte_records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!("{} row {}: unreadable record: {}", table, line + 2, e);
                skipped += 1;
                continue;
            }
        };
        let device = cell(&record, device_idx);
        let week = parse_integer(&cell(&record, week_idx)).and_then(|w| u32::try_from(w).ok());
        let year = parse_integer(&cell(&record, year_idx)).and_then(|y| i32::try_from(y).ok());
        let hours = parse_number(&cell(&record, hours_idx)).filter(|h| *h >= 0.0);
        match (device.is_empty(), week, year, hours) {
            (false, Some(week), Some(year), Some(hours)) => rows.push(AvailabilityRecord {
                device,
                week,
                year,
                hours,
            }),
            _ => {
                debug!("{} row {}: skipped {:?}", table, line + 2, record);
                skipped += 1;
            }
        }
    }
    log_skipped(table, rows.len(), skipped);
    Ok(rows)
}

enum YearSource {
    Column(usize),
    YearMonth(usize),
    Deadline(usize),
    Fixed(i32),
}

impl YearSource {
    fn resolve(&self, record: &csv::ByteRecord) -> Option<i32> {
        match self {
            YearSource::Column(idx) => {
                parse_integer(&cell(record, *idx)).and_then(|y| i32::try_from(y).ok())
            }
            YearSource::YearMonth(idx) => parse_year_month(&cell(record, *idx)),
            YearSource::Deadline(idx) => parse_date_year(&cell(record, *idx)),
            YearSource::Fixed(year) => Some(*year),
        }
    }
}

/// Raw production rows plus the per-`(group, year, week)` sums.
#[derive(Debug, Clone, Default)]
pub struct ProductionData {
    pub rows: Vec<ProductionRow>,
    pub table: ProductionTable,
}

impl ProductionData {
    pub fn from_rows(rows: Vec<ProductionRow>) -> Self {
        let table = ProductionTable::from_rows(&rows);
        Self { rows, table }
    }
}

/// `fallback_year` is used only when no year-bearing column exists at all.
pub fn parse_production(
    bytes: &[u8],
    columns: &ProductionColumns,
    delimiter: u8,
    fallback_year: i32,
) -> Result<ProductionData, CapacityError> {
    let table = SourceTable::Production;
    let mut rdr = reader(bytes, delimiter);
    let headers = HeaderIndex::new(rdr.byte_headers()?);
    let idx = headers.require(
        table,
        &[
            ("group", columns.group.as_slice()),
            ("week", columns.week.as_slice()),
            ("workload", columns.workload.as_slice()),
        ],
    )?;
    let (group_idx, week_idx, workload_idx) = (idx[0], idx[1], idx[2]);

    let year_source = if let Some(i) = headers.find(&columns.year) {
        YearSource::Column(i)
    } else if let Some(i) = headers.find(&columns.year_month) {
        YearSource::YearMonth(i)
    } else if let Some(i) = headers.find(&columns.deadline) {
        YearSource::Deadline(i)
    } else {
        warn!(
            "{} table has no year column; assuming {} for every row",
            table, fallback_year
        );
        YearSource::Fixed(fallback_year)
    };
    let part_idx = headers.find(&columns.part_number);
    let order_idx = headers.find(&columns.order_id);

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (line, result) in rdr.byte_records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!("{} row {}: unreadable record: {}", table, line + 2, e);
                skipped += 1;
                continue;
            }
        };
        let group = cell(&record, group_idx);
        let week = parse_integer(&cell(&record, week_idx)).and_then(|w| u32::try_from(w).ok());
        let praca_tpz = parse_number(&cell(&record, workload_idx));
        let year = year_source.resolve(&record);
        match (group.is_empty(), week, year, praca_tpz) {
            (false, Some(week), Some(year), Some(praca_tpz)) => rows.push(ProductionRow {
                group,
                year,
                week,
                praca_tpz,
                part_number: optional_cell(&record, part_idx),
                order_id: optional_cell(&record, order_idx),
            }),
            _ => {
                debug!("{} row {}: skipped {:?}", table, line + 2, record);
                skipped += 1;
            }
        }
    }
    log_skipped(table, rows.len(), skipped);
    Ok(ProductionData::from_rows(rows))
}

/// Group -> text map. Unrecognized headers yield an empty map, not an error.
pub fn parse_lookup(
    bytes: &[u8],
    table: SourceTable,
    columns: &impl LookupColumns,
    delimiter: u8,
) -> Result<LookupMap, CapacityError> {
    let mut rdr = reader(bytes, delimiter);
    let headers = HeaderIndex::new(rdr.byte_headers()?);
    let fields = [
        ("group", columns.group()),
        ("value", columns.value()),
    ];
    let idx = match headers.require(table, &fields) {
        Ok(idx) => idx,
        Err(e) => {
            warn!("{}; continuing without {}", e, table);
            return Ok(LookupMap::new());
        }
    };

    let mut map = LookupMap::new();
    for result in rdr.byte_records() {
        let Ok(record) = result else { continue };
        let group = cell(&record, idx[0]);
        let value = cell(&record, idx[1]);
        if !group.is_empty() && !value.is_empty() {
            map.insert(&group, &value);
        }
    }
    info!("{} table: {} entr(ies)", table, map.len());
    Ok(map)
}
