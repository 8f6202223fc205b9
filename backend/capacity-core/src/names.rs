// src/names.rs
//! Builds the `group,names` display-name table from a machine register export.
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{io_context, CapacityError};
use crate::ingest::normalize_header;

const EXCLUDED_NAMES: [&str; 2] = ["nan", "none"];

/// Group and device-name columns, by substring of the normalized header.
fn find_columns(headers: &[String]) -> (Option<usize>, Option<usize>) {
    let group = headers
        .iter()
        .position(|h| h.contains("grupa") && h.contains("zasob"))
        .or_else(|| headers.iter().position(|h| h.contains("grupa")))
        .or_else(|| headers.iter().position(|h| h == "group"));
    let name = headers
        .iter()
        .position(|h| h.contains("nazwa") && h.contains("urz"))
        .or_else(|| {
            headers
                .iter()
                .position(|h| h.contains("nazwa") || h.contains("urz"))
        })
        .or_else(|| headers.iter().position(|h| h == "name"));
    (group, name)
}

/// Group -> `;`-joined sorted unique names. Empty when no group column exists.
pub fn merge_names(bytes: &[u8], delimiter: u8) -> Result<BTreeMap<String, String>, CapacityError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers: Vec<String> = rdr
        .byte_headers()?
        .iter()
        .map(|h| normalize_header(&String::from_utf8_lossy(h)))
        .collect();
    let (group_idx, name_idx) = find_columns(&headers);
    let Some(group_idx) = group_idx else {
        warn!("No resource group column among {:?}", headers);
        return Ok(BTreeMap::new());
    };

    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for result in rdr.byte_records() {
        let Ok(record) = result else { continue };
        let field = |idx: usize| {
            record
                .get(idx)
                .map(|b| String::from_utf8_lossy(b).trim().to_string())
                .unwrap_or_default()
        };
        let group = field(group_idx);
        if group.is_empty() {
            continue;
        }
        let names = groups.entry(group).or_default();
        if let Some(idx) = name_idx {
            let name = field(idx);
            if !name.is_empty() && !EXCLUDED_NAMES.contains(&name.to_lowercase().as_str()) {
                names.insert(name);
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|(group, names)| (group, names.into_iter().collect::<Vec<_>>().join(";")))
        .collect())
}

fn write_table(
    output: &Path,
    merged: &BTreeMap<String, String>,
    delimiter: u8,
) -> Result<(), CapacityError> {
    // Read back with the same delimiter as every other source table.
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(output)?;
    wtr.write_record(["group", "names"])?;
    for (group, names) in merged {
        wtr.write_record([group.as_str(), names.as_str()])?;
    }
    wtr.flush()
        .map_err(|e| io_context(e, format!("Failed to flush {:?}", output)))?;
    Ok(())
}

/// Always leaves a `group,names` CSV at `output`; returns the group count.
pub fn merge_names_file(input: &Path, output: &Path, delimiter: u8) -> Result<usize, CapacityError> {
    let merged = if input.is_file() {
        let bytes = fs::read(input)
            .map_err(|e| io_context(e, format!("Failed to read {:?}", input)))?;
        merge_names(&bytes, delimiter)?
    } else {
        warn!("Name register {:?} not found; writing an empty table", input);
        BTreeMap::new()
    };
    write_table(output, &merged, delimiter)?;
    info!("Wrote {} group(s) to {:?}", merged.len(), output);
    Ok(merged.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("capacity-names-{}-{}", std::process::id(), name))
    }

    #[test]
    fn names_are_grouped_sorted_and_deduplicated() {
        let csv = "Grupa Zasobów,NazwaUrz.\n100,B\n100,A\n100,B\n200,C\n100,nan\n";
        let merged = merge_names(csv.as_bytes(), b',').unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["100"], "A;B");
        assert_eq!(merged["200"], "C");
    }

    #[test]
    fn misnamed_columns_are_still_found() {
        let csv = "GRUPA ZASOBOW,NAZWA_URZ\n100,\n100,2\n200,3\n";
        let merged = merge_names(csv.as_bytes(), b',').unwrap();
        assert_eq!(merged["100"], "2");
        assert_eq!(merged["200"], "3");
    }

    #[test]
    fn groups_without_names_are_kept_empty() {
        let csv = "grupa;inne\n100;x\n";
        let merged = merge_names(csv.as_bytes(), b';').unwrap();
        assert_eq!(merged["100"], "");
    }

    #[test]
    fn missing_group_column_yields_empty_table() {
        let merged = merge_names(b"kolumna,nazwa\n1,2\n", b',').unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn missing_input_writes_header_only_csv() {
        let output = scratch_file("empty.csv");
        let groups = merge_names_file(&scratch_file("nosuch.csv"), &output, b',').unwrap();
        assert_eq!(groups, 0);
        assert_eq!(fs::read_to_string(&output).unwrap(), "group,names\n");
    }

    #[test]
    fn merged_file_round_trips_through_display_name_parser() {
        let input = scratch_file("register.csv");
        let output = scratch_file("merged.csv");
        fs::write(&input, "Grupa zasobów,Nazwa urządzenia\n10243,Tokarka B\n10243,Tokarka A\n").unwrap();
        merge_names_file(&input, &output, b',').unwrap();

        let bytes = fs::read(&output).unwrap();
        let map = crate::ingest::parse_lookup(
            &bytes,
            crate::ingest::SourceTable::DisplayNames,
            &crate::ingest::ColumnAliases::default().display_names,
            b',',
        )
        .unwrap();
        assert_eq!(map.get_exact("10243"), Some("Tokarka A;Tokarka B"));
    }

    #[test]
    fn semicolon_delimited_table_round_trips_through_display_name_parser() {
        let input = scratch_file("register-semicolon.csv");
        let output = scratch_file("merged-semicolon.csv");
        fs::write(&input, "Grupa zasobów;Nazwa urządzenia\n10243;Tokarka A\n10250;Frezarka\n").unwrap();
        merge_names_file(&input, &output, b';').unwrap();
        assert!(fs::read_to_string(&output).unwrap().starts_with("group;names\n"));

        let bytes = fs::read(&output).unwrap();
        let map = crate::ingest::parse_lookup(
            &bytes,
            crate::ingest::SourceTable::DisplayNames,
            &crate::ingest::ColumnAliases::default().display_names,
            b';',
        )
        .unwrap();
        assert_eq!(map.get_exact("10243"), Some("Tokarka A"));
        assert_eq!(map.get_exact("10250"), Some("Frezarka"));
    }

    #[test]
    fn joined_names_are_quoted_under_semicolon_delimiter() {
        let input = scratch_file("register-joined.csv");
        let output = scratch_file("merged-joined.csv");
        fs::write(&input, "grupa;nazwa urz\n10243;Tokarka B\n10243;Tokarka A\n").unwrap();
        merge_names_file(&input, &output, b';').unwrap();
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "group;names\n10243;\"Tokarka A;Tokarka B\"\n"
        );

        let bytes = fs::read(&output).unwrap();
        let map = crate::ingest::parse_lookup(
            &bytes,
            crate::ingest::SourceTable::DisplayNames,
            &crate::ingest::ColumnAliases::default().display_names,
            b';',
        )
        .unwrap();
        assert_eq!(map.get_exact("10243"), Some("Tokarka A;Tokarka B"));
    }
}
