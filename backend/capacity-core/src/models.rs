// src/models.rs
use serde::Serialize;
use std::collections::BTreeMap;

// --- Source Table Rows ---

/// One device/week row of the availability table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityRecord {
    pub device: String,
    pub week: u32,
    pub year: i32,
    pub hours: f64,
}

/// One raw row of the production report, before aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionRow {
    pub group: String,
    pub year: i32,
    pub week: u32,
    pub praca_tpz: f64,
    pub part_number: Option<String>,
    pub order_id: Option<String>,
}

/// Workload summed per `(group, year, week)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionRecord {
    pub group: String,
    pub year: i32,
    pub week: u32,
    pub praca_tpz: f64,
}

/// Lowercased-key text lookup (department or display name per group).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupMap {
    entries: BTreeMap<String, String>,
}

impl LookupMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        let key = normalize_key(key);
        if key.is_empty() {
            return;
        }
        self.entries.insert(key, value.trim().to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_exact(&self, key: &str) -> Option<&str> {
        self.entries.get(&normalize_key(key)).map(String::as_str)
    }

    /// Exact key first, then the first key (in key order) containing `key`.
    pub fn get_exact_or_contains(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        if key.is_empty() {
            return None;
        }
        if let Some(v) = self.entries.get(&key) {
            return Some(v.as_str());
        }
        self.entries
            .iter()
            .find(|(k, _)| k.contains(key.as_str()))
            .map(|(_, v)| v.as_str())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for LookupMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = LookupMap::new();
        for (k, v) in iter {
            map.insert(k.as_ref(), v.as_ref());
        }
        map
    }
}

/// Compare key for free-text device/group identifiers.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_exact_key() {
        let map: LookupMap = [("10250", "Frezowanie"), ("10250_X", "Inny")]
            .into_iter()
            .collect();
        assert_eq!(map.get_exact_or_contains(" 10250 "), Some("Frezowanie"));
    }

    #[test]
    fn lookup_falls_back_to_containing_key() {
        let map: LookupMap = [("10250_Frezarki", "Frezowanie")].into_iter().collect();
        assert_eq!(map.get_exact("10250"), None);
        assert_eq!(map.get_exact_or_contains("10250"), Some("Frezowanie"));
        assert_eq!(map.get_exact_or_contains(""), None);
    }
}
