//! Static country metadata (ISO-3166 alpha-2 code, display name, centroid).
//!
//! The table is loaded once and shared read-only; lookups by code and by name
//! are case-insensitive.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const BUILTIN_COUNTRY_INFO: &str = include_str!("data/country_info.json");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountryInfo {
    pub code: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl CountryInfo {
    pub fn centroid(&self) -> (f64, f64) {
        (self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    by_code: HashMap<String, CountryInfo>,
    // lowercase name -> uppercase code
    by_name: HashMap<String, String>,
}

impl Gazetteer {
    /// The country table compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_COUNTRY_INFO).context("failed to parse builtin country table")
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let entries: Vec<CountryInfo> = serde_json::from_str(contents)?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CountryInfo>) -> Self {
        let mut by_code = HashMap::new();
        let mut by_name = HashMap::new();
        for mut entry in entries {
            entry.code = entry.code.trim().to_ascii_uppercase();
            by_name.insert(entry.name.trim().to_lowercase(), entry.code.clone());
            by_code.insert(entry.code.clone(), entry);
        }
        Self { by_code, by_name }
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&CountryInfo> {
        self.by_code.get(&code.trim().to_ascii_uppercase())
    }

    pub fn name(&self, code: &str) -> Option<&str> {
        self.get(code).map(|info| info.name.as_str())
    }

    pub fn centroid(&self, code: &str) -> Option<(f64, f64)> {
        self.get(code).map(CountryInfo::centroid)
    }

    /// Exact code match first, then case-insensitive exact name match.
    pub fn find_code(&self, label: &str) -> Option<&str> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        if let Some(info) = self.get(label) {
            return Some(info.code.as_str());
        }
        self.by_name.get(&label.to_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CountryInfo> {
        self.by_code.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_loads() {
        let gazetteer = Gazetteer::builtin().expect("builtin table");
        assert!(gazetteer.len() > 50);
        assert_eq!(gazetteer.name("de"), Some("Germany"));
        let (lat, lon) = gazetteer.centroid("FR").expect("france centroid");
        assert!((lat - 46.2).abs() < 0.1 && (lon - 2.2).abs() < 0.1);
    }

    #[test]
    fn find_code_matches_code_and_name_case_insensitively() {
        let gazetteer = Gazetteer::builtin().unwrap();
        assert_eq!(gazetteer.find_code("DE"), Some("DE"));
        assert_eq!(gazetteer.find_code("de"), Some("DE"));
        assert_eq!(gazetteer.find_code("germany"), Some("DE"));
        assert_eq!(gazetteer.find_code("  South Africa "), Some("ZA"));
        assert_eq!(gazetteer.find_code("Atlantis"), None);
        assert_eq!(gazetteer.find_code(""), None);
    }

    #[test]
    fn from_entries_normalizes_codes() {
        let gazetteer = Gazetteer::from_entries(vec![CountryInfo {
            code: " nz".into(),
            name: "New Zealand".into(),
            lat: -40.9,
            lon: 174.9,
        }]);
        assert_eq!(gazetteer.find_code("NZ"), Some("NZ"));
        assert_eq!(gazetteer.find_code("new zealand"), Some("NZ"));
    }
}
