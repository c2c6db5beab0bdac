use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::correlation::CachePolicy;

pub const DEFAULT_MODEL_VERSION: &str = "geovit-tinyvit-21m-v0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    /// Zero disables expiry.
    pub ttl_secs: u64,
    /// Zero disables the size bound.
    pub max_entries: usize,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 6 * 60 * 60,
            max_entries: 10_000,
        }
    }
}

impl CorrelationSettings {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs)),
            max_entries: (self.max_entries > 0).then_some(self.max_entries),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub dataset_path: PathBuf,
    pub coords_log_path: PathBuf,
    pub image_dir: PathBuf,
    pub geocoder_timeout_ms: u64,
    pub model_version: String,
    pub correlation: CorrelationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/geoloop.db"),
            dataset_path: PathBuf::from("data/dataset.jsonl"),
            coords_log_path: PathBuf::from("data/coords.jsonl"),
            image_dir: PathBuf::from("data/screenshots"),
            geocoder_timeout_ms: 2_000,
            model_version: DEFAULT_MODEL_VERSION.into(),
            correlation: CorrelationSettings::default(),
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file. A missing file yields defaults; an
    /// invalid one yields defaults with a warning. Environment overrides are
    /// applied on top either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = Self::from_file(path)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Ok(serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!(
                "Ignoring invalid settings file {}: {}",
                path.display(),
                err
            );
            Self::default()
        }))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup("GEOLOOP_DB_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("GEOLOOP_DATASET_PATH") {
            self.dataset_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("GEOLOOP_COORDS_LOG_PATH") {
            self.coords_log_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("IMAGE_STORAGE_DIR") {
            self.image_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("GEOLOOP_MODEL_VERSION") {
            self.model_version = value.trim().to_string();
        }
        if let Some(value) = lookup("GEOLOOP_GEOCODER_TIMEOUT_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.geocoder_timeout_ms = ms,
                Err(_) => warn!("Ignoring GEOLOOP_GEOCODER_TIMEOUT_MS={value}: not a number"),
            }
        }
    }

    pub fn geocoder_timeout(&self) -> Duration {
        Duration::from_millis(self.geocoder_timeout_ms)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.model_version, "geovit-tinyvit-21m-v0");
        assert_eq!(settings.geocoder_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn invalid_json_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::from_file(&path).unwrap(), Settings::default());
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"model_version":"v9","correlation":{"ttl_secs":0}}"#,
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.model_version, "v9");
        assert_eq!(settings.correlation.max_entries, 10_000);
        assert_eq!(settings.correlation.policy().ttl, None);
        assert_eq!(settings.correlation.policy().max_entries, Some(10_000));
        assert_eq!(settings.dataset_path, PathBuf::from("data/dataset.jsonl"));
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.geocoder_timeout_ms = 750;
        settings.save(&path).unwrap();
        assert_eq!(Settings::from_file(&path).unwrap(), settings);
    }

    #[test]
    fn env_overrides_replace_fields() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GEOLOOP_DB_PATH", "/tmp/g.db"),
            ("IMAGE_STORAGE_DIR", "/tmp/img"),
            ("GEOLOOP_MODEL_VERSION", " remote-v2 "),
            ("GEOLOOP_GEOCODER_TIMEOUT_MS", "150"),
            ("GEOLOOP_DATASET_PATH", "  "),
        ]);
        let mut settings = Settings::default();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.database_path, PathBuf::from("/tmp/g.db"));
        assert_eq!(settings.image_dir, PathBuf::from("/tmp/img"));
        assert_eq!(settings.model_version, "remote-v2");
        assert_eq!(settings.geocoder_timeout_ms, 150);
        assert_eq!(settings.dataset_path, Settings::default().dataset_path);
    }

    #[test]
    fn unparsable_timeout_override_is_ignored() {
        let mut settings = Settings::default();
        settings.apply_overrides(|key| {
            (key == "GEOLOOP_GEOCODER_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert_eq!(settings.geocoder_timeout_ms, 2_000);
    }
}
