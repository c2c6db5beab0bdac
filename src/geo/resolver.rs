//! Country label normalization with a reverse-geocoding fallback.
//!
//! Resolution order: exact gazetteer code, case-insensitive country name, any
//! two-letter alphabetic label (accepted as-is), then the coordinates through the
//! configured [`ReverseGeocoder`]. Geocoder errors and timeouts never escape
//! [`CountryResolver::resolve`]; they read as "unresolved".

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{distance::haversine_km, gazetteer::Gazetteer};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Placeholder stored when no country can be resolved.
pub const UNKNOWN_COUNTRY: &str = "ZZ";

pub const DEFAULT_GEOCODER_TIMEOUT: Duration = Duration::from_millis(2_000);

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Country code for a coordinate, `Ok(None)` when nothing matches.
    async fn lookup(&self, lat: f64, lon: f64) -> Result<Option<String>>;
}

/// Offline geocoder that answers with the country whose centroid is closest.
pub struct NearestCentroidGeocoder {
    gazetteer: Arc<Gazetteer>,
    max_distance_km: Option<f64>,
}

impl NearestCentroidGeocoder {
    pub fn new(gazetteer: Arc<Gazetteer>) -> Self {
        Self {
            gazetteer,
            max_distance_km: None,
        }
    }

    pub fn with_max_distance(mut self, max_distance_km: f64) -> Self {
        self.max_distance_km = Some(max_distance_km);
        self
    }

    pub fn nearest(&self, lat: f64, lon: f64) -> Option<(&str, f64)> {
        let (info, distance) = self
            .gazetteer
            .iter()
            .map(|info| (info, haversine_km(lat, lon, info.lat, info.lon)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.code.cmp(&b.0.code)))?;

        match self.max_distance_km {
            Some(limit) if distance > limit => None,
            _ => Some((info.code.as_str(), distance)),
        }
    }
}

#[async_trait]
impl ReverseGeocoder for NearestCentroidGeocoder {
    async fn lookup(&self, lat: f64, lon: f64) -> Result<Option<String>> {
        Ok(self.nearest(lat, lon).map(|(code, _)| code.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionFailure {
    #[error("label did not match and no coordinates were given")]
    Unmatched,
    #[error("no reverse geocoder configured")]
    NoGeocoder,
    #[error("reverse geocoder failed: {0}")]
    GeocoderFailed(String),
    #[error("reverse geocoder returned no country")]
    GeocoderEmpty,
    #[error("reverse geocoder timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Clone)]
pub struct CountryResolver {
    gazetteer: Arc<Gazetteer>,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
    timeout: Duration,
}

impl CountryResolver {
    pub fn new(gazetteer: Arc<Gazetteer>) -> Self {
        Self {
            gazetteer,
            geocoder: None,
            timeout: DEFAULT_GEOCODER_TIMEOUT,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn gazetteer(&self) -> &Gazetteer {
        &self.gazetteer
    }

    /// Label-only normalization. Any two-letter alphabetic label is accepted even
    /// when it is not a known code, so typos such as "XX" pass through.
    pub fn normalize_label(&self, label: &str) -> Option<String> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        if let Some(code) = self.gazetteer.find_code(label) {
            return Some(code.to_string());
        }
        if label.len() == 2 && label.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(label.to_ascii_uppercase());
        }
        None
    }

    pub async fn try_resolve(
        &self,
        label: Option<&str>,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> Result<String, ResolutionFailure> {
        if let Some(code) = label.and_then(|label| self.normalize_label(label)) {
            return Ok(code);
        }

        match (finite(lat), finite(lon)) {
            (Some(lat), Some(lon)) => self.try_from_coords(lat, lon).await,
            _ => Err(ResolutionFailure::Unmatched),
        }
    }

    pub async fn resolve(&self, label: Option<&str>, lat: Option<f64>, lon: Option<f64>) -> Option<String> {
        match self.try_resolve(label, lat, lon).await {
            Ok(code) => Some(code),
            Err(failure) => {
                if matches!(
                    failure,
                    ResolutionFailure::GeocoderFailed(_) | ResolutionFailure::TimedOut(_)
                ) {
                    log_warn!("country resolution degraded to unresolved: {failure}");
                }
                None
            }
        }
    }

    /// Same as [`resolve`](Self::resolve) but substitutes [`UNKNOWN_COUNTRY`].
    pub async fn resolve_or_unknown(&self, label: Option<&str>, lat: Option<f64>, lon: Option<f64>) -> String {
        self.resolve(label, lat, lon)
            .await
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
    }

    pub async fn country_from_coords(&self, lat: f64, lon: f64) -> Option<String> {
        self.resolve(None, Some(lat), Some(lon)).await
    }

    /// Country hint from client metadata: the `street_view` object first, then
    /// `result_from_map`; each is tried by label, then by its lat/lon.
    pub async fn country_hint_from_metadata(&self, metadata: Option<&Value>) -> Option<String> {
        let metadata = metadata?.as_object()?;
        for key in ["street_view", "result_from_map"] {
            let Some(section) = metadata.get(key).and_then(Value::as_object) else {
                continue;
            };
            if let Some(code) = section
                .get("country")
                .and_then(Value::as_str)
                .and_then(|label| self.normalize_label(label))
            {
                return Some(code);
            }
            let lat = section.get("lat").and_then(Value::as_f64);
            let lon = section.get("lon").and_then(Value::as_f64);
            if let (Some(lat), Some(lon)) = (lat, lon) {
                return self.country_from_coords(lat, lon).await;
            }
        }
        None
    }

    async fn try_from_coords(&self, lat: f64, lon: f64) -> Result<String, ResolutionFailure> {
        let geocoder = self.geocoder.as_ref().ok_or(ResolutionFailure::NoGeocoder)?;

        match tokio::time::timeout(self.timeout, geocoder.lookup(lat, lon)).await {
            Err(_) => Err(ResolutionFailure::TimedOut(self.timeout)),
            Ok(Err(err)) => Err(ResolutionFailure::GeocoderFailed(format!("{err:#}"))),
            Ok(Ok(None)) => Err(ResolutionFailure::GeocoderEmpty),
            Ok(Ok(Some(code))) => {
                let code = code.trim().to_ascii_uppercase();
                if code.is_empty() {
                    Err(ResolutionFailure::GeocoderEmpty)
                } else {
                    Ok(code)
                }
            }
        }
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}
