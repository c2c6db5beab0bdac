use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_SOURCE: &str = "extension";

/// A ground-truth coordinate reported by the client, plus the country and grid
/// cells resolved for it at ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinateSample {
    pub lat: f64,
    pub lon: f64,
    pub source: String,
    pub captured_at: DateTime<Utc>,
    pub session_id: Option<String>,
    pub round_id: Option<String>,
    pub round_index: Option<i64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub country: Option<String>,
    pub grid_l4: Option<String>,
    pub grid_l6: Option<String>,
}

impl CoordinateSample {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            source: DEFAULT_SOURCE.to_string(),
            captured_at: Utc::now(),
            session_id: None,
            round_id: None,
            round_index: None,
            metadata: Map::new(),
            country: None,
            grid_l4: None,
            grid_l6: None,
        }
    }

    pub fn for_round(mut self, session_id: impl Into<String>, round_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.round_id = Some(round_id.into());
        self
    }
}
