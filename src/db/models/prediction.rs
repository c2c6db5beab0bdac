use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The model's guess for a round, keyed by round id.
///
/// `distance_km` and `is_correct` are derived from the prediction and the
/// round's ground truth and are always written together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub round_id: String,
    pub inference_id: Option<String>,
    pub model_version: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub continent_id: Option<String>,
    pub continent_confidence: Option<f64>,
    pub country_id: Option<String>,
    pub country_confidence: Option<f64>,
    pub grid_l4: Option<String>,
    pub grid_l4_confidence: Option<f64>,
    pub grid_l6: Option<String>,
    pub grid_l6_confidence: Option<f64>,
    pub confidence_lat: Option<f64>,
    pub confidence_lon: Option<f64>,
    pub inference_time_ms: Option<i64>,
    pub extra_json: Option<String>,
    pub distance_km: Option<f64>,
    pub is_correct: Option<bool>,
    pub created_at: DateTime<Utc>,
}
