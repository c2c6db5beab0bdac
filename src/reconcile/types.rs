use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::Classification;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub continent: Option<String>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionPayload {
    pub inference_id: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub continent: Classification,
    pub country: Classification,
    pub grid_l4: Classification,
    pub grid_l6: Classification,
    pub confidence_lat: Option<f64>,
    pub confidence_lon: Option<f64>,
    pub model_version: Option<String>,
    pub inference_time_ms: Option<i64>,
    pub extra_json: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundLogRequest {
    pub session_id: String,
    pub round_id: String,
    pub round_index: i64,
    pub ground_truth: GroundTruth,
    #[serde(default)]
    pub prediction: PredictionPayload,
    pub score: i64,
    #[serde(default)]
    pub screenshot_path: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub player: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundLogResponse {
    pub round_id: String,
    pub session_id: String,
    pub stored_round: bool,
    pub stored_prediction: bool,
    pub distance_km: Option<f64>,
    pub is_correct: Option<bool>,
    pub score: i64,
}
