use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::prediction::Prediction;

/// One play round with its ground truth. Unique by `id`; later logs for the
/// same id update it in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub id: String,
    pub session_id: String,
    pub round_index: i64,
    pub gt_lat: f64,
    pub gt_lon: f64,
    pub gt_country: String,
    pub gt_continent: Option<String>,
    pub score: i64,
    pub screenshot_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Listing projection: a round plus its prediction, when one was logged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSummary {
    #[serde(flatten)]
    pub round: Round,
    pub prediction: Option<Prediction>,
}
