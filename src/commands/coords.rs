use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    correlation::{sample::DEFAULT_SOURCE, CoordinateSample},
    error::{EngineError, EngineResult},
    geo::{LEVEL_COARSE, LEVEL_FINE},
    AppState,
};

pub const ACCEPTED: &str = "accepted";

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinateRequest {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub round_id: Option<String>,
    #[serde(default)]
    pub round_index: Option<i64>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinateResponse {
    pub status: String,
    pub lat: f64,
    pub lon: f64,
    pub logged_at: DateTime<Utc>,
    pub country: Option<String>,
    pub grid_l4: Option<String>,
    pub grid_l6: Option<String>,
    pub session_id: Option<String>,
    pub round_id: Option<String>,
}

/// Records a ground-truth coordinate: resolves its country and grid cells,
/// appends it to the coordinate log, and makes it available to later
/// inferences for the same round.
pub async fn ingest_coordinate(
    state: &AppState,
    request: CoordinateRequest,
) -> EngineResult<CoordinateResponse> {
    if !request.lat.is_finite() || !request.lon.is_finite() {
        return Err(EngineError::malformed("lat/lon must be finite numbers"));
    }

    let country = state
        .resolver
        .country_from_coords(request.lat, request.lon)
        .await;
    let grid_l4 = state
        .grid
        .assign(Some(request.lat), Some(request.lon), LEVEL_COARSE)
        .map(|cell| cell.id);
    let grid_l6 = state
        .grid
        .assign(Some(request.lat), Some(request.lon), LEVEL_FINE)
        .map(|cell| cell.id);

    let sample = CoordinateSample {
        lat: request.lat,
        lon: request.lon,
        source: request
            .source
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        captured_at: request.captured_at.unwrap_or_else(Utc::now),
        session_id: request.session_id,
        round_id: request.round_id,
        round_index: request.round_index,
        metadata: request.metadata.unwrap_or_default(),
        country,
        grid_l4,
        grid_l6,
    };

    let logged_at = state
        .coords_log
        .append_async(sample.clone())
        .await
        .map_err(EngineError::Storage)?;

    state.cache.put(
        sample.session_id.as_deref(),
        sample.round_id.as_deref(),
        sample.clone(),
    );

    Ok(CoordinateResponse {
        status: ACCEPTED.to_string(),
        lat: sample.lat,
        lon: sample.lon,
        logged_at,
        country: sample.country,
        grid_l4: sample.grid_l4,
        grid_l6: sample.grid_l6,
        session_id: sample.session_id,
        round_id: sample.round_id,
    })
}
