use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    correlation::CoordinateSample,
    dataset::{GroundTruthSnapshot, NewSample, PredictionSnapshot, SampleType},
    error::{EngineError, EngineResult},
    inference::{ModelPrediction, ModelRequest},
    log_info, log_warn,
    storage::{decode_base64, sniff_format},
    AppState,
};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceRequest {
    pub image_base64: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub round_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InferenceResponse {
    #[serde(flatten)]
    pub prediction: ModelPrediction,
    pub screenshot_path: String,
    pub phash: String,
    /// Coordinate cached for this round at inference time, if any.
    pub ground_truth: Option<CoordinateSample>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotRequest {
    pub image_base64: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub round_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenshotResponse {
    pub screenshot_path: String,
    pub session_id: Option<String>,
    pub round_id: Option<String>,
    pub phash: String,
}

/// Runs the model on a screenshot, stores it, and records an "inference"
/// sample joined with whatever ground truth the cache holds for the round.
pub async fn run_inference(
    state: &AppState,
    request: InferenceRequest,
) -> EngineResult<InferenceResponse> {
    let image = decode_base64(&request.image_base64)?;
    sniff_format(&image)?;

    let model_request = ModelRequest {
        image,
        session_id: request.session_id.clone(),
        round_id: request.round_id.clone(),
    };
    let prediction = state
        .model
        .predict(&model_request)
        .await
        .map_err(EngineError::ModelUnavailable)?;

    let cached = state
        .cache
        .get(request.session_id.as_deref(), request.round_id.as_deref());

    let country_hint = match cached.as_ref().and_then(|c| c.country.clone()) {
        Some(country) => Some(country),
        None => {
            state
                .resolver
                .country_hint_from_metadata(request.metadata.as_ref())
                .await
        }
    };

    let stored = state
        .images
        .save(model_request.image, request.round_id.clone(), country_hint)
        .await?;
    let screenshot_path = stored.path.to_string_lossy().into_owned();

    let mut metadata = object_or_empty(request.metadata);
    let street_view = merge_street_view(&mut metadata, cached.as_ref());

    let ground_truth = match cached.as_ref() {
        Some(sample) => GroundTruthSnapshot {
            country: sample.country.clone(),
            ..GroundTruthSnapshot::at(sample.lat, sample.lon)
        },
        None => street_view
            .as_ref()
            .map(GroundTruthSnapshot::from_json)
            .unwrap_or_default(),
    };
    let round_index = cached
        .as_ref()
        .and_then(|sample| sample.round_index)
        .or_else(|| metadata.get("round_index").and_then(Value::as_i64));

    let mut entry_metadata = Map::new();
    entry_metadata.insert("source".into(), json!("inference"));
    entry_metadata.insert("street_view".into(), street_view.unwrap_or(Value::Null));
    entry_metadata.insert("phash".into(), json!(stored.phash));

    let sample = NewSample {
        session_id: request.session_id.clone(),
        round_id: request.round_id.clone(),
        round_index,
        screenshot_path: Some(screenshot_path.clone()),
        ground_truth: Some(ground_truth),
        prediction: Some(prediction_snapshot(&prediction)),
        metadata: Some(entry_metadata),
        ..NewSample::new(SampleType::Inference)
    };
    if let Err(err) = state.dataset.append_async(sample).await {
        log_warn!("Failed to append inference sample: {err:#}");
    }

    log_info!(
        "Inference {} for round {:?}: {:?} ({} ms)",
        prediction.inference_id,
        request.round_id,
        prediction.country.id,
        prediction.inference_time_ms
    );

    Ok(InferenceResponse {
        prediction,
        screenshot_path,
        phash: stored.phash,
        ground_truth: cached,
        metadata,
    })
}

/// Stores a screenshot without running the model.
pub async fn store_screenshot(
    state: &AppState,
    request: ScreenshotRequest,
) -> EngineResult<ScreenshotResponse> {
    let image = decode_base64(&request.image_base64)?;

    let country_hint = state
        .resolver
        .country_hint_from_metadata(request.metadata.as_ref())
        .await;
    let stored = state
        .images
        .save(image, request.round_id.clone(), country_hint)
        .await?;
    let screenshot_path = stored.path.to_string_lossy().into_owned();

    let mut metadata = object_or_empty(request.metadata);
    let ground_truth = metadata
        .get("street_view")
        .map(GroundTruthSnapshot::from_json)
        .unwrap_or_default();
    let round_index = metadata.get("round_index").and_then(Value::as_i64);
    metadata.insert("phash".into(), json!(stored.phash));

    let sample = NewSample {
        session_id: request.session_id.clone(),
        round_id: request.round_id.clone(),
        round_index,
        screenshot_path: Some(screenshot_path.clone()),
        ground_truth: Some(ground_truth),
        metadata: Some(metadata),
        ..NewSample::new(SampleType::Screenshot)
    };
    if let Err(err) = state.dataset.append_async(sample).await {
        log_warn!("Failed to append screenshot sample: {err:#}");
    }

    Ok(ScreenshotResponse {
        screenshot_path,
        session_id: request.session_id,
        round_id: request.round_id,
        phash: stored.phash,
    })
}

fn object_or_empty(value: Option<Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Writes the cached coordinate into `metadata.street_view` and returns the
/// resulting object. Cached values win over client-supplied ones.
fn merge_street_view(
    metadata: &mut Map<String, Value>,
    cached: Option<&CoordinateSample>,
) -> Option<Value> {
    let Some(sample) = cached else {
        return metadata.get("street_view").cloned();
    };

    let mut street_view = match metadata.remove("street_view") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    street_view.insert("lat".into(), json!(sample.lat));
    street_view.insert("lon".into(), json!(sample.lon));
    for (key, value) in [
        ("country", &sample.country),
        ("grid_l4", &sample.grid_l4),
        ("grid_l6", &sample.grid_l6),
    ] {
        if let Some(value) = value {
            street_view.insert(key.into(), json!(value));
        }
    }
    if let Some(index) = sample.round_index {
        street_view.insert("round_index".into(), json!(index));
    }

    let merged = Value::Object(street_view);
    metadata.insert("street_view".into(), merged.clone());
    Some(merged)
}

fn prediction_snapshot(prediction: &ModelPrediction) -> PredictionSnapshot {
    PredictionSnapshot {
        lat: Some(prediction.lat).filter(|v| v.is_finite()),
        lon: Some(prediction.lon).filter(|v| v.is_finite()),
        country_id: prediction.country.id.clone(),
        country_confidence: prediction.country.confidence,
        continent_id: prediction.continent.id.clone(),
        continent_confidence: prediction.continent.confidence,
        grid_l4: prediction.grid_l4.id.clone(),
        grid_l4_confidence: prediction.grid_l4.confidence,
        grid_l6: prediction.grid_l6.id.clone(),
        grid_l6_confidence: prediction.grid_l6.confidence,
        confidence_lat: prediction.confidence_lat,
        confidence_lon: prediction.confidence_lon,
        inference_id: Some(prediction.inference_id.clone()),
        model_version: Some(prediction.model_version.clone()),
        extra: Some(json!({
            "top_countries": prediction.top_countries,
            "inference_time_ms": prediction.inference_time_ms,
        })),
        extra_raw: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    use super::*;
    use crate::{
        commands::tests::test_state,
        inference::ModelClient,
        storage::phash::tests::png_bytes,
    };

    struct OfflineModel;

    #[async_trait]
    impl ModelClient for OfflineModel {
        fn model_version(&self) -> &str {
            "offline"
        }

        async fn predict(&self, _request: &ModelRequest) -> Result<ModelPrediction> {
            Err(anyhow!("connection refused"))
        }
    }

    fn encoded_png() -> String {
        STANDARD.encode(png_bytes(16, 16, 7))
    }

    fn inference_request(metadata: Option<Value>) -> InferenceRequest {
        InferenceRequest {
            image_base64: encoded_png(),
            session_id: Some("s1".into()),
            round_id: Some("r1".into()),
            metadata,
        }
    }

    #[tokio::test]
    async fn cached_ground_truth_joins_the_inference_sample() {
        let (_dir, state) = test_state();
        let mut cached = CoordinateSample::new(46.5, 2.5).for_round("s1", "r1");
        cached.country = Some("FR".into());
        cached.round_index = Some(3);
        state.cache.put(Some("s1"), Some("r1"), cached);

        let response = run_inference(&state, inference_request(None)).await.unwrap();

        assert!(response.screenshot_path.contains("/FR/"), "{}", response.screenshot_path);
        assert_eq!(response.ground_truth.as_ref().unwrap().lat, 46.5);
        // The model's guess is returned untouched.
        assert_ne!(response.prediction.lat, 46.5);
        assert_eq!(response.metadata["street_view"]["country"], "FR");

        let entries = state.dataset.read_entries().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.sample_type, SampleType::Inference);
        assert_eq!(entry.round_index, Some(3));
        assert_eq!(entry.ground_truth.lat, Some(46.5));
        assert_eq!(entry.ground_truth.grid_l4.as_deref(), Some("grid_l4_europe_core_045_060"));
        assert_eq!(
            entry.prediction.inference_id.as_deref(),
            Some(response.prediction.inference_id.as_str())
        );
        assert!(entry.image_exists);
        let metadata = entry.metadata.as_ref().unwrap();
        assert_eq!(metadata["source"], "inference");
        assert_eq!(metadata["phash"], json!(response.phash));
    }

    #[tokio::test]
    async fn metadata_hint_is_used_without_cache() {
        let (_dir, state) = test_state();
        let metadata = json!({"street_view": {"lat": "52.0", "lon": 10.0, "country": "Germany"}});
        let response = run_inference(&state, inference_request(Some(metadata))).await.unwrap();

        assert!(response.screenshot_path.contains("/DE/"), "{}", response.screenshot_path);
        assert!(response.ground_truth.is_none());

        let entry = &state.dataset.read_entries().unwrap()[0];
        assert_eq!(entry.ground_truth.lat, Some(52.0));
        assert_eq!(entry.ground_truth.country.as_deref(), Some("Germany"));
    }

    #[tokio::test]
    async fn bad_images_are_client_errors() {
        let (_dir, state) = test_state();

        let mut request = inference_request(None);
        request.image_base64 = "%%%".into();
        let err = run_inference(&state, request).await.unwrap_err();
        assert!(err.is_client_error());

        let mut request = inference_request(None);
        request.image_base64 = STANDARD.encode(b"just some text");
        let err = run_inference(&state, request).await.unwrap_err();
        assert_eq!(err.code(), "malformed_input");

        assert!(state.dataset.read_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_failure_is_reported_and_nothing_is_stored() {
        let (_dir, state) = test_state();
        let state = state.with_model(Arc::new(OfflineModel));

        let err = run_inference(&state, inference_request(None)).await.unwrap_err();
        assert_eq!(err.code(), "model_unavailable");
        assert!(!state.images.root().exists());
        assert!(state.dataset.read_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn screenshot_sample_takes_ground_truth_from_metadata() {
        let (_dir, state) = test_state();
        let response = store_screenshot(
            &state,
            ScreenshotRequest {
                image_base64: encoded_png(),
                session_id: Some("s1".into()),
                round_id: Some("r2".into()),
                metadata: Some(json!({
                    "round_index": 4,
                    "street_view": {"lat": 35.68, "lon": 139.69},
                })),
            },
        )
        .await
        .unwrap();

        assert!(response.screenshot_path.contains("/JP/"), "{}", response.screenshot_path);
        assert!(!response.phash.is_empty());

        let entry = &state.dataset.read_entries().unwrap()[0];
        assert_eq!(entry.sample_type, SampleType::Screenshot);
        assert_eq!(entry.round_index, Some(4));
        assert_eq!(entry.ground_truth.lat, Some(35.68));
        assert!(entry.ground_truth.grid_l6.as_deref().unwrap().starts_with("grid_l6_east_asia_"));
        assert_eq!(entry.prediction, PredictionSnapshot::default());
        assert_eq!(entry.metadata.as_ref().unwrap()["phash"], json!(response.phash));
    }
}
