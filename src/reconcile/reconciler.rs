use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use serde_json::{json, Map};

use super::types::{RoundLogRequest, RoundLogResponse};
use crate::{
    dataset::{DatasetLogger, GroundTruthSnapshot, NewSample, PredictionSnapshot, SampleType},
    db::{
        models::{GameSession, Prediction, Round},
        Database, RoundWrite,
    },
    error::{EngineError, EngineResult},
    geo::{score_guess, CountryResolver, UNKNOWN_COUNTRY},
    log_error, log_info, log_warn,
    storage::{images::UNKNOWN_SEGMENT, ImageStore},
};

const ENABLE_LOGS: bool = true;

/// Joins a round's ground truth with the model's guess: resolves the country,
/// scores the guess, upserts the round and prediction, and records a "round"
/// dataset sample.
pub struct RoundReconciler {
    db: Database,
    resolver: Arc<CountryResolver>,
    images: ImageStore,
    dataset: Arc<DatasetLogger>,
    default_model_version: String,
}

impl RoundReconciler {
    pub fn new(
        db: Database,
        resolver: Arc<CountryResolver>,
        images: ImageStore,
        dataset: Arc<DatasetLogger>,
        default_model_version: impl Into<String>,
    ) -> Self {
        Self {
            db,
            resolver,
            images,
            dataset,
            default_model_version: default_model_version.into(),
        }
    }

    pub async fn reconcile(&self, request: RoundLogRequest) -> EngineResult<RoundLogResponse> {
        validate(&request)?;
        let RoundLogRequest {
            session_id,
            round_id,
            round_index,
            ground_truth,
            prediction,
            score,
            screenshot_path,
            mode,
            player,
        } = request;

        let country = self
            .resolver
            .resolve_or_unknown(
                ground_truth.country.as_deref(),
                Some(ground_truth.lat),
                Some(ground_truth.lon),
            )
            .await;

        // (original, relocated) so a failed upsert can put the file back.
        let relocation = match screenshot_path.filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                let bucket = if country == UNKNOWN_COUNTRY {
                    UNKNOWN_SEGMENT.to_string()
                } else {
                    country.clone()
                };
                let original = PathBuf::from(path);
                let moved = self.images.relocate(original.clone(), bucket).await;
                Some((original, moved))
            }
            None => None,
        };
        let screenshot_path = relocation
            .as_ref()
            .map(|(_, moved)| moved.to_string_lossy().into_owned());

        let predicted = (
            prediction.lat.filter(|v| v.is_finite()),
            prediction.lon.filter(|v| v.is_finite()),
        );
        let scored = score_guess(predicted, (Some(ground_truth.lat), Some(ground_truth.lon)));

        let now = Utc::now();
        let session = GameSession {
            id: session_id.clone(),
            started_at: ground_truth.captured_at.unwrap_or(now),
            mode,
            player,
        };
        let round = Round {
            id: round_id.clone(),
            session_id: session_id.clone(),
            round_index,
            gt_lat: ground_truth.lat,
            gt_lon: ground_truth.lon,
            gt_country: country.clone(),
            gt_continent: ground_truth.continent.clone(),
            score,
            screenshot_path,
            created_at: now,
        };
        let model_version = prediction
            .model_version
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.default_model_version.clone());
        let record = Prediction {
            round_id: round_id.clone(),
            inference_id: prediction.inference_id.clone(),
            model_version,
            lat: predicted.0,
            lon: predicted.1,
            continent_id: prediction.continent.id.clone(),
            continent_confidence: prediction.continent.confidence,
            country_id: prediction.country.id.clone(),
            country_confidence: prediction.country.confidence,
            grid_l4: prediction.grid_l4.id.clone(),
            grid_l4_confidence: prediction.grid_l4.confidence,
            grid_l6: prediction.grid_l6.id.clone(),
            grid_l6_confidence: prediction.grid_l6.confidence,
            confidence_lat: prediction.confidence_lat,
            confidence_lon: prediction.confidence_lon,
            inference_time_ms: prediction.inference_time_ms,
            extra_json: prediction.extra_json.clone(),
            distance_km: scored.map(|(distance, _)| distance),
            is_correct: scored.map(|(_, correct)| correct),
            created_at: now,
        };

        let written = match self
            .db
            .upsert_round_with_prediction(session, round, record)
            .await
        {
            Ok(written) => written,
            Err(err) => {
                if let Some((original, moved)) = relocation {
                    if let Err(restore_err) = self.images.move_back(moved, original).await {
                        log_error!(
                            "Screenshot for round {} left unrestored: {:#}",
                            round_id,
                            restore_err
                        );
                    }
                }
                return Err(EngineError::Storage(err));
            }
        };

        log_info!(
            "Round {} logged (new={}, distance={:?})",
            round_id,
            written.stored_round,
            written.prediction.distance_km
        );

        if let Err(err) = self.append_sample(&written, ground_truth.continent.clone()).await {
            log_warn!("Failed to append round dataset entry for {}: {:#}", round_id, err);
        }

        Ok(RoundLogResponse {
            round_id,
            session_id,
            stored_round: written.stored_round,
            stored_prediction: written.stored_prediction,
            distance_km: written.prediction.distance_km,
            is_correct: written.prediction.is_correct,
            score,
        })
    }

    async fn append_sample(
        &self,
        written: &RoundWrite,
        continent: Option<String>,
    ) -> anyhow::Result<()> {
        let round = &written.round;
        let prediction = &written.prediction;

        let mut metadata = Map::new();
        metadata.insert("source".into(), json!("round_log"));
        metadata.insert("score".into(), json!(round.score));
        metadata.insert("distance_km".into(), json!(prediction.distance_km));
        metadata.insert("is_correct".into(), json!(prediction.is_correct));

        let snapshot = PredictionSnapshot {
            lat: prediction.lat,
            lon: prediction.lon,
            country_id: prediction.country_id.clone(),
            country_confidence: prediction.country_confidence,
            continent_id: prediction.continent_id.clone(),
            continent_confidence: prediction.continent_confidence,
            grid_l4: prediction.grid_l4.clone(),
            grid_l4_confidence: prediction.grid_l4_confidence,
            grid_l6: prediction.grid_l6.clone(),
            grid_l6_confidence: prediction.grid_l6_confidence,
            confidence_lat: prediction.confidence_lat,
            confidence_lon: prediction.confidence_lon,
            inference_id: prediction.inference_id.clone(),
            model_version: Some(prediction.model_version.clone()),
            ..PredictionSnapshot::default()
        }
        .with_extra_json(prediction.extra_json.as_deref());

        let sample = NewSample {
            session_id: Some(round.session_id.clone()),
            round_id: Some(round.id.clone()),
            round_index: Some(round.round_index),
            screenshot_path: round.screenshot_path.clone(),
            ground_truth: Some(GroundTruthSnapshot {
                country: Some(round.gt_country.clone()),
                continent,
                ..GroundTruthSnapshot::at(round.gt_lat, round.gt_lon)
            }),
            prediction: Some(snapshot),
            metadata: Some(metadata),
            ..NewSample::new(SampleType::Round)
        };
        self.dataset.append_async(sample).await?;
        Ok(())
    }
}

fn validate(request: &RoundLogRequest) -> EngineResult<()> {
    if request.session_id.trim().is_empty() {
        return Err(EngineError::malformed("session_id must not be empty"));
    }
    if request.round_id.trim().is_empty() {
        return Err(EngineError::malformed("round_id must not be empty"));
    }
    let gt = &request.ground_truth;
    if !gt.lat.is_finite() || !gt.lon.is_finite() {
        return Err(EngineError::malformed(
            "ground_truth lat/lon must be finite numbers",
        ));
    }
    Ok(())
}
