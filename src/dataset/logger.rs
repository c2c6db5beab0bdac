//! Training-sample log. One JSON object per line, never rewritten.
//!
//! Every record carries the full `ground_truth` and `prediction` objects with
//! absent values as `null`, so downstream readers see one schema regardless of
//! which flow produced the line.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::jsonl::{read_jsonl, JsonlWriter};
use crate::geo::{GridAssigner, GridBounds, LEVEL_COARSE, LEVEL_FINE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Screenshot,
    Inference,
    Round,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthSnapshot {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub country: Option<String>,
    pub continent: Option<String>,
    pub grid_l4: Option<String>,
    pub grid_l4_bounds: Option<GridBounds>,
    pub grid_l6: Option<String>,
    pub grid_l6_bounds: Option<GridBounds>,
}

impl GroundTruthSnapshot {
    pub fn at(lat: f64, lon: f64) -> Self {
        Self {
            lat: Some(lat),
            lon: Some(lon),
            ..Self::default()
        }
    }

    /// Reads `lat`, `lon`, `country` and `continent` from a loose JSON object,
    /// accepting numbers encoded as strings.
    pub fn from_json(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            lat: value.get("lat").and_then(loose_f64),
            lon: value.get("lon").and_then(loose_f64),
            country: text("country"),
            continent: text("continent"),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSnapshot {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub country_id: Option<String>,
    pub country_confidence: Option<f64>,
    pub continent_id: Option<String>,
    pub continent_confidence: Option<f64>,
    pub grid_l4: Option<String>,
    pub grid_l4_confidence: Option<f64>,
    pub grid_l6: Option<String>,
    pub grid_l6_confidence: Option<f64>,
    pub confidence_lat: Option<f64>,
    pub confidence_lon: Option<f64>,
    pub inference_id: Option<String>,
    pub model_version: Option<String>,
    pub extra: Option<Value>,
    pub extra_raw: Option<String>,
}

impl PredictionSnapshot {
    /// Attaches an opaque payload: parsed into `extra` when it is JSON, kept
    /// verbatim in `extra_raw` otherwise.
    pub fn with_extra_json(mut self, raw: Option<&str>) -> Self {
        if let Some(raw) = raw {
            match serde_json::from_str::<Value>(raw) {
                Ok(parsed) => self.extra = Some(parsed),
                Err(_) => self.extra_raw = Some(raw.to_string()),
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    #[serde(rename = "type")]
    pub sample_type: SampleType,
    pub session_id: Option<String>,
    pub round_id: Option<String>,
    pub round_index: Option<i64>,
    pub screenshot_path: Option<String>,
    pub logged_at: DateTime<Utc>,
    #[serde(default)]
    pub ground_truth: GroundTruthSnapshot,
    #[serde(default)]
    pub prediction: PredictionSnapshot,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub image_exists: bool,
}

/// Input to [`DatasetLogger::append`].
#[derive(Debug, Clone)]
pub struct NewSample {
    pub sample_type: SampleType,
    pub session_id: Option<String>,
    pub round_id: Option<String>,
    pub round_index: Option<i64>,
    pub screenshot_path: Option<String>,
    pub ground_truth: Option<GroundTruthSnapshot>,
    pub prediction: Option<PredictionSnapshot>,
    pub metadata: Option<Map<String, Value>>,
}

impl NewSample {
    pub fn new(sample_type: SampleType) -> Self {
        Self {
            sample_type,
            session_id: None,
            round_id: None,
            round_index: None,
            screenshot_path: None,
            ground_truth: None,
            prediction: None,
            metadata: None,
        }
    }
}

pub struct DatasetLogger {
    writer: JsonlWriter,
    grid: Arc<GridAssigner>,
}

impl DatasetLogger {
    pub fn new(path: PathBuf, grid: Arc<GridAssigner>) -> Self {
        Self {
            writer: JsonlWriter::new(path),
            grid,
        }
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Grid cells are always derived here from the ground-truth coordinate;
    /// caller-supplied cell fields are discarded.
    pub fn append(&self, sample: NewSample) -> Result<DatasetEntry> {
        let mut ground_truth = sample.ground_truth.unwrap_or_default();
        ground_truth.lat = ground_truth.lat.filter(|v| v.is_finite());
        ground_truth.lon = ground_truth.lon.filter(|v| v.is_finite());

        let coarse = self.grid.assign(ground_truth.lat, ground_truth.lon, LEVEL_COARSE);
        let fine = self.grid.assign(ground_truth.lat, ground_truth.lon, LEVEL_FINE);
        (ground_truth.grid_l4, ground_truth.grid_l4_bounds) = split_cell(coarse);
        (ground_truth.grid_l6, ground_truth.grid_l6_bounds) = split_cell(fine);

        let image_exists = sample
            .screenshot_path
            .as_deref()
            .is_some_and(|path| !path.is_empty() && Path::new(path).exists());

        let entry = DatasetEntry {
            sample_type: sample.sample_type,
            session_id: sample.session_id,
            round_id: sample.round_id,
            round_index: sample.round_index,
            screenshot_path: sample.screenshot_path,
            logged_at: Utc::now(),
            ground_truth,
            prediction: sample.prediction.unwrap_or_default(),
            metadata: sample.metadata.filter(|m| !m.is_empty()),
            image_exists,
        };

        self.writer.append(&entry)?;
        log::debug!(
            "Dataset entry appended ({:?}) for round {:?}",
            entry.sample_type,
            entry.round_id
        );
        Ok(entry)
    }

    /// [`append`](Self::append) on the blocking pool, for async callers.
    pub async fn append_async(self: &Arc<Self>, sample: NewSample) -> Result<DatasetEntry> {
        let logger = Arc::clone(self);
        tokio::task::spawn_blocking(move || logger.append(sample))
            .await
            .context("dataset append worker failed")?
    }

    pub fn read_entries(&self) -> Result<Vec<DatasetEntry>> {
        read_entries(self.path())
    }
}

pub fn read_entries(path: &Path) -> Result<Vec<DatasetEntry>> {
    read_jsonl(path)
}

fn split_cell(cell: Option<crate::geo::GridCell>) -> (Option<String>, Option<GridBounds>) {
    match cell {
        Some(cell) => (Some(cell.id), Some(cell.bounds)),
        None => (None, None),
    }
}

fn loose_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}
