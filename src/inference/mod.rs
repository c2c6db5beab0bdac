//! Model client seam. The engine never loads weights itself; it asks a
//! [`ModelClient`] for a prediction per screenshot.

pub mod centroid;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use centroid::CentroidModelClient;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub confidence: Option<f64>,
}

impl Classification {
    pub fn new(id: impl Into<String>, name: Option<String>, confidence: f64) -> Self {
        Self {
            id: Some(id.into()),
            name,
            confidence: Some(confidence),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub inference_id: String,
    pub lat: f64,
    pub lon: f64,
    pub continent: Classification,
    pub country: Classification,
    pub grid_l4: Classification,
    pub grid_l6: Classification,
    pub confidence_lat: Option<f64>,
    pub confidence_lon: Option<f64>,
    pub model_version: String,
    pub inference_time_ms: i64,
    #[serde(default)]
    pub top_countries: Vec<Classification>,
    #[serde(default)]
    pub grid_polygon: Option<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub image: Vec<u8>,
    pub session_id: Option<String>,
    pub round_id: Option<String>,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    fn model_version(&self) -> &str;

    async fn predict(&self, request: &ModelRequest) -> Result<ModelPrediction>;
}
