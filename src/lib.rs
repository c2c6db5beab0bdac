pub mod commands;
pub mod correlation;
pub mod dataset;
pub mod db;
pub mod error;
pub mod geo;
pub mod inference;
pub mod reconcile;
pub mod settings;
pub mod storage;
pub mod utils;

use std::sync::Arc;

use anyhow::Result;
use log::info;

use correlation::CorrelationCache;
use dataset::{CoordinateLog, DatasetLogger};
use db::Database;
use geo::{CountryResolver, Gazetteer, GridAssigner, NearestCentroidGeocoder};
use inference::{CentroidModelClient, ModelClient};
use reconcile::RoundReconciler;
use settings::Settings;
use storage::ImageStore;

/// Everything the command layer needs, built once per process.
pub struct AppState {
    pub db: Database,
    pub cache: Arc<CorrelationCache>,
    pub resolver: Arc<CountryResolver>,
    pub grid: Arc<GridAssigner>,
    pub dataset: Arc<DatasetLogger>,
    pub coords_log: Arc<CoordinateLog>,
    pub images: ImageStore,
    pub model: Arc<dyn ModelClient>,
    pub reconciler: RoundReconciler,
    pub settings: Settings,
}

impl AppState {
    /// Opens the database and wires the offline collaborators: the
    /// nearest-centroid geocoder and the centroid model client.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let gazetteer = Arc::new(Gazetteer::builtin()?);
        let db = Database::new(settings.database_path.clone())?;

        let geocoder = Arc::new(NearestCentroidGeocoder::new(Arc::clone(&gazetteer)));
        let resolver = Arc::new(
            CountryResolver::new(Arc::clone(&gazetteer))
                .with_geocoder(geocoder)
                .with_timeout(settings.geocoder_timeout()),
        );
        let grid = Arc::new(GridAssigner::standard());
        let cache = Arc::new(CorrelationCache::with_policy(settings.correlation.policy()));
        let dataset = Arc::new(DatasetLogger::new(
            settings.dataset_path.clone(),
            Arc::clone(&grid),
        ));
        let coords_log = Arc::new(CoordinateLog::new(settings.coords_log_path.clone()));
        let images = ImageStore::new(settings.image_dir.clone(), Arc::clone(&gazetteer));
        let model: Arc<dyn ModelClient> = Arc::new(CentroidModelClient::new(
            Arc::clone(&gazetteer),
            settings.model_version.clone(),
        ));
        let reconciler = RoundReconciler::new(
            db.clone(),
            Arc::clone(&resolver),
            images.clone(),
            Arc::clone(&dataset),
            settings.model_version.clone(),
        );

        info!(
            "geoloop state ready (db {}, {} countries, model {})",
            db.path().display(),
            gazetteer.len(),
            model.model_version()
        );

        Ok(Self {
            db,
            cache,
            resolver,
            grid,
            dataset,
            coords_log,
            images,
            model,
            reconciler,
            settings,
        })
    }

    /// Swaps in a different model client, e.g. a remote endpoint.
    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = model;
        self
    }
}
