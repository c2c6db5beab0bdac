//! Offline stand-in model: guesses one of a handful of countries, seeded from
//! the image bytes, and answers with that country's centroid.

use std::{sync::Arc, time::Instant};

use anyhow::{ensure, Result};
use async_trait::async_trait;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use uuid::Uuid;

use super::{Classification, ModelClient, ModelPrediction, ModelRequest};
use crate::geo::Gazetteer;

const COUNTRY_CHOICES: [(&str, &str); 10] = [
    ("Czechia", "CZ"),
    ("Romania", "RO"),
    ("Hungary", "HU"),
    ("Germany", "DE"),
    ("France", "FR"),
    ("Brazil", "BR"),
    ("Japan", "JP"),
    ("Canada", "CA"),
    ("Australia", "AU"),
    ("South Africa", "ZA"),
];

const TOP_K: usize = 3;
const POLYGON_DELTA: f64 = 1.5;

pub struct CentroidModelClient {
    gazetteer: Arc<Gazetteer>,
    model_version: String,
}

impl CentroidModelClient {
    pub fn new(gazetteer: Arc<Gazetteer>, model_version: impl Into<String>) -> Self {
        Self {
            gazetteer,
            model_version: model_version.into(),
        }
    }

    fn predict_sync(&self, image: &[u8]) -> ModelPrediction {
        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(seed_for(image));

        let mut lat = rng.gen_range(-85.0..85.0);
        let mut lon = rng.gen_range(-180.0..180.0);

        let mut confidences: Vec<f64> = (0..TOP_K).map(|_| round3(rng.gen())).collect();
        confidences.sort_by(|a, b| b.total_cmp(a));
        let top_countries: Vec<Classification> = COUNTRY_CHOICES
            .choose_multiple(&mut rng, TOP_K)
            .zip(confidences)
            .map(|((name, code), confidence)| {
                let name = self.gazetteer.name(code).unwrap_or(*name).to_string();
                Classification::new(*code, Some(name), confidence)
            })
            .collect();

        let country = top_countries.first().cloned().unwrap_or_default();
        if let Some((c_lat, c_lon)) = country.id.as_deref().and_then(|code| self.gazetteer.centroid(code)) {
            lat = c_lat;
            lon = c_lon;
        }

        ModelPrediction {
            inference_id: Uuid::new_v4().to_string(),
            lat,
            lon,
            continent: Classification::new("EU", Some("Europe".into()), round3(rng.gen())),
            country,
            grid_l4: Classification::new("N0-1234", None, round3(rng.gen())),
            grid_l6: Classification::new("N0-123456", None, round3(rng.gen())),
            confidence_lat: Some(round3(rng.gen())),
            confidence_lon: Some(round3(rng.gen())),
            model_version: self.model_version.clone(),
            inference_time_ms: started.elapsed().as_millis() as i64,
            top_countries,
            grid_polygon: Some(square_around(lat, lon)),
        }
    }
}

#[async_trait]
impl ModelClient for CentroidModelClient {
    fn model_version(&self) -> &str {
        &self.model_version
    }

    async fn predict(&self, request: &ModelRequest) -> Result<ModelPrediction> {
        ensure!(!request.image.is_empty(), "empty image payload");
        Ok(self.predict_sync(&request.image))
    }
}

/// FNV-1a, stable across builds and platforms.
fn seed_for(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn square_around(lat: f64, lon: f64) -> Vec<[f64; 2]> {
    vec![
        [lat - POLYGON_DELTA, lon - POLYGON_DELTA],
        [lat - POLYGON_DELTA, lon + POLYGON_DELTA],
        [lat + POLYGON_DELTA, lon + POLYGON_DELTA],
        [lat + POLYGON_DELTA, lon - POLYGON_DELTA],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CentroidModelClient {
        CentroidModelClient::new(Arc::new(Gazetteer::builtin().unwrap()), "geovit-tinyvit-21m-v0")
    }

    fn request(image: &[u8]) -> ModelRequest {
        ModelRequest {
            image: image.to_vec(),
            session_id: Some("s1".into()),
            round_id: Some("r1".into()),
        }
    }

    #[tokio::test]
    async fn same_image_same_guess() {
        let client = client();
        let a = client.predict(&request(b"frame-one")).await.unwrap();
        let b = client.predict(&request(b"frame-one")).await.unwrap();

        assert_eq!(a.country, b.country);
        assert_eq!((a.lat, a.lon), (b.lat, b.lon));
        assert_eq!(a.top_countries, b.top_countries);
        assert_ne!(a.inference_id, b.inference_id);
        assert_eq!(a.model_version, "geovit-tinyvit-21m-v0");
    }

    #[tokio::test]
    async fn guesses_land_on_known_centroids() {
        let client = client();
        let gazetteer = Gazetteer::builtin().unwrap();
        for seed in 0u8..16 {
            let prediction = client.predict(&request(&[seed, 1, 2, 3])).await.unwrap();
            let code = prediction.country.id.clone().unwrap();
            assert!(COUNTRY_CHOICES.iter().any(|(_, c)| *c == code));
            assert_eq!(gazetteer.centroid(&code), Some((prediction.lat, prediction.lon)));

            assert_eq!(prediction.top_countries.len(), TOP_K);
            let confidences: Vec<f64> = prediction
                .top_countries
                .iter()
                .map(|c| c.confidence.unwrap())
                .collect();
            assert!(confidences.windows(2).all(|w| w[0] >= w[1]));
            assert_eq!(prediction.grid_polygon.as_ref().unwrap().len(), 4);
        }
    }

    #[tokio::test]
    async fn empty_image_is_refused() {
        assert!(client().predict(&request(b"")).await.is_err());
    }

    #[test]
    fn seed_is_stable() {
        assert_eq!(seed_for(b""), 0xcbf2_9ce4_8422_2325);
        assert_ne!(seed_for(b"a"), seed_for(b"b"));
    }
}
