//! Adaptive, region-aware lat/lon grid.
//!
//! Every level has a global default step size. Named override zones give denser
//! cells over high-traffic regions. Zones may overlap, and the first zone in list
//! order that contains the point (and defines the level) wins.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

pub const LEVEL_COARSE: u8 = 4;
pub const LEVEL_FINE: u8 = 6;

const GLOBAL_ZONE: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStep {
    pub level: u8,
    pub lat_step: f64,
    pub lon_step: f64,
}

impl GridStep {
    pub const fn new(level: u8, lat_step: f64, lon_step: f64) -> Self {
        Self {
            level,
            lat_step,
            lon_step,
        }
    }

    fn is_valid(&self) -> bool {
        self.lat_step.is_finite() && self.lon_step.is_finite() && self.lat_step > 0.0 && self.lon_step > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridZone {
    pub name: String,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub steps: Vec<GridStep>,
}

impl GridZone {
    pub fn new(
        name: impl Into<String>,
        lat_range: (f64, f64),
        lon_range: (f64, f64),
        steps: &[GridStep],
    ) -> Self {
        Self {
            name: name.into(),
            lat_min: lat_range.0,
            lat_max: lat_range.1,
            lon_min: lon_range.0,
            lon_max: lon_range.1,
            steps: steps.to_vec(),
        }
    }

    /// Bounds are inclusive on every side.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.lat_min <= lat && lat <= self.lat_max && self.lon_min <= lon && lon <= self.lon_max
    }

    pub fn step_for(&self, level: u8) -> Option<GridStep> {
        self.steps.iter().copied().find(|step| step.level == level)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub row: i64,
    pub col: i64,
    pub zone: String,
    pub lat_step: f64,
    pub lon_step: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub id: String,
    pub bounds: GridBounds,
}

#[derive(Debug, Clone)]
pub struct GridAssigner {
    zones: Vec<GridZone>,
    defaults: Vec<GridStep>,
}

impl Default for GridAssigner {
    fn default() -> Self {
        Self::standard()
    }
}

impl GridAssigner {
    /// The production zone table, denser over the most frequently played regions.
    pub fn standard() -> Self {
        let zone = |name: &str, lat: (f64, f64), lon: (f64, f64), l4: f64, l6: f64| {
            GridZone::new(
                name,
                lat,
                lon,
                &[GridStep::new(LEVEL_COARSE, l4, l4), GridStep::new(LEVEL_FINE, l6, l6)],
            )
        };

        Self {
            zones: vec![
                zone("north_america_core", (10.0, 75.0), (-170.0, -50.0), 6.0, 3.0),
                zone("europe_core", (30.0, 72.0), (-15.0, 60.0), 3.0, 1.5),
                zone("russia_steppe", (45.0, 75.0), (30.0, 150.0), 5.0, 2.5),
                zone("east_asia", (10.0, 50.0), (90.0, 150.0), 4.0, 2.0),
                zone("oceania", (-50.0, -5.0), (105.0, 180.0), 5.0, 2.5),
                zone("south_america_band", (-55.0, 15.0), (-85.0, -35.0), 8.0, 4.0),
                zone("africa_mediterranean", (-5.0, 35.0), (-20.0, 50.0), 7.0, 3.5),
            ],
            defaults: vec![
                GridStep::new(LEVEL_COARSE, 12.0, 12.0),
                GridStep::new(LEVEL_FINE, 6.0, 6.0),
            ],
        }
    }

    pub fn new(zones: Vec<GridZone>, defaults: Vec<GridStep>) -> Result<Self> {
        ensure!(!defaults.is_empty(), "grid needs at least one default step");
        for step in &defaults {
            ensure!(step.is_valid(), "invalid default step for level {}", step.level);
        }
        for zone in &zones {
            for step in &zone.steps {
                ensure!(
                    step.is_valid(),
                    "invalid step for level {} in zone {}",
                    step.level,
                    zone.name
                );
            }
        }
        Ok(Self { zones, defaults })
    }

    pub fn zones(&self) -> &[GridZone] {
        &self.zones
    }

    /// Cell id and bounds for a coordinate, `None` only when a coordinate is
    /// missing (non-finite values count as missing).
    pub fn assign(&self, lat: Option<f64>, lon: Option<f64>, level: u8) -> Option<GridCell> {
        let (lat, lon) = match (lat, lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => (lat, lon),
            _ => return None,
        };

        let lat = lat.clamp(-90.0, 90.0);
        let lon = normalize_lon(lon);

        let (zone, step) = self.select_step(lat, lon, level);

        let row = ((lat + 90.0) / step.lat_step).floor() as i64;
        let col = ((lon + 180.0) / step.lon_step).floor() as i64;

        let lat_min = -90.0 + row as f64 * step.lat_step;
        let lon_min = -180.0 + col as f64 * step.lon_step;
        let lat_max = (lat_min + step.lat_step).min(90.0);
        let lon_max = (lon_min + step.lon_step).min(180.0);

        Some(GridCell {
            id: format!("grid_l{level}_{zone}_{row:03}_{col:03}"),
            bounds: GridBounds {
                lat_min,
                lat_max,
                lon_min,
                lon_max,
                row,
                col,
                zone: zone.to_string(),
                lat_step: step.lat_step,
                lon_step: step.lon_step,
            },
        })
    }

    fn select_step(&self, lat: f64, lon: f64, level: u8) -> (&str, GridStep) {
        for zone in &self.zones {
            if !zone.contains(lat, lon) {
                continue;
            }
            if let Some(step) = zone.step_for(level) {
                return (zone.name.as_str(), step);
            }
        }

        // Unknown levels reuse the coarse default.
        let step = self
            .defaults
            .iter()
            .find(|step| step.level == level)
            .or_else(|| self.defaults.iter().find(|step| step.level == LEVEL_COARSE))
            .or_else(|| self.defaults.first())
            .copied()
            .unwrap_or(GridStep::new(level, 12.0, 12.0));
        (GLOBAL_ZONE, step)
    }
}

/// Wraps longitude into [-180, 180).
fn normalize_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(lat: f64, lon: f64, level: u8) -> GridCell {
        GridAssigner::standard()
            .assign(Some(lat), Some(lon), level)
            .expect("cell")
    }

    #[test]
    fn assignment_is_deterministic() {
        let grid = GridAssigner::standard();
        for &(lat, lon) in &[(48.8, 2.3), (-33.9, 151.2), (0.0, 0.0), (89.9, -179.9), (-90.0, 180.0)] {
            for level in [LEVEL_COARSE, LEVEL_FINE, 9] {
                assert_eq!(
                    grid.assign(Some(lat), Some(lon), level),
                    grid.assign(Some(lat), Some(lon), level)
                );
            }
        }
    }

    #[test]
    fn paris_lands_in_europe_core() {
        let paris = cell(48.8, 2.3, LEVEL_COARSE);
        assert_eq!(paris.id, "grid_l4_europe_core_046_060");
        assert_eq!(paris.bounds.lat_min, 48.0);
        assert_eq!(paris.bounds.lat_max, 51.0);
        assert_eq!(paris.bounds.lon_min, 0.0);
        assert_eq!(paris.bounds.lon_max, 3.0);

        let fine = cell(48.8, 2.3, LEVEL_FINE);
        assert_eq!(fine.id, "grid_l6_europe_core_092_121");
        assert_eq!(fine.bounds.lat_step, 1.5);
    }

    #[test]
    fn latitude_is_clamped() {
        assert_eq!(cell(91.0, 0.0, 4), cell(90.0, 0.0, 4));
        assert_eq!(cell(-120.0, 10.0, 6), cell(-90.0, 10.0, 6));
    }

    #[test]
    fn longitude_wraps_around() {
        assert_eq!(cell(0.0, 181.0, 4), cell(0.0, -179.0, 4));
        assert_eq!(cell(0.0, 180.0, 4), cell(0.0, -180.0, 4));
        assert_eq!(cell(0.0, -540.0, 4), cell(0.0, -180.0, 4));
        assert_eq!(cell(12.0, 725.0, 6), cell(12.0, 5.0, 6));
    }

    #[test]
    fn bounds_never_exceed_the_globe() {
        let north = cell(90.0, 0.0, 4);
        assert!(north.bounds.lat_max <= 90.0);
        let east = cell(-80.0, 179.9, 4);
        assert!(east.bounds.lon_max <= 180.0);
        assert!(east.bounds.lon_min <= 179.9);
    }

    #[test]
    fn first_listed_zone_wins_on_overlap() {
        // Moscow sits in both europe_core and russia_steppe.
        assert_eq!(cell(55.75, 37.6, 4).bounds.zone, "europe_core");
        // Costa Rica sits in both north_america_core and south_america_band.
        assert_eq!(cell(10.0, -84.0, 4).bounds.zone, "north_america_core");
        // Tunis sits in both europe_core and africa_mediterranean.
        assert_eq!(cell(34.0, 10.0, 6).bounds.zone, "europe_core");
    }

    #[test]
    fn precedence_follows_list_order_for_custom_zones() {
        let a = GridZone::new("a", (0.0, 10.0), (0.0, 10.0), &[GridStep::new(4, 1.0, 1.0)]);
        let b = GridZone::new("b", (5.0, 15.0), (5.0, 15.0), &[GridStep::new(4, 2.0, 2.0)]);
        let defaults = vec![GridStep::new(4, 10.0, 10.0)];

        let ab = GridAssigner::new(vec![a.clone(), b.clone()], defaults.clone()).unwrap();
        let ba = GridAssigner::new(vec![b, a], defaults).unwrap();

        let first = ab.assign(Some(7.0), Some(7.0), 4).unwrap();
        let second = ba.assign(Some(7.0), Some(7.0), 4).unwrap();
        assert_eq!(first.bounds.zone, "a");
        assert_eq!(second.bounds.zone, "b");
        assert_eq!(first, ab.assign(Some(7.0), Some(7.0), 4).unwrap());
    }

    #[test]
    fn zone_without_level_falls_through() {
        let coarse_only = GridZone::new("coarse", (0.0, 10.0), (0.0, 10.0), &[GridStep::new(4, 1.0, 1.0)]);
        let grid = GridAssigner::new(
            vec![coarse_only],
            vec![GridStep::new(4, 10.0, 10.0), GridStep::new(6, 5.0, 5.0)],
        )
        .unwrap();
        let fine = grid.assign(Some(5.0), Some(5.0), 6).unwrap();
        assert_eq!(fine.bounds.zone, "global");
        assert_eq!(fine.bounds.lat_step, 5.0);
    }

    #[test]
    fn unmatched_points_use_global_defaults() {
        let antarctic = cell(-80.0, 0.0, 4);
        assert_eq!(antarctic.bounds.zone, "global");
        assert_eq!(antarctic.bounds.lat_step, 12.0);
        assert_eq!(antarctic.id, "grid_l4_global_000_015");

        let unknown_level = cell(-80.0, 0.0, 9);
        assert_eq!(unknown_level.bounds.lat_step, 12.0);
        assert!(unknown_level.id.starts_with("grid_l9_global_"));
    }

    #[test]
    fn density_changes_across_zone_boundary() {
        let outside = cell(9.99, -100.0, 4);
        let inside = cell(10.0, -100.0, 4);
        assert_eq!(outside.bounds.zone, "global");
        assert_eq!(inside.bounds.zone, "north_america_core");
        assert_ne!(outside.bounds.lat_step, inside.bounds.lat_step);
    }

    #[test]
    fn fine_steps_widen_the_id_without_collisions() {
        let grid = GridAssigner::new(Vec::new(), vec![GridStep::new(8, 0.1, 0.1)]).unwrap();
        let a = grid.assign(Some(48.85), Some(2.35), 8).unwrap();
        let b = grid.assign(Some(48.95), Some(2.35), 8).unwrap();
        assert!(a.bounds.row > 999);
        assert!(a.id.contains(&format!("_{}_", a.bounds.row)));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn missing_or_non_finite_coordinates_yield_nothing() {
        let grid = GridAssigner::standard();
        assert!(grid.assign(None, Some(1.0), 4).is_none());
        assert!(grid.assign(Some(1.0), None, 4).is_none());
        assert!(grid.assign(Some(f64::NAN), Some(1.0), 4).is_none());
    }

    #[test]
    fn invalid_steps_are_rejected() {
        assert!(GridAssigner::new(Vec::new(), Vec::new()).is_err());
        assert!(GridAssigner::new(Vec::new(), vec![GridStep::new(4, 0.0, 1.0)]).is_err());
    }
}
