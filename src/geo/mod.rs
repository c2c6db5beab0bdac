pub mod distance;
pub mod gazetteer;
pub mod grid;
pub mod resolver;

pub use distance::{haversine_km, is_correct, score_guess, CORRECT_THRESHOLD_KM};
pub use gazetteer::{CountryInfo, Gazetteer};
pub use grid::{GridAssigner, GridBounds, GridCell, GridStep, GridZone, LEVEL_COARSE, LEVEL_FINE};
pub use resolver::{
    CountryResolver, NearestCentroidGeocoder, ResolutionFailure, ReverseGeocoder, UNKNOWN_COUNTRY,
};
