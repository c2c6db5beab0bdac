/// Mean Earth radius used for all great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A guess within this distance of the ground truth counts as correct (inclusive).
pub const CORRECT_THRESHOLD_KM: f64 = 200.0;

/// Great-circle distance in kilometres on a spherical Earth.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points.
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

pub fn is_correct(distance_km: f64) -> bool {
    distance_km <= CORRECT_THRESHOLD_KM
}

/// Distance and correctness for a prediction/ground-truth pair, or `None` for
/// both when any coordinate is missing.
pub fn score_guess(
    predicted: (Option<f64>, Option<f64>),
    truth: (Option<f64>, Option<f64>),
) -> Option<(f64, bool)> {
    match (predicted, truth) {
        ((Some(p_lat), Some(p_lon)), (Some(t_lat), Some(t_lon))) => {
            let distance = haversine_km(p_lat, p_lon, t_lat, t_lon);
            Some((distance, is_correct(distance)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_is_symmetric_and_zero_on_identity() {
        let paris = (48.8566, 2.3522);
        let tokyo = (35.6762, 139.6503);
        let ab = haversine_km(paris.0, paris.1, tokyo.0, tokyo.1);
        let ba = haversine_km(tokyo.0, tokyo.1, paris.0, paris.1);
        assert_eq!(ab, ba);
        assert_eq!(haversine_km(paris.0, paris.1, paris.0, paris.1), 0.0);
        assert!((ab - 9712.0).abs() < 20.0, "paris-tokyo was {ab}");
    }

    #[test]
    fn antipodal_points_do_not_produce_nan() {
        let d = haversine_km(0.0, 0.0, 0.0, 180.0);
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(is_correct(200.0));
        assert!(!is_correct(200.01));
        assert!(is_correct(0.0));
    }

    #[test]
    fn score_guess_needs_all_coordinates() {
        assert!(score_guess((Some(1.0), None), (Some(1.0), Some(1.0))).is_none());
        assert!(score_guess((Some(1.0), Some(1.0)), (None, Some(1.0))).is_none());

        let (distance, correct) =
            score_guess((Some(48.9), Some(2.4)), (Some(48.8), Some(2.3))).unwrap();
        assert!(distance > 12.0 && distance < 14.0, "distance was {distance}");
        assert!(correct);
    }
}
