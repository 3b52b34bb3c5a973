//! Great-circle distance on a spherical earth.

use crate::entities::GeoPoint;

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points in meters.
///
/// `a = sin²(Δφ/2) + cos φ1·cos φ2·sin²(Δλ/2)`,
/// `d = 2R·atan2(√a, √(1−a))`, angles in radians.
#[must_use]
pub fn haversine_m(from: GeoPoint, to: GeoPoint) -> f64 {
    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let d_phi = (to.latitude - from.latitude).to_radians();
    let d_lambda = (to.longitude - from.longitude).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Whether `point` lies within `radius_m` of `center`.
#[must_use]
pub fn within(center: GeoPoint, point: GeoPoint, radius_m: f64) -> bool {
    haversine_m(center, point) <= radius_m
}

#[cfg(test)]
mod tests {
    use super::*;

    const NYC: GeoPoint = GeoPoint::new(40.7128, -74.0060);

    #[test]
    fn test_self_distance_is_zero() {
        assert_eq!(haversine_m(NYC, NYC), 0.0);
        assert!(within(NYC, NYC, 0.0));
    }

    #[test]
    fn test_symmetric() {
        let midtown = GeoPoint::new(40.7589, -73.9851);
        assert_eq!(haversine_m(NYC, midtown), haversine_m(midtown, NYC));

        let sydney = GeoPoint::new(-33.8688, 151.2093);
        assert_eq!(haversine_m(NYC, sydney), haversine_m(sydney, NYC));
    }

    #[test]
    fn test_known_distances() {
        let neighbour = GeoPoint::new(40.7129, -74.0061);
        let d = haversine_m(NYC, neighbour);
        assert!((13.0..15.0).contains(&d), "got {d}");

        let midtown = GeoPoint::new(40.7589, -73.9851);
        let d = haversine_m(NYC, midtown);
        assert!((5_300.0..5_500.0).contains(&d), "got {d}");
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = haversine_m(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        let expected = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-6);
    }

    #[test]
    fn test_across_antimeridian() {
        let west = GeoPoint::new(0.0, 179.9995);
        let east = GeoPoint::new(0.0, -179.9995);
        let d = haversine_m(west, east);
        assert!(d < 120.0, "got {d}");
    }
}
