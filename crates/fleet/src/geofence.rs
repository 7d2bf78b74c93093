//! Geofence containment.
//!
//! Distances use a flat-earth approximation: latitude and longitude deltas are
//! each scaled by a fixed [`METERS_PER_DEGREE`] and combined with Pythagoras.
//! Longitude is not corrected for latitude, so the result overstates east-west
//! distances away from the equator. It is only meaningful for geofences of
//! tens to hundreds of meters and must not be used beyond a few kilometers.
//! The constant matches historical computations and must not be changed.

use serde::{Deserialize, Serialize};

/// Fixed degree-to-meter scale applied to both axes.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// A circular zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub name: String,
    pub center: Coordinate,
    pub radius_m: f64,
}

impl Geofence {
    #[must_use]
    pub fn new(name: impl Into<String>, center: Coordinate, radius_m: f64) -> Self {
        Self { name: name.into(), center, radius_m }
    }

    /// Evaluate `position` against this geofence.
    #[must_use]
    pub fn evaluate(&self, position: Coordinate) -> Containment {
        evaluate(position, self)
    }
}

/// Result of a containment check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Containment {
    /// True iff `distance_m <= radius`; the boundary counts as inside.
    pub inside: bool,
    pub distance_m: f64,
}

/// Per-vehicle containment, recomputed on demand and never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceStatus {
    pub vehicle_id: String,
    pub inside: bool,
    pub distance_m: f64,
}

/// Approximate planar distance in meters between two positions.
#[must_use]
pub fn planar_distance(a: Coordinate, b: Coordinate) -> f64 {
    let dy = (a.latitude - b.latitude) * METERS_PER_DEGREE;
    let dx = (a.longitude - b.longitude) * METERS_PER_DEGREE;
    dy.hypot(dx)
}

/// Evaluate containment of `position` in `geofence`.
#[must_use]
pub fn evaluate(position: Coordinate, geofence: &Geofence) -> Containment {
    let distance_m = planar_distance(position, geofence.center);
    Containment { inside: distance_m <= geofence.radius_m, distance_m }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant_gate() -> Geofence {
        Geofence::new("Plant Gate", Coordinate::new(40.7128, -74.0060), 100.0)
    }

    #[test]
    fn nearby_vehicle_is_inside() {
        let result = evaluate(Coordinate::new(40.7129, -74.0060), &plant_gate());
        assert!(result.inside);
        assert!((result.distance_m - 11.1).abs() < 0.01, "got {}", result.distance_m);
    }

    #[test]
    fn distant_vehicle_is_outside() {
        let result = evaluate(Coordinate::new(40.7148, -74.0060), &plant_gate());
        assert!(!result.inside);
        assert!((result.distance_m - 222.0).abs() < 0.01);
    }

    #[test]
    fn boundary_is_inclusive() {
        let position = Coordinate::new(40.7135, -74.0052);
        let distance = evaluate(position, &plant_gate()).distance_m;
        let exact = Geofence::new("exact", plant_gate().center, distance);

        assert!(evaluate(position, &exact).inside);

        let shrunk = Geofence::new("shrunk", plant_gate().center, distance - 1e-9);
        assert!(!evaluate(position, &shrunk).inside);
    }

    #[test]
    fn inside_matches_distance() {
        let geofence = plant_gate();
        for i in -20..=20 {
            for j in -20..=20 {
                let position = Coordinate::new(
                    geofence.center.latitude + f64::from(i) * 0.0001,
                    geofence.center.longitude + f64::from(j) * 0.0001,
                );
                let result = geofence.evaluate(position);
                assert_eq!(result.inside, result.distance_m <= geofence.radius_m);
            }
        }
    }

    #[test]
    fn both_axes_use_the_same_scale() {
        let origin = Coordinate::new(0.0, 0.0);
        let north = planar_distance(origin, Coordinate::new(0.001, 0.0));
        let east = planar_distance(origin, Coordinate::new(0.0, 0.001));
        assert!((north - east).abs() < f64::EPSILON);
    }

    #[test]
    fn deterministic() {
        let position = Coordinate::new(40.71, -74.01);
        assert_eq!(evaluate(position, &plant_gate()), evaluate(position, &plant_gate()));
    }
}
