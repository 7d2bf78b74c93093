//! Read-time vehicle status.
//!
//! Freshness is never stored: a vehicle is offline when its last fix is older
//! than the threshold at the moment of the read.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geofence::Geofence;
use crate::model::VehicleLocation;

/// Thresholds used to classify a vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusThresholds {
    pub offline_after: Duration,
    /// km/h
    pub speed_limit: f64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self { offline_after: Duration::minutes(10), speed_limit: 80.0 }
    }
}

/// Derived display status, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Offline,
    Speeding,
    InGeofence,
    Active,
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Offline => "offline",
            Self::Speeding => "speeding",
            Self::InGeofence => "in_geofence",
            Self::Active => "active",
        };
        f.write_str(label)
    }
}

impl StatusThresholds {
    /// Whether the fix is older than the offline threshold at `now`.
    #[must_use]
    pub fn is_stale(&self, location: &VehicleLocation, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(location.timestamp) > self.offline_after
    }

    #[must_use]
    pub fn classify(
        &self, location: &VehicleLocation, geofence: &Geofence, now: DateTime<Utc>,
    ) -> VehicleStatus {
        if self.is_stale(location, now) {
            VehicleStatus::Offline
        } else if location.speed > self.speed_limit {
            VehicleStatus::Speeding
        } else if geofence.evaluate(location.position()).inside {
            VehicleStatus::InGeofence
        } else {
            VehicleStatus::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::geofence::Coordinate;

    fn location(lat: f64, speed: f64, age_secs: i64, now: DateTime<Utc>) -> VehicleLocation {
        VehicleLocation {
            vehicle_id: "V1".to_string(),
            latitude: lat,
            longitude: -74.0060,
            speed,
            heading: 0.0,
            timestamp: now - Duration::seconds(age_secs),
            driver_name: None,
            license_plate: None,
            vehicle_type: None,
        }
    }

    fn setup() -> (StatusThresholds, Geofence, DateTime<Utc>) {
        let geofence = Geofence::new("Plant Gate", Coordinate::new(40.7128, -74.0060), 100.0);
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        (StatusThresholds::default(), geofence, now)
    }

    #[test]
    fn stale_beats_everything() {
        let (thresholds, geofence, now) = setup();
        let loc = location(40.7128, 120.0, 601, now);
        assert_eq!(thresholds.classify(&loc, &geofence, now), VehicleStatus::Offline);
    }

    #[test]
    fn exactly_at_threshold_is_fresh() {
        let (thresholds, geofence, now) = setup();
        let loc = location(40.7128, 10.0, 600, now);
        assert_eq!(thresholds.classify(&loc, &geofence, now), VehicleStatus::InGeofence);
    }

    #[test]
    fn speeding_inside_geofence() {
        let (thresholds, geofence, now) = setup();
        let loc = location(40.7128, 80.5, 5, now);
        assert_eq!(thresholds.classify(&loc, &geofence, now), VehicleStatus::Speeding);
    }

    #[test]
    fn active_outside_geofence() {
        let (thresholds, geofence, now) = setup();
        let loc = location(40.80, 80.0, 5, now);
        assert_eq!(thresholds.classify(&loc, &geofence, now), VehicleStatus::Active);
    }
}
