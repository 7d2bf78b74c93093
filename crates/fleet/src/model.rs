//! Wire model for the fleet backend.
//!
//! Field names follow the backend's JSON. Timestamps are decoded leniently
//! (see [`crate::timestamp`]).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geofence::Coordinate;
use crate::timestamp;

/// Roster entry returned by `GET /vehicles/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: u64,
    pub vehicle_id: String,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub license_plate: Option<String>,
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The most recent fix reported for a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleLocation {
    pub vehicle_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// km/h
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_plate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<String>,
}

impl VehicleLocation {
    #[must_use]
    pub const fn position(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// One sample of `GET /vehicles/{id}/history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}

/// Direction of a geofence crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Enter,
    Exit,
}

impl Transition {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        }
    }

    /// Past-tense verb used in feed descriptions.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Enter => "entered",
            Self::Exit => "exited",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-generated geofence transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceEvent {
    pub id: u64,
    pub vehicle_id: String,
    pub event_type: Transition,
    pub latitude: f64,
    pub longitude: f64,
    pub geofence_name: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub notification_sent: bool,
}

/// A generic activity log entry. Ids are independent of [`GeofenceEvent`] ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: u64,
    pub vehicle_id: String,
    pub activity_type: String,
    pub description: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    /// Position of the activity, when both coordinates were reported.
    #[must_use]
    pub fn position(&self) -> Option<Coordinate> {
        Some(Coordinate::new(self.latitude?, self.longitude?))
    }
}

/// Server-side containment report from `GET /vehicles/{id}/geofence-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceStatusReport {
    pub vehicle_id: String,
    pub is_inside_geofence: bool,
    pub distance_to_geofence: f64,
    pub geofence_center: Coordinate,
    pub geofence_radius: f64,
    pub current_location: CurrentLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counts from `GET /events/summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsSummary {
    pub summary_period_hours: u32,
    pub geofence_events: TransitionCounts,
    #[serde(default)]
    pub activities_by_type: BTreeMap<String, u64>,
    pub active_vehicles: u64,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCounts {
    pub enters: u64,
    pub exits: u64,
    pub total: u64,
}

impl EventsSummary {
    /// Share of geofence transitions that were entries, as a rounded percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn entry_rate(&self) -> u64 {
        let counts = self.geofence_events;
        if counts.total == 0 {
            return 0;
        }
        (counts.enters as f64 / counts.total as f64 * 100.0).round() as u64
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct VehiclesResponse {
    pub vehicles: Vec<Vehicle>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LocationsResponse {
    pub locations: Vec<VehicleLocation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryResponse {
    pub history: Vec<HistoryPoint>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventsResponse {
    pub events: Vec<GeofenceEvent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActivitiesResponse {
    pub activities: Vec<ActivityRecord>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn location_with_optional_fields() {
        let location: VehicleLocation = serde_json::from_value(json!({
            "vehicle_id": "TRK-001",
            "latitude": 40.7128,
            "longitude": -74.006,
            "speed": 42.5,
            "heading": 180.0,
            "timestamp": "2024-05-01T10:00:00",
            "driver_name": "A. Driver"
        }))
        .expect("should deserialize");

        assert_eq!(location.vehicle_id, "TRK-001");
        assert_eq!(location.driver_name.as_deref(), Some("A. Driver"));
        assert!(location.license_plate.is_none());
    }

    #[test]
    fn activity_position_requires_both_coordinates() {
        let record: ActivityRecord = serde_json::from_value(json!({
            "id": 5,
            "vehicle_id": "V1",
            "activity_type": "speed_alert",
            "description": "Vehicle V1 exceeded 80 km/h",
            "latitude": 40.0,
            "longitude": null,
            "timestamp": "2024-05-01T10:00:00Z"
        }))
        .expect("should deserialize");

        assert!(record.position().is_none());
    }

    #[test]
    fn entry_rate_rounds() {
        let summary: EventsSummary = serde_json::from_value(json!({
            "summary_period_hours": 24,
            "geofence_events": {"enters": 2, "exits": 1, "total": 3},
            "activities_by_type": {"geofence_enter": 2, "speed_alert": 1},
            "active_vehicles": 4,
            "generated_at": "2024-05-01T10:00:00"
        }))
        .expect("should deserialize");

        assert_eq!(summary.entry_rate(), 67);
    }

    #[test]
    fn entry_rate_without_events() {
        let summary = EventsSummary {
            summary_period_hours: 1,
            geofence_events: TransitionCounts { enters: 0, exits: 0, total: 0 },
            activities_by_type: BTreeMap::new(),
            active_vehicles: 0,
            generated_at: Utc::now(),
        };
        assert_eq!(summary.entry_rate(), 0);
    }
}
