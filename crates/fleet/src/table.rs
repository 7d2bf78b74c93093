//! The live vehicle-position table.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::geofence::{Geofence, GeofenceStatus};
use crate::model::VehicleLocation;
use crate::status::{StatusThresholds, VehicleStatus};

/// Latest known location per vehicle id.
///
/// Every update is a snapshot: [`PositionTable::replace`] sets the table to
/// exactly the incoming contents and drops ids the snapshot does not name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionTable {
    vehicles: BTreeMap<String, VehicleLocation>,
}

/// Everything a consumer needs to render one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleReport<'a> {
    pub location: &'a VehicleLocation,
    pub geofence: GeofenceStatus,
    pub status: VehicleStatus,
}

impl PositionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table with `snapshot`, returning the new vehicle count.
    ///
    /// When a snapshot names the same vehicle more than once, the fix with the
    /// newest timestamp is kept.
    pub fn replace(&mut self, snapshot: impl IntoIterator<Item = VehicleLocation>) -> usize {
        let mut vehicles = BTreeMap::new();
        for location in snapshot {
            match vehicles.get(&location.vehicle_id) {
                Some(existing) if is_newer(existing, &location) => {}
                _ => {
                    vehicles.insert(location.vehicle_id.clone(), location);
                }
            }
        }
        self.vehicles = vehicles;
        self.vehicles.len()
    }

    #[must_use]
    pub fn get(&self, vehicle_id: &str) -> Option<&VehicleLocation> {
        self.vehicles.get(vehicle_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Locations in vehicle id order.
    pub fn iter(&self) -> impl Iterator<Item = &VehicleLocation> {
        self.vehicles.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.vehicles.keys().map(String::as_str)
    }

    /// Display order: `selected` first, then newest fix first, then id.
    #[must_use]
    pub fn ordered(&self, selected: Option<&str>) -> Vec<&VehicleLocation> {
        let mut locations: Vec<_> = self.vehicles.values().collect();
        locations.sort_by_key(|location| {
            (
                Some(location.vehicle_id.as_str()) != selected,
                Reverse(location.timestamp),
                location.vehicle_id.as_str(),
            )
        });
        locations
    }

    /// Containment of every vehicle, recomputed from the current table.
    #[must_use]
    pub fn geofence_statuses(&self, geofence: &Geofence) -> Vec<GeofenceStatus> {
        self.vehicles.values().map(|location| geofence_status(location, geofence)).collect()
    }

    /// Per-vehicle reports evaluated at `now`, in vehicle id order.
    #[must_use]
    pub fn reports(
        &self, geofence: &Geofence, thresholds: &StatusThresholds, now: DateTime<Utc>,
    ) -> Vec<VehicleReport<'_>> {
        self.vehicles
            .values()
            .map(|location| VehicleReport {
                location,
                geofence: geofence_status(location, geofence),
                status: thresholds.classify(location, geofence, now),
            })
            .collect()
    }

    /// Count of vehicles per status at `now`.
    #[must_use]
    pub fn breakdown(
        &self, geofence: &Geofence, thresholds: &StatusThresholds, now: DateTime<Utc>,
    ) -> BTreeMap<VehicleStatus, usize> {
        let mut counts = BTreeMap::new();
        for location in self.vehicles.values() {
            *counts.entry(thresholds.classify(location, geofence, now)).or_insert(0) += 1;
        }
        counts
    }
}

fn is_newer(existing: &VehicleLocation, candidate: &VehicleLocation) -> bool {
    existing.timestamp > candidate.timestamp
}

fn geofence_status(location: &VehicleLocation, geofence: &Geofence) -> GeofenceStatus {
    let containment = geofence.evaluate(location.position());
    GeofenceStatus {
        vehicle_id: location.vehicle_id.clone(),
        inside: containment.inside,
        distance_m: containment.distance_m,
    }
}
