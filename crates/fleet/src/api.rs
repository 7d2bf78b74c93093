//! # Transport client
//!
//! Typed access to the fleet backend's request/response API. Every call is a
//! single attempt bounded by the configured timeout; retries belong to the
//! caller.

use std::time::Duration;

use http::Method;
use http::header::ACCEPT;
use realtime::{Error, HttpRequest, Result, network_failure};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{
    ActivitiesResponse, ActivityRecord, EventsResponse, EventsSummary, GeofenceEvent,
    GeofenceStatusReport, HistoryPoint, HistoryResponse, LocationsResponse, Transition, Vehicle,
    VehicleLocation, VehiclesResponse,
};

/// Filters for `GET /vehicles/locations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery {
    pub limit: u32,
    pub vehicle_id: Option<String>,
}

impl Default for LocationQuery {
    fn default() -> Self {
        Self { limit: 100, vehicle_id: None }
    }
}

/// Filters for `GET /events/geofence`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeofenceEventQuery {
    pub hours: u32,
    pub vehicle_id: Option<String>,
    pub event_type: Option<Transition>,
}

impl Default for GeofenceEventQuery {
    fn default() -> Self {
        Self { hours: 24, vehicle_id: None, event_type: None }
    }
}

/// Filters for `GET /events/activity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityQuery {
    pub hours: u32,
    pub vehicle_id: Option<String>,
    pub activity_type: Option<String>,
    pub limit: u32,
}

impl Default for ActivityQuery {
    fn default() -> Self {
        Self { hours: 24, vehicle_id: None, activity_type: None, limit: 100 }
    }
}

/// Query string builder. Absent values are omitted; present values are
/// percent-encoded.
#[derive(Debug, Default)]
struct Query(Vec<(&'static str, String)>);

impl Query {
    fn with(mut self, key: &'static str, value: impl ToString) -> Self {
        self.0.push((key, value.to_string()));
        self
    }

    fn maybe(self, key: &'static str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Client for the fleet backend.
#[derive(Debug, Clone)]
pub struct FleetApi<P> {
    provider: P,
    base_url: String,
    timeout: Duration,
}

impl<P: HttpRequest> FleetApi<P> {
    pub fn new(provider: P, base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { provider, base_url, timeout }
    }

    /// Registered vehicles.
    ///
    /// # Errors
    ///
    /// Returns `NetworkFailure`, `Timeout`, `ApplicationError` or
    /// `InvalidFormat` when the request does not yield a decodable roster.
    pub async fn vehicles(&self) -> Result<Vec<Vehicle>> {
        let response: VehiclesResponse = self.get("/vehicles/", &Query::default()).await?;
        Ok(response.vehicles)
    }

    /// Latest fix per vehicle.
    ///
    /// # Errors
    ///
    /// See [`FleetApi::vehicles`].
    pub async fn locations(&self, query: &LocationQuery) -> Result<Vec<VehicleLocation>> {
        let params = Query::default()
            .with("limit", query.limit)
            .maybe("vehicle_id", query.vehicle_id.as_ref());
        let response: LocationsResponse = self.get("/vehicles/locations", &params).await?;
        Ok(response.locations)
    }

    /// Latest fix for a single vehicle.
    ///
    /// # Errors
    ///
    /// An unknown vehicle surfaces as `ApplicationError` with status 404.
    pub async fn location(&self, vehicle_id: &str) -> Result<VehicleLocation> {
        let path = format!("/vehicles/{}/location", urlencoding::encode(vehicle_id));
        self.get(&path, &Query::default()).await
    }

    /// Position history for the last `hours`.
    ///
    /// # Errors
    ///
    /// See [`FleetApi::vehicles`].
    pub async fn history(&self, vehicle_id: &str, hours: u32) -> Result<Vec<HistoryPoint>> {
        let path = format!("/vehicles/{}/history", urlencoding::encode(vehicle_id));
        let params = Query::default().with("hours", hours);
        let response: HistoryResponse = self.get(&path, &params).await?;
        Ok(response.history)
    }

    /// Server-side containment for a vehicle's current position.
    ///
    /// # Errors
    ///
    /// See [`FleetApi::vehicles`].
    pub async fn geofence_status(&self, vehicle_id: &str) -> Result<GeofenceStatusReport> {
        let path = format!("/vehicles/{}/geofence-status", urlencoding::encode(vehicle_id));
        self.get(&path, &Query::default()).await
    }

    /// Geofence transitions within the query window.
    ///
    /// # Errors
    ///
    /// See [`FleetApi::vehicles`].
    pub async fn geofence_events(&self, query: &GeofenceEventQuery) -> Result<Vec<GeofenceEvent>> {
        let params = Query::default()
            .with("hours", query.hours)
            .maybe("vehicle_id", query.vehicle_id.as_ref())
            .maybe("event_type", query.event_type);
        let response: EventsResponse = self.get("/events/geofence", &params).await?;
        Ok(response.events)
    }

    /// Activity log entries within the query window.
    ///
    /// # Errors
    ///
    /// See [`FleetApi::vehicles`].
    pub async fn activity(&self, query: &ActivityQuery) -> Result<Vec<ActivityRecord>> {
        let params = Query::default()
            .with("hours", query.hours)
            .maybe("vehicle_id", query.vehicle_id.as_ref())
            .maybe("activity_type", query.activity_type.as_ref())
            .with("limit", query.limit);
        let response: ActivitiesResponse = self.get("/events/activity", &params).await?;
        Ok(response.activities)
    }

    /// Aggregate counts over the last `hours`.
    ///
    /// # Errors
    ///
    /// See [`FleetApi::vehicles`].
    pub async fn summary(&self, hours: u32) -> Result<EventsSummary> {
        self.get("/events/summary", &Query::default().with("hours", hours)).await
    }

    /// Backend liveness document, passed through untyped.
    ///
    /// # Errors
    ///
    /// See [`FleetApi::vehicles`].
    pub async fn health(&self) -> Result<Value> {
        self.get("/health", &Query::default()).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &Query) -> Result<T> {
        let query = query.encode();
        let uri = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };

        let request = http::Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .header(ACCEPT, "application/json")
            .body(Vec::new())
            .map_err(|err| network_failure!("building request for {uri}: {err}"))?;

        debug!(uri, "fleet request");
        let fetched = tokio::time::timeout(self.timeout, self.provider.fetch(request)).await;
        let response = match fetched {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(uri, error = %err, "fleet request failed");
                return Err(Error::from(err.context(format!("GET {path}"))));
            }
            Err(_elapsed) => {
                warn!(uri, timeout = ?self.timeout, "fleet request timed out");
                return Err(Error::Timeout(format!("GET {path} after {:?}", self.timeout)));
            }
        };

        let status = response.status();
        let body = response.into_body();
        if !status.is_success() {
            warn!(uri, status = status.as_u16(), "fleet request rejected");
            return Err(Error::application(status, &body));
        }

        serde_json::from_slice(&body)
            .map_err(|err| Error::InvalidFormat(format!("GET {path}: {err}")))
    }
}
