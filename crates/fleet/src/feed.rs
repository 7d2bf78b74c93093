//! # Event feed
//!
//! One chronological view over geofence transitions and activity records.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use realtime::{HttpRequest, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::{ActivityQuery, FleetApi, GeofenceEventQuery};
use crate::geofence::Coordinate;
use crate::model::{ActivityRecord, GeofenceEvent};

/// Collection an item came from. Ids are only unique within a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    Geofence,
    Activity,
}

/// Common shape for both feed sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedFeedItem {
    pub source: FeedSource,
    pub id: u64,
    pub vehicle_id: String,
    /// `geofence_enter`, `geofence_exit` or the activity type.
    pub kind: String,
    pub description: String,
    pub position: Option<Coordinate>,
    pub timestamp: DateTime<Utc>,
}

impl MergedFeedItem {
    #[must_use]
    pub const fn key(&self) -> (FeedSource, u64) {
        (self.source, self.id)
    }
}

impl From<&GeofenceEvent> for MergedFeedItem {
    fn from(event: &GeofenceEvent) -> Self {
        Self {
            source: FeedSource::Geofence,
            id: event.id,
            vehicle_id: event.vehicle_id.clone(),
            kind: format!("geofence_{}", event.event_type),
            description: format!(
                "Vehicle {} {} {}",
                event.vehicle_id,
                event.event_type.verb(),
                event.geofence_name
            ),
            position: Some(Coordinate::new(event.latitude, event.longitude)),
            timestamp: event.timestamp,
        }
    }
}

impl From<&ActivityRecord> for MergedFeedItem {
    fn from(record: &ActivityRecord) -> Self {
        Self {
            source: FeedSource::Activity,
            id: record.id,
            vehicle_id: record.vehicle_id.clone(),
            kind: record.activity_type.clone(),
            description: record.description.clone(),
            position: record.position(),
            timestamp: record.timestamp,
        }
    }
}

/// Merge both collections, newest first.
///
/// Items with equal timestamps keep their order in `events ++ activities`.
/// Nothing is deduplicated.
#[must_use]
pub fn merge(events: &[GeofenceEvent], activities: &[ActivityRecord]) -> Vec<MergedFeedItem> {
    let mut items: Vec<MergedFeedItem> = events
        .iter()
        .map(MergedFeedItem::from)
        .chain(activities.iter().map(MergedFeedItem::from))
        .collect();
    items.sort_by_key(|item| Reverse(item.timestamp));
    items
}

/// Window and filters for loading the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub hours: u32,
    pub vehicle_id: Option<String>,
    /// Applies to activity records only.
    pub limit: u32,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self { hours: 24, vehicle_id: None, limit: 50 }
    }
}

/// Fetch both collections concurrently and merge them.
///
/// # Errors
///
/// Fails if either fetch fails.
pub async fn load<P: HttpRequest>(
    api: &FleetApi<P>, query: &FeedQuery,
) -> Result<Vec<MergedFeedItem>> {
    let events = GeofenceEventQuery {
        hours: query.hours,
        vehicle_id: query.vehicle_id.clone(),
        event_type: None,
    };
    let activities = ActivityQuery {
        hours: query.hours,
        vehicle_id: query.vehicle_id.clone(),
        activity_type: None,
        limit: query.limit,
    };

    let (events, activities) =
        futures::try_join!(api.geofence_events(&events), api.activity(&activities))?;
    Ok(merge(&events, &activities))
}

/// The last successfully loaded feed and the revision it reflects.
#[derive(Debug, Clone, Default)]
pub struct EventFeed {
    query: FeedQuery,
    items: Vec<MergedFeedItem>,
    revision: Option<u64>,
}

impl EventFeed {
    #[must_use]
    pub fn new(query: FeedQuery) -> Self {
        Self { query, items: Vec::new(), revision: None }
    }

    #[must_use]
    pub fn items(&self) -> &[MergedFeedItem] {
        &self.items
    }

    #[must_use]
    pub const fn query(&self) -> &FeedQuery {
        &self.query
    }

    /// Whether the feed predates `revision`.
    #[must_use]
    pub fn is_stale(&self, revision: u64) -> bool {
        self.revision.is_none_or(|loaded| loaded < revision)
    }

    /// Reload the feed for `revision`. On failure the previous items are
    /// kept and the feed stays stale.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the failed fetch.
    pub async fn reload<P: HttpRequest>(
        &mut self, api: &FleetApi<P>, revision: u64,
    ) -> Result<&[MergedFeedItem]> {
        match load(api, &self.query).await {
            Ok(items) => {
                debug!(items = items.len(), revision, "event feed loaded");
                self.items = items;
                self.revision = Some(revision);
                Ok(&self.items)
            }
            Err(err) => {
                warn!(error = %err, revision, "event feed load failed, keeping previous items");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::model::Transition;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn event(id: u64, event_type: Transition, ts: DateTime<Utc>) -> GeofenceEvent {
        GeofenceEvent {
            id,
            vehicle_id: "V1".to_string(),
            event_type,
            latitude: 40.7128,
            longitude: -74.0060,
            geofence_name: "Plant Gate".to_string(),
            timestamp: ts,
            notification_sent: false,
        }
    }

    fn activity(id: u64, activity_type: &str, ts: DateTime<Utc>) -> ActivityRecord {
        ActivityRecord {
            id,
            vehicle_id: "V2".to_string(),
            activity_type: activity_type.to_string(),
            description: format!("{activity_type} for V2"),
            latitude: None,
            longitude: None,
            metadata: None,
            timestamp: ts,
        }
    }

    #[test]
    fn newest_first() {
        let events = [event(1, Transition::Enter, t(20))];
        let merged = merge(&events, &[activity(5, "speed_alert", t(10))]);

        let kinds: Vec<_> = merged.iter().map(|item| item.kind.as_str()).collect();
        assert_eq!(kinds, vec!["geofence_enter", "speed_alert"]);
        assert_eq!(merged[0].description, "Vehicle V1 entered Plant Gate");
        assert_eq!(merged[1].description, "speed_alert for V2");
    }

    #[test]
    fn equal_timestamps_keep_concatenation_order() {
        let events = [event(3, Transition::Exit, t(0)), event(1, Transition::Enter, t(5))];
        let activities = [activity(1, "idle", t(0)), activity(2, "speed_alert", t(5))];

        let keys: Vec<_> = merge(&events, &activities).iter().map(MergedFeedItem::key).collect();
        assert_eq!(
            keys,
            vec![
                (FeedSource::Geofence, 1),
                (FeedSource::Activity, 2),
                (FeedSource::Geofence, 3),
                (FeedSource::Activity, 1),
            ]
        );
    }

    #[test]
    fn sorted_non_increasing() {
        let events: Vec<_> =
            (0_i64..10).map(|i| event(i.unsigned_abs(), Transition::Enter, t(i * 7 % 5))).collect();
        let activities: Vec<_> =
            (0_i64..10).map(|i| activity(i.unsigned_abs(), "idle", t(i * 3 % 4))).collect();

        let merged = merge(&events, &activities);
        assert_eq!(merged.len(), 20);
        assert!(merged.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));
    }

    #[test]
    fn same_id_in_both_sources_is_not_deduplicated() {
        let events = [event(7, Transition::Enter, t(0))];
        let merged = merge(&events, &[activity(7, "geofence_enter", t(0))]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn empty_feed_is_stale() {
        let feed = EventFeed::new(FeedQuery::default());
        assert!(feed.is_stale(0));
        assert!(feed.items().is_empty());
    }
}
