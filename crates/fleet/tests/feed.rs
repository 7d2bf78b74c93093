//! Merged event feed loading.


use std::time::Duration;

use fleet::feed::{self, EventFeed, FeedQuery, FeedSource};
use fleet::FleetApi;
use pretty_assertions::assert_eq;
use serde_json::json;

use self::provider::{BASE_URL, MockProvider, Reply};

fn api(provider: &MockProvider) -> FleetApi<MockProvider> {
    FleetApi::new(provider.clone(), BASE_URL, Duration::from_secs(10))
}

fn routes(provider: &MockProvider) {
    provider.route(
        "/events/geofence",
        Reply::Json(json!({"count": 2, "events": [
            {"id": 1, "vehicle_id": "V1", "event_type": "enter",
             "latitude": 40.7128, "longitude": -74.006, "geofence_name": "Plant Gate",
             "timestamp": "2024-05-01T10:05:00", "notification_sent": true},
            {"id": 2, "vehicle_id": "V1", "event_type": "exit",
             "latitude": 40.7140, "longitude": -74.006, "geofence_name": "Plant Gate",
             "timestamp": "2024-05-01T10:00:00", "notification_sent": false}
        ]})),
    );
    provider.route(
        "/events/activity",
        Reply::Json(json!({"count": 2, "activities": [
            {"id": 5, "vehicle_id": "V2", "activity_type": "speed_alert",
             "description": "Vehicle V2 exceeded 80 km/h", "latitude": 40.71, "longitude": -74.01,
             "metadata": null, "timestamp": "2024-05-01T10:02:00"},
            {"id": 6, "vehicle_id": "V2", "activity_type": "status_change",
             "description": "Vehicle V2 went offline", "timestamp": "2024-05-01T10:05:00"}
        ]})),
    );
}

// Should fetch both collections and merge them newest first.
#[tokio::test]
async fn load_merges() {
    let provider = MockProvider::new();
    routes(&provider);

    let items = feed::load(&api(&provider), &FeedQuery::default()).await.expect("should load feed");

    let keys: Vec<_> = items.iter().map(|item| item.key()).collect();
    assert_eq!(
        keys,
        vec![
            (FeedSource::Geofence, 1),
            (FeedSource::Activity, 6),
            (FeedSource::Activity, 5),
            (FeedSource::Geofence, 2),
        ]
    );
    assert_eq!(items[3].description, "Vehicle V1 exited Plant Gate");
    assert_eq!(items[3].kind, "geofence_exit");
    assert!(items[1].position.is_none());

    let mut requests = provider.requests();
    requests.sort();
    assert_eq!(requests, vec!["/events/activity?hours=24&limit=50", "/events/geofence?hours=24"]);
}

// Should pass the vehicle filter to both collections.
#[tokio::test]
async fn vehicle_filter() {
    let provider = MockProvider::new();
    routes(&provider);

    let query = FeedQuery { hours: 6, vehicle_id: Some("V2".to_string()), limit: 10 };
    feed::load(&api(&provider), &query).await.expect("should load feed");

    let mut requests = provider.requests();
    requests.sort();
    assert_eq!(
        requests,
        vec![
            "/events/activity?hours=6&vehicle_id=V2&limit=10",
            "/events/geofence?hours=6&vehicle_id=V2"
        ]
    );
}

// Should keep the previous feed when a reload fails.
#[tokio::test]
async fn reload_failure_keeps_items() {
    let provider = MockProvider::new();
    routes(&provider);
    let api = api(&provider);
    let mut feed = EventFeed::new(FeedQuery::default());

    assert_eq!(feed.reload(&api, 1).await.expect("should load feed").len(), 4);
    assert!(!feed.is_stale(1));
    assert!(feed.is_stale(2));

    provider.route("/events/activity", Reply::Status(500, "boom".to_string()));
    let err = feed.reload(&api, 2).await.expect_err("activity fetch should fail");

    assert_eq!(err.code(), "application_error");
    assert_eq!(feed.items().len(), 4);
    assert!(feed.is_stale(2));
}
