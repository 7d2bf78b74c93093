//! # Tracker
//!
//! Headless fleet tracker: keeps the live position table in sync with the
//! backend, logs a status breakdown whenever it changes and reloads the
//! merged event feed when it is invalidated.

mod provider;

use anyhow::Result;
use chrono::Utc;
use fleet::{EventFeed, FeedQuery, Settings, SyncEvent, Synchronizer, VehicleStatus};
use realtime::{Connector, HttpRequest};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::provider::{HttpClient, WsConnector};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    Registry::default().with(filter).with(fmt::layer()).init();

    let settings = Settings::from_env();
    let connector = WsConnector::new(settings.channel_url.clone());
    let mut sync = Synchronizer::new(HttpClient::new()?, connector, settings);

    let state = sync.start().await;
    info!(?state, vehicles = sync.table().len(), "tracker started");
    report(&sync);

    let mut feed = EventFeed::new(FeedQuery::default());
    reload(&sync, &mut feed).await;

    loop {
        tokio::select! {
            event = sync.next() => {
                let Some(event) = event else { break };
                handle(&sync, &mut feed, event).await;
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    error!(error = %err, "listening for ctrl-c");
                }
                info!("shutting down");
                break;
            }
        }
    }

    sync.shutdown().await;
    Ok(())
}

async fn handle<P: HttpRequest, C: Connector>(
    sync: &Synchronizer<P, C>, feed: &mut EventFeed, event: SyncEvent,
) {
    match event {
        SyncEvent::Replaced { source, vehicles } => {
            info!(?source, vehicles, "positions updated");
            report(sync);
        }
        SyncEvent::FeedInvalidated { .. } => reload(sync, feed).await,
        SyncEvent::Failed(err) => {
            error!(
                error = %err,
                vehicles = sync.table().len(),
                "update failed, showing last known positions"
            );
        }
        SyncEvent::ChannelLost => warn!("live updates lost, polling"),
        SyncEvent::Reconnected => info!("live updates restored"),
        SyncEvent::ReconnectFailed { attempt, error, retrying } => {
            warn!(attempt, retrying, error = %error, "live channel reconnect failed");
        }
    }
}

async fn reload<P: HttpRequest, C: Connector>(sync: &Synchronizer<P, C>, feed: &mut EventFeed) {
    let revision = sync.feed_revision();
    if !feed.is_stale(revision) {
        return;
    }
    if let Ok(items) = feed.reload(sync.api(), revision).await {
        match items.first() {
            Some(latest) => {
                info!(items = items.len(), latest = %latest.description, "event feed updated");
            }
            None => info!("event feed empty"),
        }
    }
}

fn report<P: HttpRequest, C: Connector>(sync: &Synchronizer<P, C>) {
    let settings = sync.settings();
    let breakdown = sync.table().breakdown(&settings.geofence, &settings.thresholds, Utc::now());
    let count = |status| breakdown.get(&status).copied().unwrap_or(0);

    info!(
        state = ?sync.state(),
        total = sync.table().len(),
        active = count(VehicleStatus::Active),
        in_geofence = count(VehicleStatus::InGeofence),
        speeding = count(VehicleStatus::Speeding),
        offline = count(VehicleStatus::Offline),
        geofence = %settings.geofence.name,
        "fleet status"
    );
    if let Some(err) = sync.last_error() {
        warn!(error = %err, "positions may be stale");
    }
}
