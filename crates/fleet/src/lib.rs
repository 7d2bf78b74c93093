//! # Fleet
//!
//! Live vehicle tracking for a single fleet backend.
//!
//! A [`Synchronizer`] keeps a [`PositionTable`] current from the backend's
//! push channel, falling back to polling the request/response API when the
//! channel is unavailable. Geofence containment and vehicle status are
//! computed on read; geofence transitions and activity records are merged
//! into one chronological feed by [`feed::merge`].
//!
//! Transports are injected through the `realtime` provider traits, so the
//! crate performs no I/O of its own.

pub mod api;
pub mod channel;
mod config;
pub mod feed;
pub mod geofence;
pub mod model;
pub mod status;
pub mod sync;
pub mod table;
pub mod timestamp;

pub use crate::api::FleetApi;
pub use crate::channel::{ChannelState, Envelope, LiveChannel, ListenerId, Request, Subscription};
pub use crate::config::{ReconnectPolicy, Settings};
pub use crate::feed::{EventFeed, FeedQuery, FeedSource, MergedFeedItem};
pub use crate::geofence::{Containment, Coordinate, Geofence, GeofenceStatus};
pub use crate::status::{StatusThresholds, VehicleStatus};
pub use crate::sync::{ConnectionState, SyncEvent, Synchronizer, UpdateSource};
pub use crate::table::{PositionTable, VehicleReport};
