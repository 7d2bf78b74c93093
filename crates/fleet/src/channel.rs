//! # Live channel
//!
//! A persistent push connection to the backend. The channel owns the
//! connection lifecycle (`Closed -> Connecting -> Open -> Closed`) and fans
//! decoded envelopes out to registered listeners. It never reconnects on its
//! own.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use realtime::{Connector, Error, FrameReader, FrameWriter, Result, malformed};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::VehicleLocation;
use crate::timestamp;

/// Connection lifecycle of a [`LiveChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Snapshot sent by the server right after the handshake.
    InitialLocations { locations: Vec<VehicleLocation>, sent_at: Option<DateTime<Utc>> },
    /// Snapshot sent on every server-side refresh.
    LocationUpdate { locations: Vec<VehicleLocation>, sent_at: Option<DateTime<Utc>> },
    /// Event collections changed; the payload is opaque.
    EventNotification { data: Value, sent_at: Option<DateTime<Utc>> },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` for invalid JSON, an unknown `type`, or a
    /// location payload that is not a list of locations.
    pub fn parse(frame: &str) -> Result<Self> {
        let raw: RawEnvelope =
            serde_json::from_str(frame).map_err(|e| malformed!("invalid envelope: {e}"))?;
        let sent_at = raw.timestamp;

        match raw.kind.as_str() {
            "initial_locations" => {
                Ok(Self::InitialLocations { locations: locations(&raw.kind, raw.data)?, sent_at })
            }
            "location_update" => {
                Ok(Self::LocationUpdate { locations: locations(&raw.kind, raw.data)?, sent_at })
            }
            "event_notification" => Ok(Self::EventNotification { data: raw.data, sent_at }),
            other => Err(malformed!("unknown message type `{other}`")),
        }
    }

    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InitialLocations { .. } => "initial_locations",
            Self::LocationUpdate { .. } => "location_update",
            Self::EventNotification { .. } => "event_notification",
        }
    }

    /// Server-side send time, when the frame carried one.
    #[must_use]
    pub const fn sent_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::InitialLocations { sent_at, .. }
            | Self::LocationUpdate { sent_at, .. }
            | Self::EventNotification { sent_at, .. } => *sent_at,
        }
    }

    /// The snapshot carried by the message, if any.
    #[must_use]
    pub fn locations(&self) -> Option<&[VehicleLocation]> {
        match self {
            Self::InitialLocations { locations, .. } | Self::LocationUpdate { locations, .. } => {
                Some(locations)
            }
            Self::EventNotification { .. } => None,
        }
    }
}

fn locations(kind: &str, data: Value) -> Result<Vec<VehicleLocation>> {
    if !data.is_array() {
        return Err(malformed!("{kind} payload is not a list"));
    }
    serde_json::from_value(data).map_err(|e| malformed!("{kind} payload: {e}"))
}

/// Outbound commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ask the server to push a fresh location snapshot.
    RequestLocations,
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

/// Observers of inbound envelopes, invoked in registration order.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Mutex<Registry>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

impl Listeners {
    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` when `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let before = registry.entries.len();
        registry.entries.retain(|(entry, _)| *entry != id);
        registry.entries.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener registered when the pass starts. Listeners may
    /// add or remove registrations; changes apply from the next pass.
    pub fn dispatch(&self, envelope: &Envelope) {
        let snapshot: Vec<Listener> =
            self.registry().entries.iter().map(|(_, listener)| Arc::clone(listener)).collect();
        for listener in snapshot {
            listener(envelope);
        }
    }
}

/// Unregisters its listener when dropped.
#[must_use = "the listener is removed when the subscription is dropped"]
#[derive(Debug)]
pub struct Subscription {
    id: ListenerId,
    listeners: Listeners,
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.listeners.remove(self.id);
    }
}

/// Push connection with a listener registry.
pub struct LiveChannel<C: Connector> {
    connector: C,
    handshake_timeout: Duration,
    state: Arc<watch::Sender<ChannelState>>,
    listeners: Listeners,
    writer: Option<C::Writer>,
    reader: Option<JoinHandle<()>>,
}

impl<C: Connector> fmt::Debug for LiveChannel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveChannel")
            .field("state", &self.state())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> LiveChannel<C> {
    pub fn new(connector: C, handshake_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ChannelState::Closed);
        Self {
            connector,
            handshake_timeout,
            state: Arc::new(state),
            listeners: Listeners::default(),
            writer: None,
            reader: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Observe state transitions, including remote closes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Register `listener` for as long as the returned guard lives.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.listeners.add(listener);
        Subscription { id, listeners: self.listeners.clone() }
    }

    /// Perform the handshake. Resolves once the channel is `Open`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelUnavailable` when the handshake fails or does not
    /// complete within the handshake timeout; the channel is then `Closed`.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state() == ChannelState::Open {
            return Ok(());
        }
        self.release().await;
        self.state.send_replace(ChannelState::Connecting);

        let (writer, mut reader) =
            match tokio::time::timeout(self.handshake_timeout, self.connector.connect()).await {
                Ok(Ok(halves)) => halves,
                Ok(Err(err)) => {
                    self.state.send_replace(ChannelState::Closed);
                    warn!(
                        monotonic_counter.channel_handshake_failed = 1,
                        error = %err,
                        "live channel handshake failed"
                    );
                    return Err(Error::ChannelUnavailable(format!("{err:#}")));
                }
                Err(_elapsed) => {
                    self.state.send_replace(ChannelState::Closed);
                    warn!(
                        monotonic_counter.channel_handshake_failed = 1,
                        "live channel handshake timed out"
                    );
                    return Err(Error::ChannelUnavailable(format!(
                        "handshake timed out after {:?}",
                        self.handshake_timeout
                    )));
                }
            };

        self.writer = Some(writer);
        self.state.send_replace(ChannelState::Open);
        info!("live channel open");

        let listeners = self.listeners.clone();
        let state = Arc::clone(&self.state);
        self.reader = Some(tokio::spawn(async move {
            while let Some(frame) = reader.next_frame().await {
                match frame {
                    Ok(text) => match Envelope::parse(&text) {
                        Ok(envelope) => {
                            debug!(kind = envelope.kind(), "live channel message");
                            listeners.dispatch(&envelope);
                        }
                        Err(err) => {
                            warn!(
                                monotonic_counter.malformed_messages = 1,
                                error = %err,
                                "ignoring live channel message"
                            );
                        }
                    },
                    Err(err) => {
                        warn!(error = %err, "live channel read failed");
                        break;
                    }
                }
            }
            state.send_replace(ChannelState::Closed);
            info!("live channel closed by remote");
        }));

        Ok(())
    }

    /// Send a command over the open channel.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless the channel is `Open`; nothing is
    /// buffered. Write failures surface as `NetworkFailure`.
    pub async fn send(&mut self, request: &Request) -> Result<()> {
        if self.state() != ChannelState::Open {
            return Err(Error::NotConnected);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::NotConnected);
        };
        let frame = serde_json::to_string(request)?;
        writer
            .send_frame(frame)
            .await
            .map_err(|err| Error::from(err.context("sending live channel request")))
    }

    /// Close the channel from any state. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.release().await;
        if self.state.send_replace(ChannelState::Closed) != ChannelState::Closed {
            info!("live channel disconnected");
        }
    }

    async fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take()
            && let Err(err) = writer.close().await
        {
            debug!(error = %err, "closing live channel writer");
        }
    }
}

impl<C: Connector> Drop for LiveChannel<C> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
