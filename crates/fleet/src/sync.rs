//! # State synchronizer
//!
//! Keeps the position table current. The live channel is preferred; when it
//! cannot be opened, or is lost, the synchronizer degrades to polling the
//! transport client on a fixed interval while it retries the channel with
//! exponential backoff.
//!
//! All work happens inside [`Synchronizer::next`], [`Synchronizer::refresh`]
//! and [`Synchronizer::shutdown`]; nothing mutates the table in the
//! background.

use std::future;

use realtime::{Connector, Error, HttpRequest, Result};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{FleetApi, LocationQuery};
use crate::channel::{ChannelState, Envelope, LiveChannel, Request, Subscription};
use crate::config::Settings;
use crate::table::PositionTable;

/// Synchronizer connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Starting up: bootstrapping and opening the live channel.
    Connecting,
    /// Receiving snapshots over the live channel; not polling.
    Open,
    /// Polling the transport client.
    Degraded,
    /// Shut down.
    Closed,
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Bootstrap,
    Push,
    Poll,
    Refresh,
}

/// Outcome of one [`Synchronizer::next`] step.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The position table was replaced by a snapshot.
    Replaced { source: UpdateSource, vehicles: usize },
    /// Event collections changed upstream and should be reloaded.
    FeedInvalidated { revision: u64 },
    /// A poll failed; the previous table is kept.
    Failed(Error),
    /// The live channel closed; polling has started.
    ChannelLost,
    /// The live channel was re-established; polling has stopped.
    Reconnected,
    /// A reconnect attempt failed. `retrying` is false once attempts are
    /// exhausted.
    ReconnectFailed { attempt: u32, error: Error, retrying: bool },
}

#[derive(Debug, Clone, Copy)]
struct Reconnect {
    attempt: u32,
    at: Instant,
}

enum Step {
    Message(Envelope),
    ChannelChanged(bool),
    Poll,
    Reconnect(u32),
}

/// Owns the position table, the connection state and the polling timer.
#[derive(Debug)]
pub struct Synchronizer<P, C: Connector> {
    api: FleetApi<P>,
    channel: LiveChannel<C>,
    settings: Settings,
    table: PositionTable,
    state: ConnectionState,
    last_error: Option<Error>,
    poller: Option<Interval>,
    reconnect: Option<Reconnect>,
    subscription: Option<Subscription>,
    inbox_tx: mpsc::UnboundedSender<Envelope>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    channel_state: watch::Receiver<ChannelState>,
    feed_revision: u64,
}

impl<P: HttpRequest, C: Connector> Synchronizer<P, C> {
    pub fn new(provider: P, connector: C, settings: Settings) -> Self {
        let api = FleetApi::new(provider, settings.api_url.clone(), settings.request_timeout);
        let channel = LiveChannel::new(connector, settings.handshake_timeout);
        let channel_state = channel.watch_state();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();

        Self {
            api,
            channel,
            settings,
            table: PositionTable::new(),
            state: ConnectionState::Connecting,
            last_error: None,
            poller: None,
            reconnect: None,
            subscription: None,
            inbox_tx,
            inbox,
            channel_state,
            feed_revision: 0,
        }
    }

    /// Bootstrap the table, then open the live channel or fall back to
    /// polling. Never fails: a bootstrap error is kept in
    /// [`Synchronizer::last_error`] and a channel error degrades.
    ///
    /// Only the first call does anything; a shut down synchronizer stays
    /// closed.
    pub async fn start(&mut self) -> ConnectionState {
        if self.state != ConnectionState::Connecting {
            return self.state;
        }

        info!(api = %self.settings.api_url, "starting synchronizer");
        if let Ok(vehicles) = self.fetch(UpdateSource::Bootstrap).await {
            info!(vehicles, "bootstrapped position table");
        }

        self.attach();
        match self.channel.connect().await {
            Ok(()) => self.open(),
            Err(err) => {
                warn!(error = %err, "live channel unavailable, polling instead");
                self.detach();
                self.degrade();
                self.schedule_reconnect(0);
            }
        }
        self.state
    }

    /// Wait for and apply the next push message, poll tick, channel loss or
    /// reconnect attempt. Returns `None` once shut down.
    pub async fn next(&mut self) -> Option<SyncEvent> {
        loop {
            if self.state == ConnectionState::Closed {
                return None;
            }

            let watching = self.state == ConnectionState::Open;
            let reconnect = self.reconnect;
            let step = tokio::select! {
                biased;

                Some(envelope) = self.inbox.recv() => Step::Message(envelope),
                changed = self.channel_state.changed(), if watching => {
                    Step::ChannelChanged(changed.is_ok())
                }
                () = tick(self.poller.as_mut()) => Step::Poll,
                attempt = due(reconnect) => Step::Reconnect(attempt),
            };

            match step {
                Step::Message(envelope) => return Some(self.apply(envelope)),
                Step::ChannelChanged(alive) => {
                    let closed =
                        !alive || *self.channel_state.borrow_and_update() == ChannelState::Closed;
                    if closed && self.state == ConnectionState::Open {
                        return Some(self.lost());
                    }
                }
                Step::Poll => {
                    debug!("polling locations");
                    let event = match self.fetch(UpdateSource::Poll).await {
                        Ok(vehicles) => {
                            SyncEvent::Replaced { source: UpdateSource::Poll, vehicles }
                        }
                        Err(err) => SyncEvent::Failed(err),
                    };
                    return Some(event);
                }
                Step::Reconnect(attempt) => return Some(self.try_reconnect(attempt).await),
            }
        }
    }

    /// Ask for fresh data. When open, the request goes over the live channel
    /// and the answer arrives as a push message; otherwise the transport
    /// client is called immediately. Either way the feed is invalidated.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` after shutdown, or the transport client error
    /// when an immediate fetch fails.
    pub async fn refresh(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(Error::NotConnected);
        }
        self.feed_revision += 1;

        if self.state == ConnectionState::Open {
            match self.channel.send(&Request::RequestLocations).await {
                Ok(()) => {
                    debug!("requested locations over live channel");
                    return Ok(());
                }
                Err(err) => warn!(error = %err, "live channel refresh failed, fetching instead"),
            }
        }
        self.fetch(UpdateSource::Refresh).await.map(|_| ())
    }

    /// Detach from the channel, stop polling and close. Idempotent.
    pub async fn shutdown(&mut self) {
        self.detach();
        self.poller = None;
        self.reconnect = None;
        self.channel.disconnect().await;
        while self.inbox.try_recv().is_ok() {}

        if self.state != ConnectionState::Closed {
            info!("synchronizer stopped");
        }
        self.state = ConnectionState::Closed;
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub const fn table(&self) -> &PositionTable {
        &self.table
    }

    /// The most recent transport failure, cleared by the next good snapshot.
    #[must_use]
    pub const fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Bumped by every event notification and every manual refresh.
    #[must_use]
    pub const fn feed_revision(&self) -> u64 {
        self.feed_revision
    }

    /// Whether a reconnect attempt is scheduled.
    #[must_use]
    pub const fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn api(&self) -> &FleetApi<P> {
        &self.api
    }

    fn apply(&mut self, envelope: Envelope) -> SyncEvent {
        let sent_at = envelope.sent_at();
        match envelope {
            Envelope::InitialLocations { locations, .. }
            | Envelope::LocationUpdate { locations, .. } => {
                let vehicles = self.table.replace(locations);
                self.last_error = None;
                debug!(
                    monotonic_counter.push_snapshots = 1,
                    vehicles,
                    ?sent_at,
                    "applied pushed snapshot"
                );
                SyncEvent::Replaced { source: UpdateSource::Push, vehicles }
            }
            Envelope::EventNotification { .. } => {
                self.feed_revision += 1;
                debug!(revision = self.feed_revision, ?sent_at, "event feed invalidated");
                SyncEvent::FeedInvalidated { revision: self.feed_revision }
            }
        }
    }

    async fn fetch(&mut self, source: UpdateSource) -> Result<usize> {
        let query = LocationQuery { limit: self.settings.bootstrap_limit, vehicle_id: None };
        match self.api.locations(&query).await {
            Ok(locations) => {
                let vehicles = self.table.replace(locations);
                self.last_error = None;
                Ok(vehicles)
            }
            Err(err) => {
                warn!(
                    monotonic_counter.fetch_failures = 1,
                    ?source,
                    error = %err,
                    "location fetch failed, keeping last known positions"
                );
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn try_reconnect(&mut self, attempt: u32) -> SyncEvent {
        self.reconnect = None;
        self.attach();
        match self.channel.connect().await {
            Ok(()) => {
                info!(attempt = attempt + 1, "live channel re-established");
                self.open();
                SyncEvent::Reconnected
            }
            Err(error) => {
                self.detach();
                self.schedule_reconnect(attempt + 1);
                let retrying = self.reconnect.is_some();
                if !retrying {
                    warn!(attempts = attempt + 1, "giving up on live channel, polling only");
                }
                SyncEvent::ReconnectFailed { attempt: attempt + 1, error, retrying }
            }
        }
    }

    fn lost(&mut self) -> SyncEvent {
        warn!(monotonic_counter.channel_lost = 1, "live channel lost, polling instead");
        self.detach();
        self.degrade();
        self.schedule_reconnect(0);
        SyncEvent::ChannelLost
    }

    fn attach(&mut self) {
        if self.subscription.is_none() {
            let inbox = self.inbox_tx.clone();
            self.subscription = Some(self.channel.subscribe(move |envelope| {
                if inbox.send(envelope.clone()).is_err() {
                    debug!("synchronizer inbox closed");
                }
            }));
        }
    }

    fn detach(&mut self) {
        self.subscription = None;
    }

    fn open(&mut self) {
        self.state = ConnectionState::Open;
        self.poller = None;
        self.reconnect = None;
    }

    fn degrade(&mut self) {
        self.state = ConnectionState::Degraded;
        if self.poller.is_none() {
            let period = self.settings.poll_period();
            let mut poller = tokio::time::interval_at(Instant::now() + period, period);
            poller.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.poller = Some(poller);
        }
    }

    fn schedule_reconnect(&mut self, attempt: u32) {
        let policy = self.settings.reconnect;
        if !policy.allows(attempt) {
            self.reconnect = None;
            return;
        }
        let delay = policy.delay(attempt);
        let Some(at) = Instant::now().checked_add(delay) else {
            warn!(attempt = attempt + 1, ?delay, "reconnect delay out of range, polling only");
            self.reconnect = None;
            return;
        };
        debug!(attempt = attempt + 1, ?delay, "scheduling live channel reconnect");
        self.reconnect = Some(Reconnect { attempt, at });
    }
}

async fn tick(poller: Option<&mut Interval>) {
    match poller {
        Some(poller) => {
            poller.tick().await;
        }
        None => future::pending().await,
    }
}

async fn due(reconnect: Option<Reconnect>) -> u32 {
    match reconnect {
        Some(Reconnect { attempt, at }) => {
            tokio::time::sleep_until(at).await;
            attempt
        }
        None => future::pending().await,
    }
}
