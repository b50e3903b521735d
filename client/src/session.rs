use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use countrymap_shared::{Applied, LiveMessage, ReconcileError, Reconciler, ServerState, ServerStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelHandle, LiveChannel};
use crate::config::ClientConfig;
use crate::fetcher::{FetchError, FetchOutcome, SnapshotFetcher};
use crate::prefs::{PreferenceStore, Preferences};

#[derive(Debug, Default)]
pub struct SessionCounters {
    snapshots_applied_total: AtomicU64,
    deltas_applied_total: AtomicU64,
    deltas_rejected_total: AtomicU64,
    unknown_deltas_total: AtomicU64,
    fetch_failures_total: AtomicU64,
    reconnects_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub snapshots_applied_total: u64,
    pub deltas_applied_total: u64,
    pub deltas_rejected_total: u64,
    pub unknown_deltas_total: u64,
    pub fetch_failures_total: u64,
    pub reconnects_total: u64,
}

impl SessionCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            snapshots_applied_total: self.snapshots_applied_total.load(Ordering::Relaxed),
            deltas_applied_total: self.deltas_applied_total.load(Ordering::Relaxed),
            deltas_rejected_total: self.deltas_rejected_total.load(Ordering::Relaxed),
            unknown_deltas_total: self.unknown_deltas_total.load(Ordering::Relaxed),
            fetch_failures_total: self.fetch_failures_total.load(Ordering::Relaxed),
            reconnects_total: self.reconnects_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_snapshot_applied(&self) {
        self.snapshots_applied_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delta_applied(&self) {
        self.deltas_applied_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delta_rejected(&self) {
        self.deltas_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_delta(&self) {
        self.unknown_deltas_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects_total.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Ready,
    /// No document could be loaded yet; retried on every health check.
    Unavailable,
    /// Terminal: the backend does not know this server id.
    NotFound,
    Closed,
}

/// Everything a renderer needs, published after each applied event.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub server_id: String,
    pub phase: Phase,
    pub state: Option<Arc<ServerState>>,
    pub last_update: Option<DateTime<Utc>>,
    pub banner: Option<String>,
    pub applied: Applied,
    pub preferences: Preferences,
    pub counters: CounterSnapshot,
}

impl ViewState {
    fn loading(server_id: &str, preferences: Preferences) -> Self {
        Self {
            server_id: server_id.to_string(),
            phase: Phase::Loading,
            state: None,
            last_update: None,
            banner: None,
            applied: Applied::Unchanged,
            preferences,
            counters: CounterSnapshot::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchReason {
    Initial,
    HealthCheck,
    Reconnect,
}

#[derive(Debug)]
enum SessionEvent {
    Fetched {
        reason: FetchReason,
        result: Result<FetchOutcome, FetchError>,
    },
    SetPreferences(Preferences),
}

enum Flow {
    Continue,
    Stop,
}

/// Owner side of a running session.
pub struct SessionHandle {
    view: watch::Receiver<ViewState>,
    commands: mpsc::Sender<SessionEvent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.view.clone()
    }

    pub async fn set_preferences(&self, prefs: Preferences) {
        if self
            .commands
            .send(SessionEvent::SetPreferences(prefs))
            .await
            .is_err()
        {
            debug!("session already stopped, preference change dropped");
        }
    }

    /// Stop the session. Queued messages are dropped, not applied.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(Duration::from_secs(3), &mut self.task)
            .await
            .is_err()
        {
            warn!("session did not stop in time, aborting");
            self.task.abort();
        }
    }
}

pub struct Session {
    server_id: String,
    fetcher: SnapshotFetcher,
    live: LiveChannel,
    status_check_interval: Duration,
    event_buffer: usize,
    store: Box<dyn PreferenceStore>,
}

impl Session {
    pub fn new(
        config: &ClientConfig,
        server_id: impl Into<String>,
        store: Box<dyn PreferenceStore>,
    ) -> Result<Self, FetchError> {
        let server_id = server_id.into().trim().to_string();
        let fetcher = SnapshotFetcher::from_config(config)?;
        // Reject bad ids before anything is spawned.
        fetcher.snapshot_url(&server_id)?;
        let live = LiveChannel::new(config.live_url.clone(), server_id.clone(), config.connect_timeout);
        Ok(Self {
            server_id,
            fetcher,
            live,
            status_check_interval: config.status_check_interval,
            event_buffer: config.event_buffer.max(1),
            store,
        })
    }

    pub fn spawn(self) -> SessionHandle {
        let status_check_interval = self.status_check_interval;
        let (session_loop, events, view) = self.into_loop();
        let commands = session_loop.events_tx.clone();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(session_loop.run(events, shutdown_rx, status_check_interval));

        SessionHandle {
            view,
            commands,
            shutdown,
            task,
        }
    }

    fn into_loop(self) -> (SessionLoop, mpsc::Receiver<SessionEvent>, watch::Receiver<ViewState>) {
        let preferences = self.store.load();
        let (view_tx, view) = watch::channel(ViewState::loading(&self.server_id, preferences));
        let (events_tx, events) = mpsc::channel(self.event_buffer);

        let session_loop = SessionLoop {
            reconciler: Reconciler::new(self.server_id.clone()),
            server_id: self.server_id,
            fetcher: self.fetcher,
            live: self.live,
            event_buffer: self.event_buffer,
            channel: None,
            channel_rx: None,
            events_tx,
            fetch_task: None,
            refetch_pending: false,
            phase: Phase::Loading,
            banner: None,
            preferences,
            store: self.store,
            counters: SessionCounters::default(),
            view_tx,
        };
        (session_loop, events, view)
    }
}

struct SessionLoop {
    server_id: String,
    reconciler: Reconciler,
    fetcher: SnapshotFetcher,
    live: LiveChannel,
    event_buffer: usize,
    channel: Option<ChannelHandle>,
    channel_rx: Option<mpsc::Receiver<ChannelEvent>>,
    events_tx: mpsc::Sender<SessionEvent>,
    fetch_task: Option<JoinHandle<()>>,
    refetch_pending: bool,
    phase: Phase,
    banner: Option<String>,
    preferences: Preferences,
    store: Box<dyn PreferenceStore>,
    counters: SessionCounters,
    view_tx: watch::Sender<ViewState>,
}

async fn next_channel_event(rx: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SessionLoop {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        mut shutdown: watch::Receiver<bool>,
        status_check_interval: Duration,
    ) {
        info!(server_id = %self.server_id, "session started");
        self.start_fetch(FetchReason::Initial);

        let mut health =
            tokio::time::interval_at(Instant::now() + status_check_interval, status_check_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flow = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(event) = events.recv() => self.handle_event(event),
                event = next_channel_event(&mut self.channel_rx) => match event {
                    Some(event) => self.handle_channel(event),
                    None => {
                        self.channel_rx = None;
                        Flow::Continue
                    }
                },
                _ = health.tick() => {
                    self.start_fetch(FetchReason::HealthCheck);
                    Flow::Continue
                }
            };
            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        drop(events);
        self.teardown().await;
    }

    fn handle_event(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Fetched { reason, result } => {
                self.fetch_task = None;
                let flow = self.on_fetched(reason, result);
                if self.refetch_pending && matches!(flow, Flow::Continue) {
                    self.refetch_pending = false;
                    self.start_fetch(FetchReason::Reconnect);
                }
                flow
            }
            SessionEvent::SetPreferences(prefs) => {
                if let Err(e) = self.store.save(&prefs) {
                    warn!(error = %e, "failed to persist preferences");
                    self.banner = Some(format!("Preferences not saved: {e}"));
                }
                self.preferences = prefs;
                self.publish(Applied::Everything);
                Flow::Continue
            }
        }
    }

    fn start_fetch(&mut self, reason: FetchReason) {
        if self.fetch_task.is_some() {
            if reason == FetchReason::Reconnect {
                self.refetch_pending = true;
            }
            return;
        }
        let fetcher = self.fetcher.clone();
        let server_id = self.server_id.clone();
        let tx = self.events_tx.clone();
        debug!(server_id = %server_id, ?reason, "fetching snapshot");
        self.fetch_task = Some(tokio::spawn(async move {
            let result = fetcher.fetch(&server_id).await;
            let _ = tx.send(SessionEvent::Fetched { reason, result }).await;
        }));
    }

    fn open_channel(&mut self) {
        if self.channel.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(self.event_buffer);
        self.channel = Some(self.live.clone().spawn(tx));
        self.channel_rx = Some(rx);
    }

    fn on_fetched(&mut self, reason: FetchReason, result: Result<FetchOutcome, FetchError>) -> Flow {
        let seeded = self.reconciler.state().is_some();
        match result {
            Ok(outcome) => {
                let status = outcome.status();
                let previous = self.reconciler.status();
                // A routine health check only matters when the status moved.
                // Going offline keeps the cached collections.
                let replace = !seeded
                    || reason != FetchReason::HealthCheck
                    || (status == ServerStatus::Online && previous != Some(ServerStatus::Online));

                let applied = if replace {
                    match self.reconciler.apply_snapshot(outcome.into_state()) {
                        Ok(applied) => {
                            self.counters.record_snapshot_applied();
                            applied
                        }
                        Err(e) => {
                            self.counters.record_fetch_failure();
                            warn!(server_id = %self.server_id, error = %e, "rejected fetched snapshot");
                            self.banner = Some(format!("Server data could not be read: {e}"));
                            if !seeded {
                                self.phase = Phase::Unavailable;
                            }
                            self.publish(Applied::Unchanged);
                            return Flow::Continue;
                        }
                    }
                } else {
                    self.reconciler.set_status(status)
                };

                if previous.is_some() && previous != Some(status) {
                    info!(server_id = %self.server_id, status = status.as_str(), "server status changed");
                }
                self.phase = Phase::Ready;
                self.banner = match status {
                    ServerStatus::Online => None,
                    ServerStatus::Offline => {
                        Some("Server is offline; showing the last known data".to_string())
                    }
                };
                self.open_channel();
                self.publish(applied);
                Flow::Continue
            }
            Err(e) if e.is_terminal() && !seeded => {
                warn!(server_id = %self.server_id, error = %e, "server unavailable for this view");
                self.phase = Phase::NotFound;
                self.banner = Some(e.to_string());
                self.publish(Applied::Unchanged);
                Flow::Stop
            }
            Err(e) => {
                self.counters.record_fetch_failure();
                warn!(server_id = %self.server_id, ?reason, error = %e, "snapshot fetch failed");
                let applied = if seeded {
                    self.banner = Some(format!("Server unreachable; showing cached data ({e})"));
                    self.reconciler.set_status(ServerStatus::Offline)
                } else {
                    self.phase = Phase::Unavailable;
                    self.banner = Some(format!("Server data unavailable: {e}"));
                    Applied::Unchanged
                };
                self.open_channel();
                self.publish(applied);
                Flow::Continue
            }
        }
    }

    fn handle_channel(&mut self, event: ChannelEvent) -> Flow {
        match event {
            ChannelEvent::Connected { reconnect } => {
                if reconnect {
                    self.counters.record_reconnect();
                    info!(server_id = %self.server_id, "live channel reconnected, re-fetching snapshot");
                    self.start_fetch(FetchReason::Reconnect);
                }
                self.publish(Applied::Unchanged);
            }
            ChannelEvent::Message(LiveMessage::State(payload)) => {
                match self.reconciler.apply_live_state(&payload) {
                    Ok(applied) => {
                        self.counters.record_snapshot_applied();
                        self.phase = Phase::Ready;
                        self.banner = None;
                        self.publish(applied);
                    }
                    Err(e) => self.reject(e),
                }
            }
            ChannelEvent::Message(LiveMessage::Update(payload)) => {
                match self.reconciler.apply_update(&payload) {
                    Ok(applied) => {
                        self.counters.record_delta_applied();
                        self.publish(applied);
                    }
                    Err(e) => self.reject(e),
                }
            }
            ChannelEvent::Rejected(e) => self.reject(e),
            ChannelEvent::Disconnected { reason } => {
                self.banner = Some(format!("Live updates interrupted: {reason}"));
                self.publish(Applied::Unchanged);
            }
            ChannelEvent::Error(message) => {
                self.banner = Some(format!("Live updates unavailable: {message}"));
                self.publish(Applied::Unchanged);
            }
        }
        Flow::Continue
    }

    fn reject(&mut self, error: ReconcileError) {
        if error.is_ignorable() {
            self.counters.record_unknown_delta();
            debug!(server_id = %self.server_id, error = %error, "ignoring unrecognised message");
            return;
        }
        self.counters.record_delta_rejected();
        match error {
            ReconcileError::NotSeeded => {
                debug!(server_id = %self.server_id, "delta before first snapshot dropped");
            }
            error => {
                warn!(server_id = %self.server_id, error = %error, "live message rejected");
                self.banner = Some(format!("Live update skipped: {error}"));
                self.publish(Applied::Unchanged);
            }
        }
    }

    fn publish(&self, applied: Applied) {
        let view = ViewState {
            server_id: self.server_id.clone(),
            phase: self.phase,
            state: self.reconciler.state().cloned(),
            last_update: self.reconciler.last_update(),
            banner: self.banner.clone(),
            applied,
            preferences: self.preferences,
            counters: self.counters.snapshot(),
        };
        self.view_tx.send_replace(view);
    }

    async fn teardown(mut self) {
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        self.channel_rx = None;
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        if self.phase != Phase::NotFound {
            self.phase = Phase::Closed;
        }
        self.reconciler.discard();
        self.publish(Applied::Everything);
        info!(server_id = %self.server_id, "session closed");
    }
}
