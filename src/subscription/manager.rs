// =============================================================================
// Subscription Manager — debounced desired state -> per-group channel control
// =============================================================================
//
// The manager owns the desired state (watched instruments + candle interval)
// in a `watch` channel.  One group task per stream kind observes it:
//
//   desired change   -> debouncer re-armed (only the last change survives)
//   debouncer fired  -> planner.apply(latest desired) -> execute intents
//   channel Ready    -> planner.on_ready()            -> full subscribe
//   channel Message  -> StreamDispatcher::handle_text
//   channel Closed   -> planner.on_closed(), reconnect after a delay
//   shutdown         -> cancel timer, close channel once, exit
//
// Settled desired states are republished on a second `watch` so observers
// (backfill, pruning) react to what was applied rather than to every keypress.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent, Connector};
use crate::market_data::protocol::{SubscriptionMethod, SubscriptionRequest};
use crate::market_data::{StreamDispatcher, StreamKind};
use crate::subscription::debounce::Debouncer;
use crate::subscription::planner::{ChannelIntent, DesiredState, GroupState, SubscriptionPlanner};
use crate::types::{Instrument, KlineInterval};

#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    pub debounce: Duration,
    pub reconnect_delay: Duration,
    pub close_when_empty: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            reconnect_delay: Duration::from_secs(5),
            close_when_empty: false,
        }
    }
}

/// Per-group view exposed on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatus {
    pub state: GroupState,
    pub active_topics: usize,
    pub connections_opened: u64,
    pub requests_sent: u64,
    pub last_error: Option<String>,
}

impl Default for GroupStatus {
    fn default() -> Self {
        Self {
            state: GroupState::Unsubscribed,
            active_topics: 0,
            connections_opened: 0,
            requests_sent: 0,
            last_error: None,
        }
    }
}

pub struct SubscriptionManager {
    desired_tx: watch::Sender<DesiredState>,
    settled_tx: Arc<watch::Sender<DesiredState>>,
    shutdown_tx: watch::Sender<bool>,
    groups: Mutex<Vec<JoinHandle<()>>>,
    statuses: HashMap<StreamKind, Arc<RwLock<GroupStatus>>>,
}

impl SubscriptionManager {
    /// Spawn the trade and candle groups.  Must be called inside a runtime.
    pub fn start<C: Connector>(
        connector: Arc<C>,
        dispatcher: Arc<StreamDispatcher>,
        initial: DesiredState,
        settings: ManagerSettings,
    ) -> Self {
        let (desired_tx, _) = watch::channel(initial);
        // Starts empty so the first applied state is reported to observers.
        let (settled_tx, _) = watch::channel(DesiredState::default());
        let settled_tx = Arc::new(settled_tx);
        let (shutdown_tx, _) = watch::channel(false);

        let mut handles = Vec::new();
        let mut statuses = HashMap::new();
        for kind in [StreamKind::Trade, StreamKind::Candle] {
            let status = Arc::new(RwLock::new(GroupStatus::default()));
            statuses.insert(kind, status.clone());

            let group = GroupTask {
                kind,
                connector: connector.clone(),
                dispatcher: dispatcher.clone(),
                planner: SubscriptionPlanner::new(kind, settings.close_when_empty),
                debouncer: Debouncer::new(),
                settings,
                desired_rx: desired_tx.subscribe(),
                settled_tx: settled_tx.clone(),
                shutdown_rx: shutdown_tx.subscribe(),
                status,
                conn: None,
                next_request_id: 1,
            };
            handles.push(tokio::spawn(group.run()));
        }

        info!(
            debounce_ms = settings.debounce.as_millis() as u64,
            reconnect_ms = settings.reconnect_delay.as_millis() as u64,
            "subscription manager started"
        );

        Self {
            desired_tx,
            settled_tx,
            shutdown_tx,
            groups: Mutex::new(handles),
            statuses,
        }
    }

    pub fn desired(&self) -> DesiredState {
        self.desired_tx.borrow().clone()
    }

    /// Replace the desired state.  Equal states are not re-announced.
    pub fn update(&self, desired: DesiredState) {
        self.desired_tx.send_if_modified(|current| {
            if *current == desired {
                false
            } else {
                *current = desired;
                true
            }
        });
    }

    pub fn set_watched(&self, instruments: impl IntoIterator<Item = Instrument>) {
        let interval = self.desired_tx.borrow().interval;
        self.update(DesiredState::new(instruments, interval));
    }

    pub fn set_interval(&self, interval: KlineInterval) {
        let mut next = self.desired();
        next.interval = interval;
        self.update(next);
    }

    /// Desired states as they are applied, after debouncing.
    pub fn watch_settled(&self) -> watch::Receiver<DesiredState> {
        self.settled_tx.subscribe()
    }

    pub fn status(&self, kind: StreamKind) -> GroupStatus {
        self.statuses
            .get(&kind)
            .map(|s| s.read().clone())
            .unwrap_or_default()
    }

    /// Cancel pending work and close every channel.  Idempotent.
    pub async fn dispose(&self) {
        self.shutdown_tx.send_replace(true);
        let handles = std::mem::take(&mut *self.groups.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "subscription group task failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Group task
// ---------------------------------------------------------------------------

struct Connection<Ch> {
    channel: Ch,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

struct GroupTask<C: Connector> {
    kind: StreamKind,
    connector: Arc<C>,
    dispatcher: Arc<StreamDispatcher>,
    planner: SubscriptionPlanner,
    debouncer: Debouncer,
    settings: ManagerSettings,
    desired_rx: watch::Receiver<DesiredState>,
    settled_tx: Arc<watch::Sender<DesiredState>>,
    shutdown_rx: watch::Receiver<bool>,
    status: Arc<RwLock<GroupStatus>>,
    conn: Option<Connection<C::Channel>>,
    next_request_id: u64,
}

async fn next_event<Ch>(conn: &mut Option<Connection<Ch>>) -> Option<ChannelEvent> {
    match conn {
        Some(c) => c.events.recv().await,
        None => std::future::pending().await,
    }
}

impl<C: Connector> GroupTask<C> {
    async fn run(mut self) {
        self.debouncer.schedule(self.settings.debounce);

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = self.desired_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.debouncer.schedule(self.settings.debounce);
                }
                _ = self.debouncer.fired() => {
                    self.on_settled();
                }
                event = next_event(&mut self.conn) => {
                    // A vanished sender means the socket task is gone.
                    self.on_event(event.unwrap_or(ChannelEvent::Closed));
                }
                _ = self.shutdown_rx.changed() => {
                    break;
                }
            }
        }

        self.teardown();
    }

    fn on_settled(&mut self) {
        let desired = self.desired_rx.borrow_and_update().clone();
        let intents = self.planner.apply(&desired);
        debug!(stream = %self.kind, intents = ?intents, "desired state settled");

        if self.kind == StreamKind::Candle {
            self.dispatcher.set_interval(desired.interval);
        }

        self.settled_tx.send_if_modified(|current| {
            if *current == desired {
                false
            } else {
                *current = desired.clone();
                true
            }
        });
        self.execute(intents);
    }

    fn on_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Ready => {
                info!(stream = %self.kind, "channel ready");
                let intents = self.planner.on_ready();
                self.execute(intents);
            }
            ChannelEvent::Message(text) => {
                self.dispatcher.handle_text(self.kind, &text);
            }
            ChannelEvent::Error(reason) => {
                warn!(stream = %self.kind, error = %reason, "channel error");
                self.status.write().last_error = Some(reason);
            }
            ChannelEvent::Closed => self.on_unexpected_close(),
        }
    }

    fn on_unexpected_close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.channel.close();
        }
        self.planner.on_closed();
        self.sync_status();

        if !self.desired_rx.borrow().instruments.is_empty() {
            warn!(
                stream = %self.kind,
                retry_in_ms = self.settings.reconnect_delay.as_millis() as u64,
                "channel closed, scheduling reconnect"
            );
            self.debouncer.schedule(self.settings.reconnect_delay);
        }
    }

    fn execute(&mut self, intents: Vec<ChannelIntent>) {
        for intent in intents {
            match intent {
                ChannelIntent::Open => {
                    if let Some(mut old) = self.conn.take() {
                        old.channel.close();
                    }
                    let (tx, rx) = mpsc::unbounded_channel();
                    let channel = self.connector.open(self.kind, tx);
                    self.conn = Some(Connection {
                        channel,
                        events: rx,
                    });
                    self.status.write().connections_opened += 1;
                    info!(stream = %self.kind, "opening channel");
                }
                ChannelIntent::Subscribe(topics) => {
                    self.send_request(SubscriptionMethod::Subscribe, topics);
                }
                ChannelIntent::Unsubscribe(topics) => {
                    self.send_request(SubscriptionMethod::Unsubscribe, topics);
                }
                ChannelIntent::Close => {
                    if let Some(mut conn) = self.conn.take() {
                        conn.channel.close();
                        info!(stream = %self.kind, "channel closed");
                    }
                }
            }
        }
        self.sync_status();
    }

    fn send_request(&mut self, method: SubscriptionMethod, params: Vec<String>) {
        let Some(conn) = self.conn.as_mut() else {
            warn!(stream = %self.kind, ?method, "no channel for request");
            return;
        };

        let request = SubscriptionRequest {
            method,
            params,
            id: self.next_request_id.to_string(),
        };
        self.next_request_id += 1;

        let result = request.to_json().and_then(|json| conn.channel.send(json));
        match result {
            Ok(()) => {
                info!(
                    stream = %self.kind,
                    ?method,
                    id = %request.id,
                    topics = request.params.len(),
                    "subscription request sent"
                );
                self.status.write().requests_sent += 1;
            }
            Err(e) => {
                warn!(stream = %self.kind, error = %e, "subscription request failed");
                self.status.write().last_error = Some(e.to_string());
            }
        }
    }

    fn sync_status(&self) {
        let mut status = self.status.write();
        status.state = self.planner.state();
        status.active_topics = self.planner.active_topics().len();
    }

    fn teardown(&mut self) {
        if self.debouncer.is_armed() {
            debug!(stream = %self.kind, "discarding unapplied desired state");
        }
        self.debouncer.cancel();
        let intents = self.planner.teardown();
        self.execute(intents);
        if let Some(mut conn) = self.conn.take() {
            conn.channel.close();
        }
        info!(stream = %self.kind, "subscription group stopped");
    }
}
