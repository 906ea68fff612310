//! Streaming Channel Manager
//!
//! Owns the single live price stream and the subscription registry it
//! serves. Upstream subscribe/unsubscribe messages are sent only on a
//! topic's zero-to-one and one-to-zero transitions, and only while the
//! channel is open; every "open" event replays one subscribe per topic.
//!
//! # State Machine
//!
//! ```text
//!            open()                 Opened
//! Closed ───────────► Connecting ───────────► Open
//!   ▲                     │                    │
//!   └─────────────────────┴────────────────────┘
//!          close() / Closed
//! ```
//!
//! Each `open()` starts a new link generation. Events tagged with an older
//! generation come from a superseded link and are dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{
    ConnectRequest, StreamCommand, StreamConnector, StreamLink, TransportEvent, TransportEventKind,
};
use crate::domain::credential::Credential;
use crate::domain::market::{TradeTick, latest_per_symbol};
use crate::domain::subscription::{
    PriceCallback, SubscriptionRegistry, SubscriptionStats, TopicChange,
};
use crate::infrastructure::metrics;

/// Connection state of the price stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// No connection.
    Closed,
    /// Link requested, not yet open.
    Connecting,
    /// Connected; upstream messages are sent immediately.
    Open,
}

impl ChannelState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }
}

#[derive(Debug, Default)]
struct LinkSlot {
    generation: u64,
    link: Option<StreamLink>,
}

/// Multiplexes one stream connection into per-symbol callbacks.
pub struct ChannelManager {
    connector: Arc<dyn StreamConnector>,
    registry: SubscriptionRegistry,
    /// Guards link replacement, topic transitions and the open replay so a
    /// topic is announced upstream exactly once per connection.
    slot: Mutex<LinkSlot>,
    state: watch::Sender<ChannelState>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl ChannelManager {
    /// Create a closed channel.
    #[must_use]
    pub fn new(connector: Arc<dyn StreamConnector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Closed);

        Self {
            connector,
            registry: SubscriptionRegistry::new(),
            slot: Mutex::new(LinkSlot::default()),
            state,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Add a callback for a symbol, subscribing upstream on the first one.
    pub fn register(&self, symbol: &str, callback: PriceCallback) -> TopicChange {
        let slot = self.slot.lock();
        let change = self.registry.add(symbol, callback);

        if change == TopicChange::Created {
            self.send_if_open(&slot, StreamCommand::Subscribe(symbol.to_string()));
            metrics::set_upstream_topics(self.registry.stats().symbol_count);
        }
        debug!(symbol, ?change, "Registered price callback");
        change
    }

    /// Remove a callback, unsubscribing upstream when the topic empties.
    pub fn unregister(&self, symbol: &str, callback: &PriceCallback) -> TopicChange {
        let slot = self.slot.lock();
        let change = self.registry.remove(symbol, callback);

        if change == TopicChange::Removed {
            self.send_if_open(&slot, StreamCommand::Unsubscribe(symbol.to_string()));
            metrics::set_upstream_topics(self.registry.stats().symbol_count);
        }
        debug!(symbol, ?change, "Unregistered price callback");
        change
    }

    /// Callbacks currently registered for a symbol, in registration order.
    #[must_use]
    pub fn callbacks(&self, symbol: &str) -> Vec<PriceCallback> {
        self.registry.callbacks(symbol)
    }

    /// Symbols with at least one callback.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.registry.symbols()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.registry.stats()
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Replace any current link with a new one using `credential`.
    pub fn open(&self, credential: &Credential) {
        let mut slot = self.slot.lock();
        if let Some(old) = slot.link.take() {
            old.close();
        }
        slot.generation += 1;
        self.state.send_replace(ChannelState::Connecting);

        let link = self.connector.connect(ConnectRequest {
            credential: credential.clone(),
            generation: slot.generation,
            events: self.events_tx.clone(),
        });
        slot.link = Some(link);

        info!(generation = slot.generation, "Opening price stream");
    }

    /// Tear down the current link without reconnecting.
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        if let Some(link) = slot.link.take() {
            link.close();
            // Anything the old link still emits is now stale.
            slot.generation += 1;
            info!("Closed price stream");
        }
        self.state.send_replace(ChannelState::Closed);
    }

    /// Observable connection state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Current connection state.
    #[must_use]
    pub fn current_state(&self) -> ChannelState {
        *self.state.borrow()
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    /// Apply one transport event.
    pub fn handle_event(&self, event: TransportEvent) {
        let TransportEvent { generation, kind } = event;

        match kind {
            TransportEventKind::Opened => self.on_opened(generation),
            TransportEventKind::Closed => self.on_closed(generation),
            TransportEventKind::Trades(ticks) => {
                if self.is_current(generation) {
                    self.deliver(ticks);
                }
            }
            TransportEventKind::Error(message) => {
                warn!(generation, error = %message, "Price stream error");
            }
        }
    }

    /// Pump transport events until cancelled, then close the link.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut events) = self.events_rx.lock().take() else {
            warn!("Channel event pump is already running");
            return;
        };

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }

        self.close();
        debug!("Channel event pump stopped");
    }

    fn on_opened(&self, generation: u64) {
        let slot = self.slot.lock();
        if slot.generation != generation || slot.link.is_none() {
            debug!(generation, "Ignoring open event from superseded link");
            return;
        }

        self.state.send_replace(ChannelState::Open);

        let topics = self.registry.symbols();
        for symbol in &topics {
            self.send(&slot, StreamCommand::Subscribe(symbol.clone()));
        }
        info!(generation, topics = topics.len(), "Price stream open");
    }

    fn on_closed(&self, generation: u64) {
        let slot = self.slot.lock();
        if slot.generation != generation {
            return;
        }
        self.state.send_replace(ChannelState::Closed);
        info!(generation, "Price stream connection lost");
    }

    fn deliver(&self, ticks: Vec<TradeTick>) {
        let mut delivered: u64 = 0;

        for tick in latest_per_symbol(ticks) {
            // Snapshot first: callbacks may re-enter the manager.
            let callbacks = self.registry.callbacks(&tick.symbol);
            for callback in &callbacks {
                callback.call(tick.price);
            }
            delivered += callbacks.len() as u64;
        }

        if delivered > 0 {
            metrics::record_price_deliveries(delivered);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().generation == generation
    }

    fn send_if_open(&self, slot: &LinkSlot, command: StreamCommand) {
        if *self.state.borrow() == ChannelState::Open {
            self.send(slot, command);
        }
    }

    fn send(&self, slot: &LinkSlot, command: StreamCommand) {
        let Some(link) = &slot.link else {
            return;
        };
        if !link.send(command) {
            debug!(generation = slot.generation, "Price stream link is gone");
        }
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("state", &self.current_state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
