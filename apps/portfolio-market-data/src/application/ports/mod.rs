//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`KeyValueStore`]: Durable string storage for the credential and ledger
//! - [`Clock`]: Wall-clock source for history windows and ledger timestamps
//! - [`StreamConnector`]: Opens the live push connection
//!
//! ## Driver Ports (Inbound)
//!
//! - [`PriceFeed`]: Live price subscriptions, consumed by the portfolio ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::credential::Credential;
use crate::domain::market::{SeriesError, Symbol, TradeTick};
use crate::domain::subscription::PriceCallback;

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by market data operations.
///
/// An empty history is not an error: `no_data` decodes to an empty series.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketDataError {
    /// Transport failure, no usable response.
    #[error("network error: {0}")]
    Network(String),

    /// The provider answered with an error payload.
    #[error("provider error: {0}")]
    Provider(String),

    /// The rate limiter refused to schedule the request.
    #[error("request quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// A candle series violated its column invariant.
    #[error(transparent)]
    MalformedSeries(#[from] SeriesError),
}

/// Errors raised by a [`KeyValueStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying IO failed.
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be encoded or decoded.
    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

// =============================================================================
// Storage and Time
// =============================================================================

/// Durable key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backing storage cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Wall-clock source.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =============================================================================
// Streaming Transport
// =============================================================================

/// Outbound stream commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
    /// Start receiving trades for a symbol.
    Subscribe(Symbol),
    /// Stop receiving trades for a symbol.
    Unsubscribe(Symbol),
}

/// Transport event tagged with the connection generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Generation of the link that emitted the event.
    pub generation: u64,
    /// What happened.
    pub kind: TransportEventKind,
}

/// Transport event kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// Connection established (initial connect or transparent reconnect).
    Opened,
    /// Decoded trade batch.
    Trades(Vec<TradeTick>),
    /// Connection lost.
    Closed,
    /// Transport failure worth reporting.
    Error(String),
}

/// Parameters for opening a stream link.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Credential to authenticate the connection with.
    pub credential: Credential,
    /// Generation stamped on every event of this link.
    pub generation: u64,
    /// Sink for transport events.
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

/// Handle to an open (or opening) stream link.
///
/// Dropping the handle does not close the link; call [`StreamLink::close`].
#[derive(Debug, Clone)]
pub struct StreamLink {
    outbound: mpsc::UnboundedSender<StreamCommand>,
    cancel: CancellationToken,
}

impl StreamLink {
    /// Create a link handle.
    #[must_use]
    pub const fn new(outbound: mpsc::UnboundedSender<StreamCommand>, cancel: CancellationToken) -> Self {
        Self { outbound, cancel }
    }

    /// Queue a command. Returns `false` if the link is gone.
    pub fn send(&self, command: StreamCommand) -> bool {
        self.outbound.send(command).is_ok()
    }

    /// Tear the link down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the link has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

/// Opens stream links.
pub trait StreamConnector: Send + Sync {
    /// Start connecting. Events are reported through `request.events`.
    fn connect(&self, request: ConnectRequest) -> StreamLink;
}

// =============================================================================
// Price Feed
// =============================================================================

/// Live price subscriptions.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Register a callback and seed it with a fresh quote.
    ///
    /// # Errors
    ///
    /// Returns `MarketDataError` if the seeding quote fails; the
    /// registration is kept.
    async fn subscribe(&self, symbol: &str, callback: PriceCallback) -> Result<(), MarketDataError>;

    /// Remove a callback.
    fn unsubscribe(&self, symbol: &str, callback: &PriceCallback);
}
