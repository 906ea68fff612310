//! Shared fixtures for integration tests.
//!
//! A mock provider (wiremock) answers REST calls and a scripted connector
//! stands in for the WebSocket transport, so tests drive stream events by
//! hand.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use portfolio_market_data::application::ports::{
    Clock, ConnectRequest, StreamCommand, StreamConnector, StreamLink, SystemClock,
    TransportEvent, TransportEventKind,
};
use portfolio_market_data::{
    ChannelState, Credential, HttpGateway, InMemoryStore, KeyValueStore, MarketDataService,
    ProviderSettings, RateBudget, RateLimiter, TradeTick,
};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// Scripted Connector
// =============================================================================

/// One connection attempt captured by [`ScriptedConnector`].
pub struct ScriptedLink {
    pub credential: Credential,
    pub generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    commands: mpsc::UnboundedReceiver<StreamCommand>,
    pub cancel: CancellationToken,
}

impl ScriptedLink {
    /// Report a successful (re)connect.
    pub fn opened(&self) {
        self.emit(TransportEventKind::Opened);
    }

    /// Report a lost connection.
    pub fn closed(&self) {
        self.emit(TransportEventKind::Closed);
    }

    /// Push a batch of trades.
    pub fn trades(&self, trades: &[(&str, Decimal)]) {
        let ticks = trades
            .iter()
            .enumerate()
            .map(|(i, (symbol, price))| TradeTick {
                symbol: (*symbol).to_string(),
                price: *price,
                timestamp: 1_700_000_000_000 + i as i64,
                volume: Decimal::ONE,
            })
            .collect();
        self.emit(TransportEventKind::Trades(ticks));
    }

    fn emit(&self, kind: TransportEventKind) {
        self.events
            .send(TransportEvent {
                generation: self.generation,
                kind,
            })
            .unwrap();
    }

    /// Commands queued on this link so far.
    pub fn drain_commands(&mut self) -> Vec<StreamCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            commands.push(command);
        }
        commands
    }
}

/// Connector that records every link instead of dialing out.
#[derive(Default)]
pub struct ScriptedConnector {
    links: Mutex<Vec<ScriptedLink>>,
}

impl ScriptedConnector {
    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Run `f` against the most recent link.
    pub fn with_latest<R>(&self, f: impl FnOnce(&mut ScriptedLink) -> R) -> R {
        let mut links = self.links.lock();
        f(links.last_mut().expect("no link opened"))
    }

    /// Run `f` against the link at `index`.
    pub fn with_link<R>(&self, index: usize, f: impl FnOnce(&mut ScriptedLink) -> R) -> R {
        let mut links = self.links.lock();
        f(&mut links[index])
    }
}

impl StreamConnector for ScriptedConnector {
    fn connect(&self, request: ConnectRequest) -> StreamLink {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.links.lock().push(ScriptedLink {
            credential: request.credential,
            generation: request.generation,
            events: request.events,
            commands: rx,
            cancel: cancel.clone(),
        });
        StreamLink::new(tx, cancel)
    }
}

// =============================================================================
// Service Harness
// =============================================================================

pub struct Harness {
    pub server: MockServer,
    pub service: Arc<MarketDataService>,
    pub connector: Arc<ScriptedConnector>,
    pub store: Arc<dyn KeyValueStore>,
    pub cancel: CancellationToken,
}

impl Harness {
    /// Service against a fresh mock provider with an in-memory store.
    pub async fn start() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new())).await
    }

    /// Service against a fresh mock provider with the given store.
    pub async fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let server = MockServer::start().await;
        let settings = ProviderSettings {
            api_url: server.uri(),
            ..ProviderSettings::default()
        };
        let gateway = HttpGateway::new(
            &settings,
            Arc::new(RwLock::new(Credential::default())),
            RateLimiter::new(RateBudget::default()),
        )
        .unwrap();
        let connector = Arc::new(ScriptedConnector::default());
        let service = Arc::new(MarketDataService::new(
            gateway,
            connector.clone(),
            Arc::clone(&store),
            clock,
        ));

        let cancel = CancellationToken::new();
        tokio::spawn({
            let service = Arc::clone(&service);
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });

        Self {
            server,
            service,
            connector,
            store,
            cancel,
        }
    }

    /// Answer the validation listing for `token`.
    pub async fn accept_token(&self, token: &str, symbols: &[&str]) {
        let listing: Vec<Value> = symbols.iter().map(|s| json!({ "symbol": s })).collect();
        Mock::given(method("GET"))
            .and(path("/stock/symbol"))
            .and(query_param("token", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing))
            .mount(&self.server)
            .await;
    }

    /// Reject `token` with the provider's error object.
    pub async fn reject_token(&self, token: &str) {
        Mock::given(method("GET"))
            .and(path("/stock/symbol"))
            .and(query_param("token", token))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "error": "Invalid API key" })),
            )
            .mount(&self.server)
            .await;
    }

    /// Answer quotes for `symbol` with a current price of `price`.
    pub async fn quote(&self, symbol: &str, price: f64) {
        Mock::given(method("GET"))
            .and(path("/quote"))
            .and(query_param("symbol", symbol))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "c": price,
                "d": 0.5,
                "dp": 0.3,
                "h": price,
                "l": price,
                "o": price,
                "pc": price,
                "t": 1_711_900_000
            })))
            .mount(&self.server)
            .await;
    }

    /// Wait until the channel reaches `state`.
    pub async fn wait_for_channel(&self, state: ChannelState) {
        let mut rx = self.service.channel_state();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .expect("channel state timed out")
            .unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Price sink that forwards every delivery to a channel.
pub fn price_sink() -> (
    portfolio_market_data::PriceCallback,
    mpsc::UnboundedReceiver<Decimal>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = portfolio_market_data::PriceCallback::new(move |price| {
        let _ = tx.send(price);
    });
    (callback, rx)
}

/// Next delivered price, failing the test after [`WAIT`].
pub async fn next_price(rx: &mut mpsc::UnboundedReceiver<Decimal>) -> Decimal {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no price delivered")
        .expect("sink closed")
}
