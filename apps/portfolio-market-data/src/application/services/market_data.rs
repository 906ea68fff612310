//! Market Data Service
//!
//! The public surface of the market data core. REST-backed lookups go
//! through the rate-limited gateway; live prices go through the channel
//! manager. Credential changes are delegated to the credential monitor,
//! which in turn drives the channel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveTime, TimeDelta};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::{ChannelManager, ChannelState};
use super::credential::{CREDENTIAL_KEY, CredentialMonitor};
use crate::application::ports::{
    Clock, KeyValueStore, MarketDataError, PriceFeed, StreamConnector,
};
use crate::domain::credential::{Credential, DomesticSymbols, ValidityState};
use crate::domain::market::{
    CandleSeries, PricePoint, Quote, SymbolDescription, SymbolLookup,
};
use crate::domain::subscription::{PriceCallback, SubscriptionStats};
use crate::infrastructure::gateway::wire::{CandleData, ProviderPayload, QuoteData};
use crate::infrastructure::gateway::{CANDLES, HttpGateway, QUOTE, SEARCH};
use crate::infrastructure::rate_limit::QuotaEvent;

const DAILY_RESOLUTION: &str = "D";

/// Facade over the gateway, channel and credential monitor.
pub struct MarketDataService {
    gateway: HttpGateway,
    channel: Arc<ChannelManager>,
    monitor: CredentialMonitor,
    symbols: Arc<DomesticSymbols>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl MarketDataService {
    /// Wire the service together. No request is made until a credential is set.
    #[must_use]
    pub fn new(
        gateway: HttpGateway,
        connector: Arc<dyn StreamConnector>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let channel = Arc::new(ChannelManager::new(connector));
        let symbols = Arc::new(DomesticSymbols::new());
        let monitor = CredentialMonitor::new(
            gateway.clone(),
            channel.clone(),
            store.clone(),
            symbols.clone(),
        );

        Self {
            gateway,
            channel,
            monitor,
            symbols,
            store,
            clock,
        }
    }

    // =========================================================================
    // REST
    // =========================================================================

    /// Search symbols by free-text query.
    ///
    /// # Errors
    ///
    /// Returns `MarketDataError` if the request fails or the provider
    /// answers with an error.
    pub async fn search_symbols(&self, query: &str) -> Result<SymbolLookup, MarketDataError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SymbolLookup::default());
        }

        let payload: ProviderPayload<SymbolLookup> =
            self.gateway.request(SEARCH, &[("q", query)]).await?;
        payload.into_result().map_err(MarketDataError::Provider)
    }

    /// Search, keeping only known domestic symbols.
    ///
    /// # Errors
    ///
    /// Same as [`Self::search_symbols`].
    pub async fn search_domestic_symbols(
        &self,
        query: &str,
    ) -> Result<Vec<SymbolDescription>, MarketDataError> {
        let lookup = self.search_symbols(query).await?;
        Ok(lookup
            .result
            .into_iter()
            .filter(|description| self.is_known_domestic_symbol(&description.symbol))
            .collect())
    }

    /// Point quote.
    ///
    /// # Errors
    ///
    /// Returns `MarketDataError` if the request fails or the provider
    /// answers with an error.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let payload: ProviderPayload<QuoteData> =
            self.gateway.request(QUOTE, &[("symbol", symbol)]).await?;
        payload
            .into_result()
            .map(Quote::from)
            .map_err(MarketDataError::Provider)
    }

    /// Daily candles over the last `days` whole days (UTC).
    ///
    /// # Errors
    ///
    /// Returns `MarketDataError` if the request fails, the provider answers
    /// with an error, or the columns are ragged.
    pub async fn get_daily_candles(
        &self,
        symbol: &str,
        days: u32,
    ) -> Result<CandleSeries, MarketDataError> {
        let to = self
            .clock
            .now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();
        let from = to - TimeDelta::days(i64::from(days));

        let from = from.timestamp().to_string();
        let to = to.timestamp().to_string();
        let payload: ProviderPayload<CandleData> = self
            .gateway
            .request(
                CANDLES,
                &[
                    ("symbol", symbol),
                    ("resolution", DAILY_RESOLUTION),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                ],
            )
            .await?;

        let data = payload.into_result().map_err(MarketDataError::Provider)?;
        Ok(CandleSeries::try_from(data)?)
    }

    /// Daily closes over the last `days` whole days as `{value, time}` points.
    ///
    /// Empty for an empty symbol or a `no_data` answer.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_daily_candles`].
    pub async fn get_daily_history(
        &self,
        symbol: &str,
        days: u32,
    ) -> Result<Vec<PricePoint>, MarketDataError> {
        if symbol.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.get_daily_candles(symbol, days).await?.price_points())
    }

    /// Whether the symbol is in the domestic listing.
    #[must_use]
    pub fn is_known_domestic_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    // =========================================================================
    // Live Prices
    // =========================================================================

    /// Register `callback` for live prices and seed every callback on the
    /// symbol with a fresh quote before returning.
    ///
    /// The registration stands even if the seeding quote fails.
    ///
    /// # Errors
    ///
    /// Returns `MarketDataError` if the seeding quote fails.
    pub async fn subscribe_to_price(
        &self,
        symbol: &str,
        callback: PriceCallback,
    ) -> Result<(), MarketDataError> {
        self.channel.register(symbol, callback);

        let quote = self.get_quote(symbol).await?;
        let callbacks = self.channel.callbacks(symbol);
        for callback in &callbacks {
            callback.call(quote.current);
        }
        debug!(symbol, callbacks = callbacks.len(), "Seeded price subscribers");
        Ok(())
    }

    /// Stop delivering live prices to `callback`.
    ///
    /// Seeding quotes deliver to the callbacks registered when the quote
    /// arrives, so one already being delivered may still reach it.
    pub fn unsubscribe_from_price(&self, symbol: &str, callback: &PriceCallback) {
        self.channel.unregister(symbol, callback);
    }

    // =========================================================================
    // Credential
    // =========================================================================

    /// Replace the credential and validate it.
    pub async fn set_credential(&self, credential: Credential) -> ValidityState {
        self.monitor.set_credential(credential).await
    }

    /// Validate the startup credential: `preferred` if given, else the
    /// persisted one, else empty.
    pub async fn start(&self, preferred: Option<Credential>) -> ValidityState {
        let credential = match preferred {
            Some(credential) => credential,
            None => match self.store.get(CREDENTIAL_KEY) {
                Ok(stored) => stored.map(Credential::new).unwrap_or_default(),
                Err(e) => {
                    warn!(error = %e, "Failed to read persisted credential");
                    Credential::default()
                }
            },
        };
        self.set_credential(credential).await
    }

    // =========================================================================
    // Observables
    // =========================================================================

    /// Validity flag of the active credential.
    #[must_use]
    pub fn credential_valid(&self) -> watch::Receiver<bool> {
        self.monitor.valid()
    }

    /// Current validity flag.
    #[must_use]
    pub fn is_credential_valid(&self) -> bool {
        self.monitor.is_valid()
    }

    /// Detailed validity state.
    #[must_use]
    pub fn validity(&self) -> watch::Receiver<ValidityState> {
        self.monitor.state()
    }

    /// Quota flag, `true` while the request reservoir is empty.
    #[must_use]
    pub fn quota_exceeded(&self) -> watch::Receiver<bool> {
        self.gateway.limiter().quota_exceeded()
    }

    /// Current quota flag.
    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        self.gateway.limiter().is_quota_exceeded()
    }

    /// Quota transitions.
    #[must_use]
    pub fn quota_events(&self) -> broadcast::Receiver<QuotaEvent> {
        self.gateway.limiter().subscribe_events()
    }

    /// Price stream connection state.
    #[must_use]
    pub fn channel_state(&self) -> watch::Receiver<ChannelState> {
        self.channel.state()
    }

    /// Current price stream connection state.
    #[must_use]
    pub fn current_channel_state(&self) -> ChannelState {
        self.channel.current_state()
    }

    /// Live subscription statistics.
    #[must_use]
    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.channel.stats()
    }

    /// Number of known domestic symbols.
    #[must_use]
    pub fn domestic_symbol_count(&self) -> usize {
        self.symbols.len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Pump price stream events until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        self.channel.run(cancel).await;
    }

    /// Close the price stream and stop scheduling requests.
    pub fn shutdown(&self) {
        self.channel.close();
        self.gateway.limiter().close();
    }
}

impl std::fmt::Debug for MarketDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataService")
            .field("channel", &self.channel)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PriceFeed for MarketDataService {
    async fn subscribe(&self, symbol: &str, callback: PriceCallback) -> Result<(), MarketDataError> {
        self.subscribe_to_price(symbol, callback).await
    }

    fn unsubscribe(&self, symbol: &str, callback: &PriceCallback) {
        self.unsubscribe_from_price(symbol, callback);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::str::FromStr;

    use chrono::{TimeZone, Utc};
    use parking_lot::{Mutex, RwLock};
    use rust_decimal::Decimal;
    use serde_json::json;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::application::ports::{ConnectRequest, MockClock, StreamLink};
    use crate::infrastructure::config::ProviderSettings;
    use crate::infrastructure::rate_limit::{RateBudget, RateLimiter};
    use crate::infrastructure::store::InMemoryStore;

    struct IdleConnector;

    impl StreamConnector for IdleConnector {
        fn connect(&self, _request: ConnectRequest) -> StreamLink {
            let (tx, _rx) = mpsc::unbounded_channel();
            StreamLink::new(tx, CancellationToken::new())
        }
    }

    fn fixed_clock() -> Arc<dyn Clock> {
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(|| Utc.with_ymd_and_hms(2024, 3, 31, 15, 30, 0).unwrap());
        Arc::new(clock)
    }

    fn service(server: &MockServer, store: Arc<dyn KeyValueStore>) -> MarketDataService {
        let settings = ProviderSettings {
            api_url: server.uri(),
            ..ProviderSettings::default()
        };
        let gateway = HttpGateway::new(
            &settings,
            Arc::new(RwLock::new(Credential::new("k"))),
            RateLimiter::new(RateBudget::default()),
        )
        .unwrap();
        MarketDataService::new(gateway, Arc::new(IdleConnector), store, fixed_clock())
    }

    fn quote_body(price: f64) -> serde_json::Value {
        json!({"c": price, "d": 1.0, "dp": 0.5, "h": price, "l": price, "o": price, "pc": price})
    }

    #[tokio::test]
    async fn empty_search_makes_no_request() {
        let server = MockServer::start().await;
        let service = service(&server, Arc::new(InMemoryStore::new()));

        let lookup = service.search_symbols("  ").await.unwrap();

        assert_eq!(lookup, SymbolLookup::default());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quote_error_payload_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"error": "API limit reached"})),
            )
            .mount(&server)
            .await;
        let service = service(&server, Arc::new(InMemoryStore::new()));

        let err = service.get_quote("AAPL").await.unwrap_err();

        assert_eq!(err, MarketDataError::Provider("API limit reached".to_string()));
    }

    #[tokio::test]
    async fn history_window_is_whole_utc_days() {
        let server = MockServer::start().await;
        // 2024-03-31T00:00:00Z and 30 days earlier.
        Mock::given(method("GET"))
            .and(path("/stock/candle"))
            .and(query_param("symbol", "AAPL"))
            .and(query_param("resolution", "D"))
            .and(query_param("from", "1709251200"))
            .and(query_param("to", "1711843200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "s": "ok",
                "c": [170.5, 171.25],
                "h": [172, 173],
                "l": [169, 170],
                "o": [170, 171],
                "v": [1000, 1200],
                "t": [1711584000, 1711670400]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let service = service(&server, Arc::new(InMemoryStore::new()));

        let history = service.get_daily_history("AAPL", 30).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, Decimal::from_str("170.5").unwrap());
        assert_eq!(history[1].time.timestamp_millis(), 1_711_670_400_000);
    }

    #[tokio::test]
    async fn empty_symbol_history_is_empty() {
        let server = MockServer::start().await;
        let service = service(&server, Arc::new(InMemoryStore::new()));

        assert!(service.get_daily_history("", 30).await.unwrap().is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribe_seeds_every_callback_on_the_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(quote_body(101.5)))
            .mount(&server)
            .await;
        let service = service(&server, Arc::new(InMemoryStore::new()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let seen = seen.clone();
            PriceCallback::new(move |price| seen.lock().push(("first", price)))
        };
        let second = {
            let seen = seen.clone();
            PriceCallback::new(move |price| seen.lock().push(("second", price)))
        };

        service.subscribe_to_price("AAPL", first).await.unwrap();
        service.subscribe_to_price("AAPL", second).await.unwrap();

        let price = Decimal::from_str("101.5").unwrap();
        assert_eq!(
            *seen.lock(),
            vec![("first", price), ("first", price), ("second", price)]
        );
        assert_eq!(service.subscription_stats().callback_count, 2);
    }

    #[tokio::test]
    async fn callback_removed_before_quote_arrives_is_not_seeded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(quote_body(101.5))
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        let service = service(&server, Arc::new(InMemoryStore::new()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback = {
            let seen = seen.clone();
            PriceCallback::new(move |price| seen.lock().push(price))
        };

        let (result, ()) = tokio::join!(
            service.subscribe_to_price("AAPL", callback.clone()),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                service.unsubscribe_from_price("AAPL", &callback);
            }
        );

        result.unwrap();
        assert!(seen.lock().is_empty());
        assert_eq!(service.subscription_stats().callback_count, 0);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_seed_keeps_registration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;
        let service = service(&server, Arc::new(InMemoryStore::new()));
        let callback = PriceCallback::new(|_| {});

        let result = service.subscribe_to_price("AAPL", callback.clone()).await;

        assert!(matches!(result, Err(MarketDataError::Decode(_))));
        assert_eq!(service.subscription_stats().symbol_count, 1);

        service.unsubscribe_from_price("AAPL", &callback);
        assert_eq!(service.subscription_stats().symbol_count, 0);
    }

    #[tokio::test]
    async fn start_prefers_override_then_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stock/symbol"))
            .and(query_param("token", "persisted"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"symbol": "AAPL"}])))
            .expect(1)
            .mount(&server)
            .await;
        let store = Arc::new(InMemoryStore::new());
        store.set(CREDENTIAL_KEY, "persisted").unwrap();
        let service = service(&server, store);

        assert_eq!(service.start(None).await, ValidityState::Valid);
        assert!(service.is_known_domestic_symbol("AAPL"));
        assert!(!service.is_known_domestic_symbol("ZZZZ"));
    }
}
