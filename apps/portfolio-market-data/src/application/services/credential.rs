//! Credential Monitor
//!
//! Sole writer of credential validity. Every credential change is validated
//! with the cheapest listing call the provider offers, the exchange symbol
//! list, which also seeds the domestic symbol set on the first success.
//!
//! Validity drives the price stream: the channel is open only while the
//! credential is valid. A change in flight is superseded by any later
//! change; the older result is discarded.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::channel::ChannelManager;
use crate::application::ports::KeyValueStore;
use crate::domain::credential::{Credential, DomesticSymbols, ValidityState};
use crate::infrastructure::gateway::wire::{ProviderPayload, StockInfo};
use crate::infrastructure::gateway::{HttpGateway, STOCK_SYMBOLS};
use crate::infrastructure::metrics;

/// Store key of the persisted credential.
pub const CREDENTIAL_KEY: &str = "api_key";

const LISTING_EXCHANGE: &str = "US";

/// Validates credentials and rebuilds the channel on validity changes.
pub struct CredentialMonitor {
    gateway: HttpGateway,
    channel: Arc<ChannelManager>,
    store: Arc<dyn KeyValueStore>,
    symbols: Arc<DomesticSymbols>,
    /// Bumped on every change; a validation only lands if it still matches.
    generation: Mutex<u64>,
    state: watch::Sender<ValidityState>,
    valid: watch::Sender<bool>,
}

impl CredentialMonitor {
    /// Create a monitor in the `Unvalidated` state.
    #[must_use]
    pub fn new(
        gateway: HttpGateway,
        channel: Arc<ChannelManager>,
        store: Arc<dyn KeyValueStore>,
        symbols: Arc<DomesticSymbols>,
    ) -> Self {
        let (state, _) = watch::channel(ValidityState::Unvalidated);
        let (valid, _) = watch::channel(false);

        Self {
            gateway,
            channel,
            store,
            symbols,
            generation: Mutex::new(0),
            state,
            valid,
        }
    }

    /// Install a new credential and validate it.
    ///
    /// Never fails: the outcome is reported through the validity state.
    /// Returns the state after this call, which is the state of a newer
    /// change if one superseded this one.
    pub async fn set_credential(&self, credential: Credential) -> ValidityState {
        let generation = {
            let mut current = self.generation.lock();
            *current += 1;
            *self.gateway.credential().write() = credential.clone();
            self.transition(ValidityState::Validating, &credential);
            *current
        };
        debug!(generation, credential = %credential, "Validating credential");

        let outcome = if credential.is_empty() {
            Err("credential is empty".to_string())
        } else {
            self.fetch_listing().await
        };

        self.finish(generation, &credential, outcome)
    }

    /// Re-run validation for the active credential.
    pub async fn revalidate(&self) -> ValidityState {
        let credential = self.gateway.credential().read().clone();
        self.set_credential(credential).await
    }

    /// Current validity state.
    #[must_use]
    pub fn current_state(&self) -> ValidityState {
        *self.state.borrow()
    }

    /// Observable validity state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ValidityState> {
        self.state.subscribe()
    }

    /// Observable validity flag.
    #[must_use]
    pub fn valid(&self) -> watch::Receiver<bool> {
        self.valid.subscribe()
    }

    /// Whether the active credential is valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        *self.valid.borrow()
    }

    async fn fetch_listing(&self) -> Result<Vec<StockInfo>, String> {
        match self
            .gateway
            .request::<ProviderPayload<Vec<StockInfo>>>(
                STOCK_SYMBOLS,
                &[("exchange", LISTING_EXCHANGE)],
            )
            .await
        {
            Ok(payload) => payload.into_result(),
            Err(e) => Err(e.to_string()),
        }
    }

    fn finish(
        &self,
        generation: u64,
        credential: &Credential,
        outcome: Result<Vec<StockInfo>, String>,
    ) -> ValidityState {
        let current = self.generation.lock();
        if *current != generation {
            debug!(generation, latest = *current, "Discarding superseded validation");
            return self.current_state();
        }

        let next = match outcome {
            Ok(listing) => {
                let count = listing.len();
                if self
                    .symbols
                    .populate_once(listing.into_iter().map(|info| info.symbol))
                {
                    info!(count, "Loaded domestic symbols");
                }
                if let Err(e) = self.store.set(CREDENTIAL_KEY, credential.token()) {
                    warn!(error = %e, "Failed to persist credential");
                }
                ValidityState::Valid
            }
            Err(reason) => {
                warn!(reason = %reason, "Credential rejected");
                ValidityState::Invalid
            }
        };

        metrics::record_validation(next.is_valid());
        self.transition(next, credential);
        next
    }

    /// Publish a new state; open or close the channel on validity edges.
    fn transition(&self, next: ValidityState, credential: &Credential) {
        let was_valid = self.state.borrow().is_valid();
        self.state.send_replace(next);

        let now_valid = next.is_valid();
        self.valid.send_if_modified(|valid| {
            let changed = *valid != now_valid;
            *valid = now_valid;
            changed
        });

        match (was_valid, now_valid) {
            (true, false) => self.channel.close(),
            (false, true) => self.channel.open(credential),
            _ => {}
        }
        info!(state = next.as_str(), "Credential state changed");
    }
}

impl std::fmt::Debug for CredentialMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialMonitor")
            .field("state", &self.current_state())
            .field("domestic_symbols", &self.symbols.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::RwLock;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::application::ports::{ConnectRequest, StreamConnector, StreamLink};
    use crate::application::services::channel::ChannelState;
    use crate::infrastructure::config::ProviderSettings;
    use crate::infrastructure::rate_limit::{RateBudget, RateLimiter};
    use crate::infrastructure::store::InMemoryStore;

    #[derive(Default)]
    struct CountingConnector {
        requests: Mutex<Vec<ConnectRequest>>,
    }

    impl StreamConnector for CountingConnector {
        fn connect(&self, request: ConnectRequest) -> StreamLink {
            self.requests.lock().push(request);
            let (tx, _rx) = mpsc::unbounded_channel();
            StreamLink::new(tx, CancellationToken::new())
        }
    }

    struct Harness {
        monitor: CredentialMonitor,
        connector: Arc<CountingConnector>,
        channel: Arc<ChannelManager>,
        store: Arc<InMemoryStore>,
        symbols: Arc<DomesticSymbols>,
    }

    fn harness(server: &MockServer) -> Harness {
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
        let connector = Arc::new(CountingConnector::default());
        let channel = Arc::new(ChannelManager::new(connector.clone()));
        let store = Arc::new(InMemoryStore::new());
        let symbols = Arc::new(DomesticSymbols::new());

        Harness {
            monitor: CredentialMonitor::new(
                gateway,
                channel.clone(),
                store.clone(),
                symbols.clone(),
            ),
            connector,
            channel,
            store,
            symbols,
        }
    }

    async fn mount_listing(server: &MockServer, token: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/stock/symbol"))
            .and(query_param("exchange", "US"))
            .and(query_param("token", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn empty_credential_is_invalid_without_request() {
        let server = MockServer::start().await;
        let h = harness(&server);

        let state = h.monitor.set_credential(Credential::default()).await;

        assert_eq!(state, ValidityState::Invalid);
        assert!(!h.monitor.is_valid());
        assert!(server.received_requests().await.unwrap().is_empty());
        assert!(h.connector.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn valid_credential_populates_persists_and_opens() {
        let server = MockServer::start().await;
        mount_listing(&server, "good", json!([{"symbol": "AAPL"}, {"symbol": "MSFT"}])).await;
        let h = harness(&server);

        let state = h.monitor.set_credential(Credential::new("good")).await;

        assert_eq!(state, ValidityState::Valid);
        assert!(h.monitor.is_valid());
        assert!(h.symbols.contains("AAPL"));
        assert_eq!(h.symbols.len(), 2);
        assert_eq!(h.store.get(CREDENTIAL_KEY).unwrap().as_deref(), Some("good"));
        assert_eq!(h.connector.requests.lock().len(), 1);
        assert_eq!(h.channel.current_state(), ChannelState::Connecting);
    }

    #[tokio::test]
    async fn error_payload_invalidates_and_closes_channel() {
        let server = MockServer::start().await;
        mount_listing(&server, "good", json!([{"symbol": "AAPL"}])).await;
        mount_listing(&server, "revoked", json!({"error": "Invalid API key"})).await;
        let h = harness(&server);

        h.monitor.set_credential(Credential::new("good")).await;
        let state = h.monitor.set_credential(Credential::new("revoked")).await;

        assert_eq!(state, ValidityState::Invalid);
        assert_eq!(h.channel.current_state(), ChannelState::Closed);
        // Never cleared on failure.
        assert!(h.symbols.contains("AAPL"));
        assert_eq!(h.store.get(CREDENTIAL_KEY).unwrap().as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn symbols_populate_only_on_first_success() {
        let server = MockServer::start().await;
        mount_listing(&server, "first", json!([{"symbol": "AAPL"}])).await;
        mount_listing(&server, "second", json!([{"symbol": "MSFT"}, {"symbol": "TSLA"}])).await;
        let h = harness(&server);

        h.monitor.set_credential(Credential::new("first")).await;
        h.monitor.set_credential(Credential::new("second")).await;

        assert_eq!(h.symbols.len(), 1);
        assert!(!h.symbols.contains("MSFT"));
        assert_eq!(h.store.get(CREDENTIAL_KEY).unwrap().as_deref(), Some("second"));
        // Valid -> Validating -> Valid: the channel is rebuilt for the new key.
        assert_eq!(h.connector.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn validity_flag_flips_once_per_edge() {
        let server = MockServer::start().await;
        mount_listing(&server, "good", json!([{"symbol": "AAPL"}])).await;
        let h = harness(&server);
        let mut valid = h.monitor.valid();

        h.monitor.set_credential(Credential::default()).await;
        assert!(!valid.has_changed().unwrap());

        h.monitor.set_credential(Credential::new("good")).await;
        assert!(valid.has_changed().unwrap());
        assert!(*valid.borrow_and_update());
    }

    #[tokio::test]
    async fn network_failure_is_recovered_as_invalid() {
        let settings = ProviderSettings {
            api_url: "http://127.0.0.1:9".to_string(),
            ..ProviderSettings::default()
        };
        let gateway = HttpGateway::new(
            &settings,
            Arc::new(RwLock::new(Credential::default())),
            RateLimiter::new(RateBudget::default()),
        )
        .unwrap();
        let channel = Arc::new(ChannelManager::new(Arc::new(CountingConnector::default())));
        let monitor = CredentialMonitor::new(
            gateway,
            channel,
            Arc::new(InMemoryStore::new()),
            Arc::new(DomesticSymbols::new()),
        );

        assert_eq!(
            monitor.set_credential(Credential::new("k")).await,
            ValidityState::Invalid
        );
    }
}
