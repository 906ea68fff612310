//! HTTP Gateway
//!
//! Single entry point for REST calls to the market data provider. Every
//! request is scheduled through the shared [`RateLimiter`], and the active
//! credential is appended as the `token` query parameter when the request
//! is dispatched, so a request queued before a credential rotation goes out
//! with the new token.
//!
//! The gateway decodes the body as JSON whatever the HTTP status. Telling
//! an error object from data is left to the caller (see
//! [`wire::ProviderPayload`]).

pub mod wire;

use std::time::Instant;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::application::ports::MarketDataError;
use crate::domain::credential::SharedCredential;
use crate::infrastructure::config::ProviderSettings;
use crate::infrastructure::metrics::{self, RequestOutcome};
use crate::infrastructure::rate_limit::{LimiterError, RateLimiter};

/// Symbol search.
pub const SEARCH: &str = "search";
/// Point quote.
pub const QUOTE: &str = "quote";
/// Exchange symbol listing.
pub const STOCK_SYMBOLS: &str = "stock/symbol";
/// Daily candles.
pub const CANDLES: &str = "stock/candle";

const TOKEN_PARAM: &str = "token";

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport failure. The URL is stripped so the token never leaks.
    #[error("request failed: {0}")]
    Network(#[source] reqwest::Error),

    /// Body was not the expected JSON.
    #[error("failed to decode {endpoint} response (HTTP {status}): {source}")]
    Decode {
        /// Endpoint path.
        endpoint: String,
        /// HTTP status of the response.
        status: u16,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The limiter refused the request.
    #[error("request not scheduled: {0}")]
    QuotaExceeded(#[from] LimiterError),

    /// Base URL or endpoint could not form a URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.without_url())
    }
}

impl GatewayError {
    const fn outcome(&self) -> RequestOutcome {
        match self {
            Self::Network(_) | Self::InvalidUrl(_) => RequestOutcome::Network,
            Self::Decode { .. } => RequestOutcome::Decode,
            Self::QuotaExceeded(_) => RequestOutcome::Rejected,
        }
    }
}

impl From<GatewayError> for MarketDataError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Network(_) | GatewayError::InvalidUrl(_) => {
                Self::Network(err.to_string())
            }
            GatewayError::Decode { .. } => Self::Decode(err.to_string()),
            GatewayError::QuotaExceeded(_) => Self::QuotaExceeded(err.to_string()),
        }
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Rate-limited REST client.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    credential: SharedCredential,
    limiter: RateLimiter,
}

impl HttpGateway {
    /// Create a gateway.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidUrl` if the API URL does not parse, or
    /// `GatewayError::Network` if the HTTP client cannot be built.
    pub fn new(
        settings: &ProviderSettings,
        credential: SharedCredential,
        limiter: RateLimiter,
    ) -> Result<Self, GatewayError> {
        // Url::join drops the last segment unless the base ends with '/'.
        let base = format!("{}/", settings.api_url.trim_end_matches('/'));
        let base_url = Url::parse(&base).map_err(|e| GatewayError::InvalidUrl(e.to_string()))?;

        let client = Client::builder().timeout(settings.http_timeout).build()?;

        Ok(Self {
            client,
            base_url,
            credential,
            limiter,
        })
    }

    /// The credential read at dispatch time.
    #[must_use]
    pub const fn credential(&self) -> &SharedCredential {
        &self.credential
    }

    /// The shared limiter.
    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// GET `endpoint` with `params` and decode the body as `T`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the limiter refuses the request, the
    /// transport fails, or the body does not decode as `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        let started = Instant::now();

        let result = match self
            .limiter
            .schedule(|| self.dispatch::<T>(endpoint, params))
            .await
        {
            Ok(inner) => inner,
            Err(rejected) => Err(GatewayError::from(rejected)),
        };

        let outcome = match &result {
            Ok(_) => RequestOutcome::Ok,
            Err(e) => e.outcome(),
        };
        metrics::record_rest_request(endpoint, outcome, started.elapsed());

        if let Err(e) = &result {
            warn!(endpoint, error = %e, "Market data request failed");
        }
        result
    }

    async fn dispatch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        let url = self.endpoint_url(endpoint, params)?;
        debug!(endpoint, "Dispatching market data request");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        serde_json::from_slice(&body).map_err(|source| GatewayError::Decode {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            source,
        })
    }

    fn endpoint_url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url, GatewayError> {
        let mut url = self
            .base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| GatewayError::InvalidUrl(e.to_string()))?;

        let credential = self.credential.read().clone();
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair(TOKEN_PARAM, credential.token());

        Ok(url)
    }
}

// =============================================================================
// Tests
// =============================================================================
