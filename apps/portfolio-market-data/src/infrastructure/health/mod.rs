//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, market data status reporting, and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (valid credential and open price stream)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ChannelState, MarketDataService};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Credential status.
    pub credential: CredentialStatus,
    /// Request quota status.
    pub quota: QuotaStatus,
    /// Price stream state.
    pub channel: ChannelState,
    /// Live subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Credential valid and price stream open.
    Healthy,
    /// Credential valid but streaming or quota impaired.
    Degraded,
    /// No valid credential; the data layer is unusable.
    Unhealthy,
}

/// Credential status.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    /// Validity state name.
    pub state: &'static str,
    /// Whether the credential is valid.
    pub valid: bool,
    /// Number of known domestic symbols.
    pub domestic_symbols: usize,
}

/// Request quota status.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    /// Whether the request reservoir is empty.
    pub exceeded: bool,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Symbols with an upstream subscription.
    pub topics: usize,
    /// Registered price callbacks.
    pub callbacks: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    service: Arc<MarketDataService>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, service: Arc<MarketDataService>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            service,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let service = &state.service;
    let is_ready =
        service.is_credential_valid() && service.current_channel_state() == ChannelState::Open;

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let service = &state.service;
    let validity = *service.validity().borrow();
    let channel = service.current_channel_state();
    let quota_exceeded = service.is_quota_exceeded();
    let stats = service.subscription_stats();

    HealthResponse {
        status: determine_health_status(validity.is_valid(), channel, quota_exceeded),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        credential: CredentialStatus {
            state: validity.as_str(),
            valid: validity.is_valid(),
            domestic_symbols: service.domestic_symbol_count(),
        },
        quota: QuotaStatus {
            exceeded: quota_exceeded,
        },
        channel,
        subscriptions: SubscriptionStatus {
            topics: stats.symbol_count,
            callbacks: stats.callback_count,
        },
    }
}

const fn determine_health_status(
    credential_valid: bool,
    channel: ChannelState,
    quota_exceeded: bool,
) -> HealthStatus {
    if !credential_valid {
        return HealthStatus::Unhealthy;
    }
    match channel {
        ChannelState::Open if !quota_exceeded => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::RwLock;
    use test_case::test_case;
    use tokio::sync::mpsc;

    use crate::application::ports::{ConnectRequest, StreamConnector, StreamLink, SystemClock};
    use crate::domain::credential::Credential;
    use crate::infrastructure::config::ProviderSettings;
    use crate::infrastructure::gateway::HttpGateway;
    use crate::infrastructure::rate_limit::{RateBudget, RateLimiter};
    use crate::infrastructure::store::InMemoryStore;

    struct IdleConnector;

    impl StreamConnector for IdleConnector {
        fn connect(&self, _request: ConnectRequest) -> StreamLink {
            let (tx, _rx) = mpsc::unbounded_channel();
            StreamLink::new(tx, CancellationToken::new())
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(true, ChannelState::Open, false, HealthStatus::Healthy ; "valid and open")]
    #[test_case(true, ChannelState::Open, true, HealthStatus::Degraded ; "quota exhausted")]
    #[test_case(true, ChannelState::Connecting, false, HealthStatus::Degraded ; "stream connecting")]
    #[test_case(true, ChannelState::Closed, false, HealthStatus::Degraded ; "stream closed")]
    #[test_case(false, ChannelState::Closed, false, HealthStatus::Unhealthy ; "invalid credential")]
    fn determine_status(valid: bool, channel: ChannelState, quota: bool, expected: HealthStatus) {
        assert_eq!(determine_health_status(valid, channel, quota), expected);
    }

    #[tokio::test]
    async fn endpoints_report_unvalidated_service() {
        let gateway = HttpGateway::new(
            &ProviderSettings::default(),
            Arc::new(RwLock::new(Credential::default())),
            RateLimiter::new(RateBudget::default()),
        )
        .unwrap();
        let service = Arc::new(MarketDataService::new(
            gateway,
            Arc::new(IdleConnector),
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
        ));
        let state = Arc::new(HealthServerState::new("test".to_string(), service));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                axum::serve(listener, router(state))
                    .with_graceful_shutdown(cancel.cancelled_owned())
                    .await
            }
        });

        let client = reqwest::Client::new();
        let ready = client
            .get(format!("http://{addr}/readyz"))
            .send()
            .await
            .unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        let health: serde_json::Value = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "unhealthy");
        assert_eq!(health["credential"]["state"], "unvalidated");
        assert_eq!(health["channel"], "closed");
        assert_eq!(health["subscriptions"]["topics"], 0);

        let live = client
            .get(format!("http://{addr}/healthz"))
            .send()
            .await
            .unwrap();
        assert_eq!(live.status(), reqwest::StatusCode::OK);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
