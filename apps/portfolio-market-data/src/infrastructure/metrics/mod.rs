//! Prometheus Metrics Module
//!
//! Exposes market data core metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **REST**: Requests by endpoint and outcome, request latency
//! - **Quota**: Dropped requests, depletions, current quota flag
//! - **Stream**: Frames by type, price deliveries, reconnects, upstream topics
//! - **Credential**: Validations by outcome, current validity flag
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // REST
    describe_counter!(
        "market_data_rest_requests_total",
        "Total REST requests by endpoint and outcome"
    );
    describe_histogram!(
        "market_data_rest_request_seconds",
        "REST request latency including time spent queued"
    );

    // Quota
    describe_counter!(
        "market_data_requests_dropped_total",
        "Requests dropped by the rate limiter"
    );
    describe_counter!(
        "market_data_quota_depletions_total",
        "Times the request reservoir reached zero"
    );
    describe_gauge!(
        "market_data_quota_exceeded",
        "1 while the request quota is depleted"
    );

    // Stream
    describe_counter!(
        "market_data_stream_frames_total",
        "Inbound stream frames by type"
    );
    describe_counter!(
        "market_data_price_deliveries_total",
        "Price values delivered to subscriber callbacks"
    );
    describe_counter!(
        "market_data_stream_reconnects_total",
        "Stream reconnection attempts"
    );
    describe_gauge!(
        "market_data_upstream_topics",
        "Symbols currently subscribed upstream"
    );

    // Credential
    describe_counter!(
        "market_data_credential_validations_total",
        "Credential validations by outcome"
    );
    describe_gauge!(
        "market_data_credential_valid",
        "1 while the active credential is valid"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// REST request outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Body decoded.
    Ok,
    /// Transport failure.
    Network,
    /// Body did not decode.
    Decode,
    /// Not scheduled by the limiter.
    Rejected,
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Network => "network",
            Self::Decode => "decode",
            Self::Rejected => "rejected",
        }
    }
}

/// Inbound stream frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Trade batch.
    Trade,
    /// Server keepalive.
    Ping,
    /// Anything else.
    Other,
    /// Undecodable frame.
    Invalid,
}

impl FrameType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Ping => "ping",
            Self::Other => "other",
            Self::Invalid => "invalid",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed REST request.
pub fn record_rest_request(endpoint: &str, outcome: RequestOutcome, duration: Duration) {
    counter!(
        "market_data_rest_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "market_data_rest_request_seconds",
        "endpoint" => endpoint.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a request dropped by the limiter.
pub fn record_request_dropped() {
    counter!("market_data_requests_dropped_total").increment(1);
}

/// Record a reservoir depletion.
pub fn record_quota_depleted() {
    counter!("market_data_quota_depletions_total").increment(1);
}

/// Update the quota flag gauge.
pub fn set_quota_exceeded(exceeded: bool) {
    gauge!("market_data_quota_exceeded").set(if exceeded { 1.0 } else { 0.0 });
}

/// Record an inbound stream frame.
pub fn record_frame(frame: FrameType) {
    counter!(
        "market_data_stream_frames_total",
        "frame_type" => frame.as_str()
    )
    .increment(1);
}

/// Record price deliveries to callbacks.
pub fn record_price_deliveries(count: u64) {
    counter!("market_data_price_deliveries_total").increment(count);
}

/// Record a stream reconnection attempt.
pub fn record_reconnect() {
    counter!("market_data_stream_reconnects_total").increment(1);
}

/// Update the upstream topic gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_topics(count: usize) {
    gauge!("market_data_upstream_topics").set(count as f64);
}

/// Record a credential validation outcome.
pub fn record_validation(valid: bool) {
    counter!(
        "market_data_credential_validations_total",
        "outcome" => if valid { "valid" } else { "invalid" }
    )
    .increment(1);
    gauge!("market_data_credential_valid").set(if valid { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_outcome_as_str() {
        assert_eq!(RequestOutcome::Ok.as_str(), "ok");
        assert_eq!(RequestOutcome::Network.as_str(), "network");
        assert_eq!(RequestOutcome::Decode.as_str(), "decode");
        assert_eq!(RequestOutcome::Rejected.as_str(), "rejected");
    }

    #[test]
    fn frame_type_as_str() {
        assert_eq!(FrameType::Trade.as_str(), "trade");
        assert_eq!(FrameType::Ping.as_str(), "ping");
        assert_eq!(FrameType::Other.as_str(), "other");
        assert_eq!(FrameType::Invalid.as_str(), "invalid");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_request_dropped();
        record_frame(FrameType::Trade);
        set_upstream_topics(3);
    }
}
