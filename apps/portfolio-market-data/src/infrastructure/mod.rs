//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loaded from the environment.
pub mod config;

/// Rate-limited REST gateway to the market data provider.
pub mod gateway;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Outbound request throttling.
pub mod rate_limit;

/// Key-value store adapters.
pub mod store;

/// Price stream WebSocket transport.
pub mod stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;
