#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Portfolio Market Data - Stock Data Core for a Paper Portfolio
//!
//! Fronts a rate-limited stock market data provider: REST lookups for
//! symbols, quotes and daily history, and a single multiplexed trade stream
//! that fans live prices out to any number of in-process callbacks. A paper
//! portfolio ledger sits on top and keeps its unrealised gains current.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules with no IO
//!   - `market`: Quotes, candle series, trade ticks, symbol lookups
//!   - `credential`: Credential, validity state, domestic symbol set
//!   - `subscription`: Reference-counted price callbacks per symbol
//!   - `portfolio`: Cash, positions and history bookkeeping
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Store, clock, stream connector and price feed contracts
//!   - `services`: Channel manager, credential monitor, market data
//!     facade, portfolio ledger
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `gateway`: Rate-limited REST client and wire payloads
//!   - `rate_limit`: Request scheduler with a refilling reservoir
//!   - `stream`: WebSocket connector, codec and reconnect policy
//!   - `store`: In-memory and JSON file key-value stores
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────┐   ┌──────────────┐
//! Provider REST ◄──│ Rate Limiter │◄──│ HttpGateway  │◄── search / quote / history
//!                  └──────────────┘   └──────────────┘
//!
//!                  ┌──────────────┐   ┌──────────────┐
//! Provider WS ────►│  Connector   │──►│   Channel    │──► callback 1
//!                  └──────────────┘   │   Manager    │──► callback N
//!                                     └──────────────┘
//!                                            ▲ open / close
//!                                     ┌──────────────┐
//!                                     │  Credential  │
//!                                     │   Monitor    │
//!                                     └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data and ledger types with no IO.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::credential::{Credential, DomesticSymbols, SharedCredential, ValidityState};
pub use domain::market::{
    CandleSeries, CandleStatus, PricePoint, Quote, SeriesError, SymbolDescription, SymbolLookup,
    TradeTick,
};
pub use domain::portfolio::{PortfolioEntry, PortfolioState, TradeError};
pub use domain::subscription::{
    PriceCallback, SubscriptionChanges, SubscriptionRegistry, SubscriptionStats, Symbol,
    TopicChange,
};

// Ports
pub use application::ports::{
    Clock, KeyValueStore, MarketDataError, PriceFeed, StoreError, StreamConnector, SystemClock,
};

// Services
pub use application::services::{
    ChannelManager, ChannelState, CredentialMonitor, LedgerError, MarketDataService,
    PortfolioLedger,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, MarketDataConfig, PortfolioSettings, ProviderSettings, ServerSettings,
    StreamSettings,
};

// Adapters
pub use infrastructure::gateway::{GatewayError, HttpGateway};
pub use infrastructure::rate_limit::{LimiterError, QuotaEvent, RateBudget, RateLimiter};
pub use infrastructure::store::{InMemoryStore, JsonFileStore};
pub use infrastructure::stream::TungsteniteConnector;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
