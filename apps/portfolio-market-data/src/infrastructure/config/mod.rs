//! Configuration Module
//!
//! Configuration loading for the market data core.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_API_URL, DEFAULT_STREAM_URL, MarketDataConfig, PortfolioSettings,
    ProviderSettings, ServerSettings, StreamSettings,
};
