//! Market Data Configuration Settings
//!
//! Configuration types for the market data core, loaded from environment
//! variables. Unparseable numeric values fall back to their defaults.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::domain::credential::Credential;
use crate::infrastructure::rate_limit::RateBudget;

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "https://finnhub.io/api/v1";

/// Default streaming URL.
pub const DEFAULT_STREAM_URL: &str = "wss://ws.finnhub.io";

/// Market data provider endpoints and credential.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// REST base URL.
    pub api_url: String,
    /// Streaming URL.
    pub stream_url: String,
    /// Credential supplied through the environment, overriding the persisted one.
    pub api_key: Option<Credential>,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            api_key: None,
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Interval between pings; a missing pong by the next ping closes the link.
    pub ping_interval: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Portfolio ledger settings.
#[derive(Debug, Clone)]
pub struct PortfolioSettings {
    /// JSON file backing the key-value store.
    pub state_path: PathBuf,
    /// Cash balance of a fresh portfolio.
    pub starting_balance: Decimal,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("portfolio-state.json"),
            starting_balance: Decimal::from(5000),
        }
    }
}

/// Complete market data configuration.
#[derive(Debug, Clone, Default)]
pub struct MarketDataConfig {
    /// Provider endpoints and credential.
    pub provider: ProviderSettings,
    /// REST request budget.
    pub rate_budget: RateBudget,
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Portfolio ledger settings.
    pub portfolio: PortfolioSettings,
}

impl MarketDataConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL variable is empty or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL variable is empty or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvReader { lookup: &lookup };

        let provider = ProviderSettings {
            api_url: env.url("FINNHUB_API_URL", DEFAULT_API_URL)?,
            stream_url: env.url("FINNHUB_STREAM_URL", DEFAULT_STREAM_URL)?,
            api_key: lookup("FINNHUB_API_KEY")
                .filter(|key| !key.trim().is_empty())
                .map(|key| Credential::new(key.trim())),
            http_timeout: env.duration_secs(
                "MARKET_DATA_HTTP_TIMEOUT_SECS",
                ProviderSettings::default().http_timeout,
            ),
        };

        let defaults = RateBudget::default();
        let rate_budget = RateBudget {
            min_interval: env.duration_millis("MARKET_DATA_MIN_INTERVAL_MS", defaults.min_interval),
            max_concurrent: env.parse("MARKET_DATA_MAX_CONCURRENT", defaults.max_concurrent),
            reservoir_capacity: env.parse("MARKET_DATA_RESERVOIR", defaults.reservoir_capacity),
            refill_interval: env.duration_secs(
                "MARKET_DATA_REFILL_INTERVAL_SECS",
                defaults.refill_interval,
            ),
            high_water: env.parse("MARKET_DATA_HIGH_WATER", defaults.high_water),
            poll_interval: env.duration_millis("MARKET_DATA_QUOTA_POLL_MS", defaults.poll_interval),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            ping_interval: env.duration_secs("MARKET_DATA_PING_INTERVAL_SECS", defaults.ping_interval),
            reconnect_delay_initial: env.duration_millis(
                "MARKET_DATA_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "MARKET_DATA_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "MARKET_DATA_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "MARKET_DATA_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse("MARKET_DATA_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let defaults = PortfolioSettings::default();
        let portfolio = PortfolioSettings {
            state_path: lookup("MARKET_DATA_STATE_PATH")
                .filter(|path| !path.is_empty())
                .map_or(defaults.state_path, PathBuf::from),
            starting_balance: env.parse("PORTFOLIO_STARTING_BALANCE", defaults.starting_balance),
        };

        Ok(Self {
            provider,
            rate_budget,
            stream,
            server,
            portfolio,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is not a valid URL.
    #[error("environment variable {key} is not a valid URL: {reason}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Parser message.
        reason: String,
    },
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn url(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        let Some(value) = (self.lookup)(key) else {
            return Ok(default.to_string());
        };

        let value = value.trim().trim_end_matches('/');
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }

        reqwest::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(value.to_string())
    }
}
