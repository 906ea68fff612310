//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`ChannelManager`]: One live price stream multiplexed into per-symbol callbacks
//! - [`CredentialMonitor`]: Validates the credential and drives the channel
//! - [`MarketDataService`]: Public facade over REST lookups and live prices
//! - [`PortfolioLedger`]: Paper portfolio consuming the facade through [`PriceFeed`]
//!
//! [`PriceFeed`]: crate::application::ports::PriceFeed

pub mod channel;
pub mod credential;
pub mod market_data;
pub mod portfolio;

pub use channel::{ChannelManager, ChannelState};
pub use credential::{CREDENTIAL_KEY, CredentialMonitor};
pub use market_data::MarketDataService;
pub use portfolio::{LedgerError, PORTFOLIO_KEY, PortfolioLedger};
