//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for storage, time, the price stream and the price feed.
pub mod ports;

/// Channel, credential, market data and portfolio services.
pub mod services;
