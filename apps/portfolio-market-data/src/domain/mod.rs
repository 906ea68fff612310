//! Domain Layer - Core market data types and bookkeeping rules.
//!
//! This layer contains the core domain types for the market data core and
//! the portfolio ledger with no IO. All types here are pure Rust with
//! serialization support.

/// Credential and validity types.
pub mod credential;

/// Market data types (quotes, candles, symbol lookups).
pub mod market;

/// Portfolio ledger value types.
pub mod portfolio;

/// Subscription tracking and reference counting.
pub mod subscription;
