//! Streaming Transport Adapters
//!
//! WebSocket implementation of the stream connector port:
//!
//! - **codec**: JSON text frames (subscribe/unsubscribe out, trades in)
//! - **reconnect**: exponential backoff with jitter
//! - **connector**: per-link task with heartbeat and transparent reconnect

pub mod codec;
pub mod connector;
pub mod reconnect;

pub use codec::{CodecError, StreamCodec, StreamFrame};
pub use connector::{StreamError, TungsteniteConnector};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
