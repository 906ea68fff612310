//! Stream Codec
//!
//! JSON text frames exchanged with the streaming endpoint.
//!
//! # Outbound
//!
//! ```json
//! {"type":"subscribe","symbol":"AAPL"}
//! {"type":"unsubscribe","symbol":"AAPL"}
//! ```
//!
//! # Inbound
//!
//! ```json
//! {"type":"trade","data":[{"s":"AAPL","p":101.5,"t":1575526691134,"v":100}]}
//! {"type":"ping"}
//! ```
//!
//! Any other `type` decodes to [`StreamFrame::Other`] and is ignored.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::StreamCommand;
use crate::domain::market::TradeTick;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Batch of trades, in arrival order.
    Trades(Vec<TradeTick>),
    /// Server keepalive.
    Ping,
    /// Server-reported error.
    Error(String),
    /// Unhandled frame type.
    Other,
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    symbol: &'a str,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum InboundFrame {
    Trade {
        #[serde(default)]
        data: Vec<TradeData>,
    },
    Ping,
    Error {
        #[serde(default)]
        msg: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TradeData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "t", default)]
    timestamp: i64,
    #[serde(rename = "v", default)]
    volume: Decimal,
}

impl From<TradeData> for TradeTick {
    fn from(data: TradeData) -> Self {
        Self {
            symbol: data.symbol,
            price: data.price,
            timestamp: data.timestamp,
            volume: data.volume,
        }
    }
}

/// JSON codec for stream frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamCodec;

impl StreamCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode an outbound command.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, command: &StreamCommand) -> Result<String, CodecError> {
        let frame = match command {
            StreamCommand::Subscribe(symbol) => OutboundFrame {
                kind: "subscribe",
                symbol,
            },
            StreamCommand::Unsubscribe(symbol) => OutboundFrame {
                kind: "unsubscribe",
                symbol,
            },
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Decode an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with a `type` field,
    /// or a trade entry is malformed.
    pub fn decode(&self, text: &str) -> Result<StreamFrame, CodecError> {
        let frame = match serde_json::from_str::<InboundFrame>(text.trim())? {
            InboundFrame::Trade { data } => {
                StreamFrame::Trades(data.into_iter().map(TradeTick::from).collect())
            }
            InboundFrame::Ping => StreamFrame::Ping,
            InboundFrame::Error { msg } => StreamFrame::Error(msg),
            InboundFrame::Other => StreamFrame::Other,
        };
        Ok(frame)
    }
}
