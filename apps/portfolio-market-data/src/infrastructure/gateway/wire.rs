//! Provider Wire Types
//!
//! JSON bodies returned by the REST endpoints and their mapping onto the
//! domain types. Every endpoint may answer with an error object instead of
//! data, so bodies are decoded as [`ProviderPayload`].

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::market::{CandleSeries, CandleStatus, Quote, SeriesError, Symbol};

/// Either an error object or the expected data.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProviderPayload<T> {
    /// `{"error": "..."}`
    Error {
        /// Provider message.
        error: String,
    },
    /// Expected body.
    Data(T),
}

impl<T> ProviderPayload<T> {
    /// Convert into a `Result`, with the provider message as the error.
    ///
    /// # Errors
    ///
    /// Returns the provider message if the payload is an error object.
    pub fn into_result(self) -> Result<T, String> {
        match self {
            Self::Error { error } => Err(error),
            Self::Data(data) => Ok(data),
        }
    }
}

/// `/quote` body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuoteData {
    /// Current price.
    #[serde(rename = "c")]
    pub current: Decimal,
    /// Change.
    #[serde(rename = "d", default)]
    pub change: Option<Decimal>,
    /// Change in percent.
    #[serde(rename = "dp", default)]
    pub change_percent: Option<Decimal>,
    /// High of the day.
    #[serde(rename = "h")]
    pub high: Decimal,
    /// Low of the day.
    #[serde(rename = "l")]
    pub low: Decimal,
    /// Open of the day.
    #[serde(rename = "o")]
    pub open: Decimal,
    /// Previous close.
    #[serde(rename = "pc")]
    pub previous_close: Decimal,
}

impl From<QuoteData> for Quote {
    fn from(data: QuoteData) -> Self {
        Self {
            current: data.current,
            change: data.change,
            change_percent: data.change_percent,
            high: data.high,
            low: data.low,
            open: data.open,
            previous_close: data.previous_close,
        }
    }
}

/// `/stock/candle` body.
///
/// A `no_data` answer carries only the status field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CandleData {
    /// Status flag.
    #[serde(rename = "s")]
    pub status: CandleStatus,
    /// Close prices.
    #[serde(rename = "c", default)]
    pub close: Vec<Decimal>,
    /// High prices.
    #[serde(rename = "h", default)]
    pub high: Vec<Decimal>,
    /// Low prices.
    #[serde(rename = "l", default)]
    pub low: Vec<Decimal>,
    /// Open prices.
    #[serde(rename = "o", default)]
    pub open: Vec<Decimal>,
    /// Volumes.
    #[serde(rename = "v", default)]
    pub volume: Vec<Decimal>,
    /// Timestamps in Unix seconds.
    #[serde(rename = "t", default)]
    pub timestamps: Vec<i64>,
}

impl TryFrom<CandleData> for CandleSeries {
    type Error = SeriesError;

    fn try_from(data: CandleData) -> Result<Self, Self::Error> {
        Self::new(
            data.status,
            data.close,
            data.high,
            data.low,
            data.open,
            data.volume,
            data.timestamps,
        )
    }
}

/// One entry of the `/stock/symbol` listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockInfo {
    /// Listing symbol.
    pub symbol: Symbol,
    /// Company description.
    #[serde(default)]
    pub description: String,
    /// Display symbol.
    #[serde(default)]
    pub display_symbol: String,
    /// Trading currency.
    #[serde(default)]
    pub currency: String,
    /// Market identifier code.
    #[serde(default)]
    pub mic: String,
    /// Security type.
    #[serde(rename = "type", default)]
    pub security_type: String,
}
