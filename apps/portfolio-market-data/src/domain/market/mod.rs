//! Market Data Types
//!
//! Canonical internal representation of the provider's REST payloads:
//! point quotes, daily candle series and symbol lookups. These types are
//! wire-agnostic; decoding lives in the gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A symbol string (stock ticker).
pub type Symbol = String;

const MILLIS_IN_SECOND: i64 = 1000;

// =============================================================================
// Quote
// =============================================================================

/// Point-in-time quote for a symbol.
///
/// Ephemeral: the core never persists quotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Current price.
    pub current: Decimal,
    /// Absolute change since previous close (absent for unknown symbols).
    pub change: Option<Decimal>,
    /// Percentage change since previous close (absent for unknown symbols).
    pub change_percent: Option<Decimal>,
    /// High price of the day.
    pub high: Decimal,
    /// Low price of the day.
    pub low: Decimal,
    /// Open price of the day.
    pub open: Decimal,
    /// Previous close price.
    pub previous_close: Decimal,
}

// =============================================================================
// Candles
// =============================================================================

/// Status flag of a candle series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleStatus {
    /// Series carries data.
    Ok,
    /// No data for the requested window.
    NoData,
}

/// Errors raised when a candle series violates its shape invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeriesError {
    /// Parallel columns have different lengths.
    #[error("candle columns have mismatched lengths: {0:?}")]
    MismatchedColumns([usize; 6]),

    /// A timestamp cannot be represented as a point in time.
    #[error("candle timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

/// Daily candle series stored as parallel columns.
///
/// Invariant: every column has the same length when the status is `Ok`,
/// and every column is empty when the status is `NoData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleSeries {
    status: CandleStatus,
    close: Vec<Decimal>,
    high: Vec<Decimal>,
    low: Vec<Decimal>,
    open: Vec<Decimal>,
    volume: Vec<Decimal>,
    timestamps: Vec<i64>,
    times: Vec<DateTime<Utc>>,
}

impl CandleSeries {
    /// Build a series, checking the column invariant.
    ///
    /// A `NoData` series discards whatever columns were supplied.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::MismatchedColumns` if an `Ok` series has columns
    /// of different lengths, or `SeriesError::TimestampOutOfRange` if a
    /// timestamp does not fit in milliseconds.
    pub fn new(
        status: CandleStatus,
        close: Vec<Decimal>,
        high: Vec<Decimal>,
        low: Vec<Decimal>,
        open: Vec<Decimal>,
        volume: Vec<Decimal>,
        timestamps: Vec<i64>,
    ) -> Result<Self, SeriesError> {
        if status == CandleStatus::NoData {
            return Ok(Self::no_data());
        }

        let lengths = [
            close.len(),
            high.len(),
            low.len(),
            open.len(),
            volume.len(),
            timestamps.len(),
        ];
        if lengths.iter().any(|&len| len != lengths[0]) {
            return Err(SeriesError::MismatchedColumns(lengths));
        }

        let times = timestamps
            .iter()
            .map(|&seconds| {
                seconds
                    .checked_mul(MILLIS_IN_SECOND)
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .ok_or(SeriesError::TimestampOutOfRange(seconds))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            status,
            close,
            high,
            low,
            open,
            volume,
            timestamps,
            times,
        })
    }

    /// An empty series with `NoData` status.
    #[must_use]
    pub const fn no_data() -> Self {
        Self {
            status: CandleStatus::NoData,
            close: Vec::new(),
            high: Vec::new(),
            low: Vec::new(),
            open: Vec::new(),
            volume: Vec::new(),
            timestamps: Vec::new(),
            times: Vec::new(),
        }
    }

    /// Series status.
    #[must_use]
    pub const fn status(&self) -> CandleStatus {
        self.status
    }

    /// Number of candles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the series is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Close prices, oldest first.
    #[must_use]
    pub fn close(&self) -> &[Decimal] {
        &self.close
    }

    /// High prices, oldest first.
    #[must_use]
    pub fn high(&self) -> &[Decimal] {
        &self.high
    }

    /// Low prices, oldest first.
    #[must_use]
    pub fn low(&self) -> &[Decimal] {
        &self.low
    }

    /// Open prices, oldest first.
    #[must_use]
    pub fn open(&self) -> &[Decimal] {
        &self.open
    }

    /// Volumes, oldest first.
    #[must_use]
    pub fn volume(&self) -> &[Decimal] {
        &self.volume
    }

    /// Candle timestamps in Unix seconds, oldest first.
    #[must_use]
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Map the close column into an ordered `{value, time}` sequence.
    ///
    /// Timestamps arrive in seconds and are converted to milliseconds.
    #[must_use]
    pub fn price_points(&self) -> Vec<PricePoint> {
        if self.status == CandleStatus::NoData {
            return Vec::new();
        }

        self.close
            .iter()
            .zip(&self.times)
            .map(|(&value, &time)| PricePoint { value, time })
            .collect()
    }
}

/// A single value at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    /// The value.
    pub value: Decimal,
    /// When the value applied.
    pub time: DateTime<Utc>,
}

// =============================================================================
// Trades
// =============================================================================

/// A single trade pushed by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeTick {
    /// Ticker.
    pub symbol: Symbol,
    /// Trade price.
    pub price: Decimal,
    /// Trade time in Unix milliseconds.
    pub timestamp: i64,
    /// Trade volume.
    pub volume: Decimal,
}

/// Keep only the most recent tick per symbol, in order of first appearance.
#[must_use]
pub fn latest_per_symbol(ticks: Vec<TradeTick>) -> Vec<TradeTick> {
    let mut latest: Vec<TradeTick> = Vec::new();
    for tick in ticks {
        match latest.iter_mut().find(|t| t.symbol == tick.symbol) {
            Some(slot) => *slot = tick,
            None => latest.push(tick),
        }
    }
    latest
}

// =============================================================================
// Symbol Lookup
// =============================================================================

/// One match from a symbol search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDescription {
    /// Human readable description.
    pub description: String,
    /// Display symbol.
    pub display_symbol: String,
    /// Symbol used for quotes and subscriptions.
    pub symbol: Symbol,
    /// Security type (e.g. "Common Stock").
    #[serde(rename = "type")]
    pub security_type: String,
}

/// Result of a symbol search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolLookup {
    /// Number of matches reported by the provider.
    pub count: usize,
    /// The matches.
    pub result: Vec<SymbolDescription>,
}

// =============================================================================
// Tests
// =============================================================================
