//! Portfolio Ledger Types
//!
//! Pure bookkeeping for the paper portfolio: owned positions, cash balance
//! history and unrealised gain/loss history. No IO, no prices; live prices
//! are supplied by the caller.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market::{PricePoint, Symbol};

/// Maximum number of retained unrealised-history entries.
pub const UNREALISED_HISTORY_LIMIT: usize = 30;

// =============================================================================
// Errors
// =============================================================================

/// Trade rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TradeError {
    /// Price exceeds the available balance.
    #[error("insufficient funds: price {price} exceeds balance {balance}")]
    InsufficientFunds {
        /// Requested share price.
        price: Decimal,
        /// Balance at the time of the request.
        balance: Decimal,
    },

    /// No shares of the symbol are owned.
    #[error("no shares owned for {0}")]
    NotOwned(Symbol),

    /// Share prices must be positive.
    #[error("invalid share price: {0}")]
    InvalidPrice(Decimal),
}

// =============================================================================
// Entries
// =============================================================================

/// A position in one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    /// Ticker.
    pub symbol: Symbol,
    /// Shares currently held.
    pub shares_owned: u32,
    /// Purchase price of each held share, oldest first.
    pub purchase_history: Vec<Decimal>,
}

impl PortfolioEntry {
    /// Sum of purchase prices of the held shares.
    #[must_use]
    pub fn invested(&self) -> Decimal {
        self.purchase_history.iter().sum()
    }
}

// =============================================================================
// Portfolio State
// =============================================================================

/// Serializable portfolio state.
///
/// Invariant: `balance_history` is never empty, and no entry holds zero shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioState {
    entries: Vec<PortfolioEntry>,
    balance_history: Vec<PricePoint>,
    unrealised_history: Vec<PricePoint>,
}

impl PortfolioState {
    /// Fresh portfolio holding only cash.
    #[must_use]
    pub fn new(starting_balance: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            entries: Vec::new(),
            balance_history: vec![PricePoint {
                value: starting_balance,
                time: now,
            }],
            unrealised_history: vec![PricePoint {
                value: Decimal::ZERO,
                time: now,
            }],
        }
    }

    /// Current cash balance.
    #[must_use]
    pub fn balance(&self) -> Decimal {
        self.balance_history
            .last()
            .map_or(Decimal::ZERO, |point| point.value)
    }

    /// All open positions.
    #[must_use]
    pub fn entries(&self) -> &[PortfolioEntry] {
        &self.entries
    }

    /// Balance history, oldest first.
    #[must_use]
    pub fn balance_history(&self) -> &[PricePoint] {
        &self.balance_history
    }

    /// Unrealised gain/loss history, oldest first.
    #[must_use]
    pub fn unrealised_history(&self) -> &[PricePoint] {
        &self.unrealised_history
    }

    /// Position for a symbol.
    #[must_use]
    pub fn entry(&self, symbol: &str) -> Option<&PortfolioEntry> {
        self.entries.iter().find(|entry| entry.symbol == symbol)
    }

    /// Shares held of a symbol (zero when not owned).
    #[must_use]
    pub fn shares_owned(&self, symbol: &str) -> u32 {
        self.entry(symbol).map_or(0, |entry| entry.shares_owned)
    }

    /// Amount invested in a symbol (zero when not owned).
    #[must_use]
    pub fn total_invested(&self, symbol: &str) -> Decimal {
        self.entry(symbol).map_or(Decimal::ZERO, PortfolioEntry::invested)
    }

    /// Symbols with an open position.
    #[must_use]
    pub fn active_symbols(&self) -> HashSet<Symbol> {
        self.entries.iter().map(|entry| entry.symbol.clone()).collect()
    }

    /// Unrealised gain/loss of a position at the given price.
    ///
    /// Zero while no price is known.
    #[must_use]
    pub fn unrealised(&self, symbol: &str, price: Option<Decimal>) -> Decimal {
        price.map_or(Decimal::ZERO, |price| {
            price * Decimal::from(self.shares_owned(symbol)) - self.total_invested(symbol)
        })
    }

    /// Buy one share.
    ///
    /// # Errors
    ///
    /// Returns `TradeError::InvalidPrice` for a price that is not positive,
    /// or `TradeError::InsufficientFunds` if the price exceeds the balance.
    pub fn buy(&mut self, symbol: &str, price: Decimal, now: DateTime<Utc>) -> Result<(), TradeError> {
        ensure_positive(price)?;
        let balance = self.balance();
        if price > balance {
            return Err(TradeError::InsufficientFunds { price, balance });
        }

        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.symbol == symbol) {
            entry.shares_owned += 1;
            entry.purchase_history.push(price);
        } else {
            self.entries.push(PortfolioEntry {
                symbol: symbol.to_string(),
                shares_owned: 1,
                purchase_history: vec![price],
            });
        }

        self.balance_history.push(PricePoint {
            value: balance - price,
            time: now,
        });
        Ok(())
    }

    /// Sell one share.
    ///
    /// The most recent purchase is removed from the position's history.
    ///
    /// # Errors
    ///
    /// Returns `TradeError::InvalidPrice` for a price that is not positive,
    /// or `TradeError::NotOwned` if no shares of the symbol are held.
    pub fn sell(&mut self, symbol: &str, price: Decimal, now: DateTime<Utc>) -> Result<(), TradeError> {
        ensure_positive(price)?;
        let balance = self.balance();
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.symbol == symbol)
            .ok_or_else(|| TradeError::NotOwned(symbol.to_string()))?;

        entry.shares_owned = entry.shares_owned.saturating_sub(1);
        entry.purchase_history.pop();
        self.entries.retain(|entry| entry.shares_owned > 0);

        self.balance_history.push(PricePoint {
            value: balance + price,
            time: now,
        });
        Ok(())
    }

    /// Append a total-unrealised value if it differs from the latest one.
    ///
    /// History is capped at [`UNREALISED_HISTORY_LIMIT`]; the oldest entry is
    /// dropped first. Returns `true` if an entry was appended.
    pub fn record_unrealised(&mut self, value: Decimal, now: DateTime<Utc>) -> bool {
        if self.unrealised_history.last().is_some_and(|point| point.value == value) {
            return false;
        }

        self.unrealised_history.push(PricePoint { value, time: now });
        if self.unrealised_history.len() > UNREALISED_HISTORY_LIMIT {
            let excess = self.unrealised_history.len() - UNREALISED_HISTORY_LIMIT;
            self.unrealised_history.drain(..excess);
        }
        true
    }
}

fn ensure_positive(price: Decimal) -> Result<(), TradeError> {
    if price > Decimal::ZERO {
        Ok(())
    } else {
        Err(TradeError::InvalidPrice(price))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use test_case::test_case;

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn new_portfolio_holds_only_cash() {
        let state = PortfolioState::new(dec(5000), now());

        assert_eq!(state.balance(), dec(5000));
        assert!(state.entries().is_empty());
        assert_eq!(state.unrealised_history().len(), 1);
        assert_eq!(state.unrealised_history()[0].value, Decimal::ZERO);
    }

    #[test]
    fn buy_adds_share_and_debits_balance() {
        let mut state = PortfolioState::new(dec(5000), now());

        state.buy("AAPL", dec(150), now()).unwrap();
        state.buy("AAPL", dec(160), now()).unwrap();

        assert_eq!(state.shares_owned("AAPL"), 2);
        assert_eq!(state.total_invested("AAPL"), dec(310));
        assert_eq!(state.balance(), dec(4690));
        assert_eq!(state.balance_history().len(), 3);
    }

    #[test]
    fn buy_beyond_balance_is_rejected() {
        let mut state = PortfolioState::new(dec(100), now());

        let result = state.buy("AAPL", dec(150), now());

        assert_eq!(
            result,
            Err(TradeError::InsufficientFunds {
                price: dec(150),
                balance: dec(100),
            })
        );
        assert!(state.entries().is_empty());
        assert_eq!(state.balance_history().len(), 1);
    }

    #[test]
    fn sell_pops_latest_purchase_and_credits_balance() {
        let mut state = PortfolioState::new(dec(5000), now());
        state.buy("AAPL", dec(150), now()).unwrap();
        state.buy("AAPL", dec(160), now()).unwrap();

        state.sell("AAPL", dec(170), now()).unwrap();

        let entry = state.entry("AAPL").unwrap();
        assert_eq!(entry.shares_owned, 1);
        assert_eq!(entry.purchase_history, vec![dec(150)]);
        assert_eq!(state.balance(), dec(4860));
    }

    #[test]
    fn selling_last_share_removes_entry() {
        let mut state = PortfolioState::new(dec(5000), now());
        state.buy("AAPL", dec(150), now()).unwrap();

        state.sell("AAPL", dec(140), now()).unwrap();

        assert!(state.entry("AAPL").is_none());
        assert!(state.active_symbols().is_empty());
        assert_eq!(state.balance(), dec(4990));
    }

    #[test]
    fn sell_unowned_is_rejected() {
        let mut state = PortfolioState::new(dec(5000), now());

        assert_eq!(
            state.sell("AAPL", dec(100), now()),
            Err(TradeError::NotOwned("AAPL".to_string()))
        );
    }

    #[test_case(0 ; "zero")]
    #[test_case(-25 ; "negative")]
    fn non_positive_prices_are_rejected(price: i64) {
        let mut state = PortfolioState::new(dec(5000), now());
        state.buy("AAPL", dec(150), now()).unwrap();

        assert_eq!(
            state.buy("AAPL", dec(price), now()),
            Err(TradeError::InvalidPrice(dec(price)))
        );
        assert_eq!(
            state.sell("AAPL", dec(price), now()),
            Err(TradeError::InvalidPrice(dec(price)))
        );
        assert_eq!(state.shares_owned("AAPL"), 1);
        assert_eq!(state.balance(), dec(4850));
        assert_eq!(state.balance_history().len(), 2);
    }

    #[test_case(None, 0 ; "no price yet")]
    #[test_case(Some(200), 90 ; "gain")]
    #[test_case(Some(100), -110 ; "loss")]
    fn unrealised_for_position(price: Option<i64>, expected: i64) {
        let mut state = PortfolioState::new(dec(5000), now());
        state.buy("AAPL", dec(150), now()).unwrap();
        state.buy("AAPL", dec(160), now()).unwrap();

        assert_eq!(state.unrealised("AAPL", price.map(dec)), dec(expected));
    }

    #[test]
    fn record_unrealised_skips_unchanged_values() {
        let mut state = PortfolioState::new(dec(5000), now());

        assert!(!state.record_unrealised(Decimal::ZERO, now()));
        assert!(state.record_unrealised(dec(5), now()));
        assert!(!state.record_unrealised(dec(5), now()));
        assert_eq!(state.unrealised_history().len(), 2);
    }

    #[test]
    fn unrealised_history_is_capped() {
        let mut state = PortfolioState::new(dec(5000), now());

        for value in 1..=40 {
            state.record_unrealised(dec(value), now());
        }

        let history = state.unrealised_history();
        assert_eq!(history.len(), UNREALISED_HISTORY_LIMIT);
        assert_eq!(history[0].value, dec(11));
        assert_eq!(history[UNREALISED_HISTORY_LIMIT - 1].value, dec(40));
    }

    #[test]
    fn state_survives_json() {
        let mut state = PortfolioState::new(dec(5000), now());
        state.buy("AAPL", dec(150), now()).unwrap();

        let json = serde_json::to_string(&state).unwrap();
        let restored: PortfolioState = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, state);
    }
}
