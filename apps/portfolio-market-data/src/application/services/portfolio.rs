//! Portfolio Ledger
//!
//! Paper-trading ledger driven by live prices. Owns the portfolio state and
//! keeps one price subscription per held symbol: after every change the set
//! of held symbols is reconciled against the live subscriptions, subscribing
//! additions and unsubscribing removals.
//!
//! State is persisted after every trade and restored, subscriptions
//! included, at startup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::application::ports::{Clock, KeyValueStore, PriceFeed, StoreError};
use crate::domain::market::{PricePoint, Symbol};
use crate::domain::portfolio::{PortfolioEntry, PortfolioState, TradeError};
use crate::domain::subscription::{PriceCallback, SubscriptionChanges};

/// Store key of the persisted portfolio.
pub const PORTFOLIO_KEY: &str = "portfolio_state";

/// Ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
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

    /// Share price is not positive.
    #[error("invalid share price: {0}")]
    InvalidPrice(Decimal),

    /// Persisted state could not be read or written.
    #[error("portfolio store error: {0}")]
    Store(#[from] StoreError),

    /// Persisted state is not a valid portfolio document.
    #[error("portfolio encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<TradeError> for LedgerError {
    fn from(err: TradeError) -> Self {
        match err {
            TradeError::InsufficientFunds { price, balance } => {
                Self::InsufficientFunds { price, balance }
            }
            TradeError::NotOwned(symbol) => Self::NotOwned(symbol),
            TradeError::InvalidPrice(price) => Self::InvalidPrice(price),
        }
    }
}

/// State shared with price callbacks.
struct Book {
    state: Mutex<PortfolioState>,
    prices: Mutex<HashMap<Symbol, Decimal>>,
    clock: Arc<dyn Clock>,
}

impl Book {
    fn on_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().insert(symbol.to_string(), price);
        self.refresh_unrealised();
    }

    /// Append the current total unrealised value if it changed.
    fn refresh_unrealised(&self) {
        let mut state = self.state.lock();
        let total = Self::total(&state, &self.prices.lock());
        if state.record_unrealised(total, self.clock.now()) {
            debug!(total = %total, "Unrealised total changed");
        }
    }

    fn total(state: &PortfolioState, prices: &HashMap<Symbol, Decimal>) -> Decimal {
        state
            .entries()
            .iter()
            .map(|entry| state.unrealised(&entry.symbol, prices.get(&entry.symbol).copied()))
            .sum()
    }
}

/// Paper portfolio backed by a [`PriceFeed`].
pub struct PortfolioLedger {
    book: Arc<Book>,
    feed: Arc<dyn PriceFeed>,
    store: Arc<dyn KeyValueStore>,
    /// Live subscriptions by symbol. Also serializes reconciliation.
    subscriptions: tokio::sync::Mutex<HashMap<Symbol, PriceCallback>>,
}

impl PortfolioLedger {
    /// Create a cash-only ledger.
    #[must_use]
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        starting_balance: Decimal,
    ) -> Self {
        let state = PortfolioState::new(starting_balance, clock.now());
        Self {
            book: Arc::new(Book {
                state: Mutex::new(state),
                prices: Mutex::new(HashMap::new()),
                clock,
            }),
            feed,
            store,
            subscriptions: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Load persisted state, if any, and subscribe to its symbols.
    ///
    /// Returns `true` if state was restored.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError` if the store cannot be read or holds an
    /// invalid document; the ledger is left unchanged.
    pub async fn restore(&self) -> Result<bool, LedgerError> {
        let Some(document) = self.store.get(PORTFOLIO_KEY)? else {
            return Ok(false);
        };
        let restored: PortfolioState = serde_json::from_str(&document)?;
        info!(positions = restored.entries().len(), "Restored portfolio");

        *self.book.state.lock() = restored;
        self.reconcile().await;
        Ok(true)
    }

    /// Buy one share at `price`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidPrice` for a price that is not positive,
    /// or `LedgerError::InsufficientFunds` if the price exceeds the balance.
    pub async fn buy_stock(&self, symbol: &str, price: Decimal) -> Result<(), LedgerError> {
        {
            let mut state = self.book.state.lock();
            state.buy(symbol, price, self.book.clock.now())?;
        }
        info!(symbol, price = %price, "Bought share");
        self.after_trade().await;
        Ok(())
    }

    /// Sell one share at `price`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidPrice` for a price that is not positive,
    /// or `LedgerError::NotOwned` if no shares of the symbol are held.
    pub async fn sell_stock(&self, symbol: &str, price: Decimal) -> Result<(), LedgerError> {
        {
            let mut state = self.book.state.lock();
            state.sell(symbol, price, self.book.clock.now())?;
        }
        info!(symbol, price = %price, "Sold share");
        self.after_trade().await;
        Ok(())
    }

    /// Write the current state to the store.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError` if encoding or the store write fails.
    pub fn persist(&self) -> Result<(), LedgerError> {
        let document = serde_json::to_string(&*self.book.state.lock())?;
        self.store.set(PORTFOLIO_KEY, &document)?;
        Ok(())
    }

    /// Drop every live subscription.
    pub async fn shutdown(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for (symbol, callback) in subscriptions.drain() {
            self.feed.unsubscribe(&symbol, &callback);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Cash balance.
    #[must_use]
    pub fn balance(&self) -> Decimal {
        self.book.state.lock().balance()
    }

    /// Shares held of a symbol.
    #[must_use]
    pub fn shares_owned(&self, symbol: &str) -> u32 {
        self.book.state.lock().shares_owned(symbol)
    }

    /// Sum of purchase prices of the held shares of a symbol.
    #[must_use]
    pub fn total_invested(&self, symbol: &str) -> Decimal {
        self.book.state.lock().total_invested(symbol)
    }

    /// Latest live price of a symbol.
    #[must_use]
    pub fn latest_price(&self, symbol: &str) -> Option<Decimal> {
        self.book.prices.lock().get(symbol).copied()
    }

    /// Unrealised gain/loss of one position; zero until a price is known.
    #[must_use]
    pub fn unrealised(&self, symbol: &str) -> Decimal {
        let price = self.latest_price(symbol);
        self.book.state.lock().unrealised(symbol, price)
    }

    /// Unrealised gain/loss across all positions.
    #[must_use]
    pub fn total_unrealised(&self) -> Decimal {
        let state = self.book.state.lock();
        Book::total(&state, &self.book.prices.lock())
    }

    /// Held positions.
    #[must_use]
    pub fn entries(&self) -> Vec<PortfolioEntry> {
        self.book.state.lock().entries().to_vec()
    }

    /// Balance after each trade, oldest first.
    #[must_use]
    pub fn balance_history(&self) -> Vec<PricePoint> {
        self.book.state.lock().balance_history().to_vec()
    }

    /// Recent total-unrealised values, oldest first.
    #[must_use]
    pub fn unrealised_history(&self) -> Vec<PricePoint> {
        self.book.state.lock().unrealised_history().to_vec()
    }

    /// Symbols with a live subscription.
    pub async fn subscribed_symbols(&self) -> HashSet<Symbol> {
        self.subscriptions.lock().await.keys().cloned().collect()
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    async fn after_trade(&self) {
        self.reconcile().await;
        self.book.refresh_unrealised();
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist portfolio");
        }
    }

    async fn reconcile(&self) {
        let mut subscriptions = self.subscriptions.lock().await;

        let active = self.book.state.lock().active_symbols();
        let current: HashSet<Symbol> = subscriptions.keys().cloned().collect();
        let changes = SubscriptionChanges::between(&current, &active);
        if changes.is_empty() {
            return;
        }

        let mut removals: Vec<Symbol> = changes.unsubscribe.into_iter().collect();
        removals.sort();
        for symbol in removals {
            if let Some(callback) = subscriptions.remove(&symbol) {
                self.feed.unsubscribe(&symbol, &callback);
            }
            self.book.prices.lock().remove(&symbol);
        }

        let mut additions: Vec<Symbol> = changes.subscribe.into_iter().collect();
        additions.sort();
        for symbol in additions {
            let callback = price_callback(Arc::downgrade(&self.book), symbol.clone());
            subscriptions.insert(symbol.clone(), callback.clone());
            if let Err(e) = self.feed.subscribe(&symbol, callback).await {
                // Live pushes still arrive; only the seed price is missing.
                warn!(symbol = %symbol, error = %e, "Price subscription not seeded");
            }
        }
    }
}

fn price_callback(book: Weak<Book>, symbol: Symbol) -> PriceCallback {
    PriceCallback::new(move |price| {
        if let Some(book) = book.upgrade() {
            book.on_price(&symbol, price);
        }
    })
}

impl std::fmt::Debug for PortfolioLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioLedger")
            .field("balance", &self.balance())
            .field("positions", &self.book.state.lock().entries().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
