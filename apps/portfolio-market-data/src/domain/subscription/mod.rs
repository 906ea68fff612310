//! Subscription Management Types
//!
//! Domain types for tracking price subscriptions to the live stream.
//!
//! # Design
//!
//! The subscription registry tracks:
//! - Which callbacks are interested in each symbol (a *topic*)
//! - Callback order, which is also notification order
//! - Reference counting for upstream subscriptions
//!
//! This allows any number of callers to subscribe to the same symbol
//! while the stream carries only one upstream subscription.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rust_decimal::Decimal;

pub use super::market::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier of a price callback.
pub type CallbackId = u64;

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a price callback.
///
/// Clones share identity: unsubscribing with any clone removes the
/// registration made with the original.
#[derive(Clone)]
pub struct PriceCallback {
    id: CallbackId,
    func: Arc<dyn Fn(Decimal) + Send + Sync>,
}

impl PriceCallback {
    /// Wrap a closure into a callback handle with a fresh identity.
    pub fn new(func: impl Fn(Decimal) + Send + Sync + 'static) -> Self {
        Self {
            id: NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed),
            func: Arc::new(func),
        }
    }

    /// Identity of this callback.
    #[must_use]
    pub const fn id(&self) -> CallbackId {
        self.id
    }

    /// Deliver a price.
    pub fn call(&self, price: Decimal) {
        (self.func)(price);
    }
}

impl PartialEq for PriceCallback {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PriceCallback {}

impl fmt::Debug for PriceCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriceCallback").field("id", &self.id).finish()
    }
}

/// Effect of a registry mutation on the topic it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicChange {
    /// First callback for the symbol; an upstream subscribe is due.
    Created,
    /// Callback joined an existing topic.
    Joined,
    /// Callback was already registered for the symbol.
    AlreadyRegistered,
    /// Callback left a topic that still has other callbacks.
    Left,
    /// Last callback left; the topic is gone and an upstream unsubscribe is due.
    Removed,
    /// Symbol or callback was not registered.
    Unknown,
}

impl TopicChange {
    /// Whether this change requires an upstream message.
    #[must_use]
    pub const fn needs_upstream(&self) -> bool {
        matches!(self, Self::Created | Self::Removed)
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to a set of subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols to subscribe to.
    pub subscribe: HashSet<Symbol>,
    /// Symbols to unsubscribe from.
    pub unsubscribe: HashSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: HashSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: HashSet::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }

    /// Reconcile two symbol sets.
    ///
    /// Additions are `new - old`, removals are `old - new`.
    #[must_use]
    pub fn between(old: &HashSet<Symbol>, new: &HashSet<Symbol>) -> Self {
        Self {
            subscribe: new.difference(old).cloned().collect(),
            unsubscribe: old.difference(new).cloned().collect(),
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Maps symbols to the ordered callbacks interested in them.
///
/// Invariant: a topic with zero callbacks never exists in the registry.
///
/// # Example
///
/// ```rust
/// use portfolio_market_data::domain::subscription::{
///     PriceCallback, SubscriptionRegistry, TopicChange,
/// };
///
/// let registry = SubscriptionRegistry::new();
/// let first = PriceCallback::new(|_| {});
/// let second = PriceCallback::new(|_| {});
///
/// // First callback opens the topic - upstream subscribe needed
/// assert_eq!(registry.add("AAPL", first.clone()), TopicChange::Created);
///
/// // Second callback joins - no upstream change needed
/// assert_eq!(registry.add("AAPL", second.clone()), TopicChange::Joined);
///
/// // First callback leaves - still held by the second one
/// assert_eq!(registry.remove("AAPL", &first), TopicChange::Left);
///
/// // Last callback leaves - now unsubscribe upstream
/// assert_eq!(registry.remove("AAPL", &second), TopicChange::Removed);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: RwLock<HashMap<Symbol, Vec<PriceCallback>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under a symbol.
    pub fn add(&self, symbol: &str, callback: PriceCallback) -> TopicChange {
        let mut topics = self.topics.write();

        match topics.get_mut(symbol) {
            Some(callbacks) if callbacks.contains(&callback) => TopicChange::AlreadyRegistered,
            Some(callbacks) => {
                callbacks.push(callback);
                TopicChange::Joined
            }
            None => {
                topics.insert(symbol.to_string(), vec![callback]);
                TopicChange::Created
            }
        }
    }

    /// Remove a callback from a symbol.
    ///
    /// The filtered list replaces the stored one; an emptied topic is deleted.
    pub fn remove(&self, symbol: &str, callback: &PriceCallback) -> TopicChange {
        let mut topics = self.topics.write();

        let Some(callbacks) = topics.get(symbol) else {
            return TopicChange::Unknown;
        };

        let remaining: Vec<PriceCallback> = callbacks
            .iter()
            .filter(|cb| *cb != callback)
            .cloned()
            .collect();

        if remaining.len() == callbacks.len() {
            return TopicChange::Unknown;
        }

        if remaining.is_empty() {
            topics.remove(symbol);
            TopicChange::Removed
        } else {
            topics.insert(symbol.to_string(), remaining);
            TopicChange::Left
        }
    }

    /// Snapshot of the callbacks for a symbol, in registration order.
    #[must_use]
    pub fn callbacks(&self, symbol: &str) -> Vec<PriceCallback> {
        self.topics.read().get(symbol).cloned().unwrap_or_default()
    }

    /// All symbols with at least one callback, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.topics.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Whether a topic exists for the symbol.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.topics.read().contains_key(symbol)
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let topics = self.topics.read();
        SubscriptionStats {
            symbol_count: topics.len(),
            callback_count: topics.values().map(Vec::len).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of topics (distinct symbols).
    pub symbol_count: usize,
    /// Number of registered callbacks across all topics.
    pub callback_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
