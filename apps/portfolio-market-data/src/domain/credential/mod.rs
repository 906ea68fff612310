//! Credential Types
//!
//! The provider credential is a single opaque token. Whether it is valid is
//! never stored alongside it: validity is the outcome of the most recent
//! validation attempt and is tracked by [`ValidityState`].

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use super::market::Symbol;

// =============================================================================
// Credential
// =============================================================================

/// Provider API token.
///
/// The `Debug` and `Display` implementations redact the token for safe logging.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Create a credential from a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The raw token, for building request URLs.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the token is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }
}

/// The active credential, shared between the monitor (sole writer) and every
/// reader that builds request URLs at call time.
pub type SharedCredential = Arc<RwLock<Credential>>;

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("empty", &self.token.is_empty())
            .finish()
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.token.is_empty() {
            write!(f, "Credential(<empty>)")
        } else {
            write!(f, "Credential([REDACTED])")
        }
    }
}

// =============================================================================
// Validity State
// =============================================================================

/// Outcome of credential validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidityState {
    /// No validation has run yet.
    #[default]
    Unvalidated,
    /// A validation request is in flight.
    Validating,
    /// The last validation succeeded.
    Valid,
    /// The last validation failed.
    Invalid,
}

impl ValidityState {
    /// Check if the credential is usable.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unvalidated => "unvalidated",
            Self::Validating => "validating",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

// =============================================================================
// Domestic Symbols
// =============================================================================

/// Set of known-valid domestic symbols.
///
/// Populated once, on the first successful validation of a session, and
/// never shrinks afterwards.
#[derive(Debug, Default)]
pub struct DomesticSymbols {
    symbols: RwLock<HashSet<Symbol>>,
}

impl DomesticSymbols {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the set if it is still empty.
    ///
    /// Returns `true` if this call populated the set.
    pub fn populate_once(&self, symbols: impl IntoIterator<Item = Symbol>) -> bool {
        let mut set = self.symbols.write();
        if !set.is_empty() {
            return false;
        }
        set.extend(symbols);
        !set.is_empty()
    }

    /// Membership check.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains(symbol)
    }

    /// Number of known symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    /// Whether the set is still unpopulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
