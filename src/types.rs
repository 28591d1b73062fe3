//! Core types for the state store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unique identifier for a transaction (per store).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a listener registered with `Store::on`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

/// How a service reacts to a dependency change while a run may be in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolve {
    /// Cancel any in-flight run and start a fresh one immediately.
    #[default]
    Latest,
    /// Ignore changes while a run is in flight; re-run once afterwards if
    /// anything changed meanwhile.
    Earliest,
    /// Start only after `ms` milliseconds without further changes.
    Debounce { ms: u64 },
}

impl Resolve {
    pub fn debounce(ms: u64) -> Self {
        Resolve::Debounce { ms }
    }

    /// Quiescence window for debounced services.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Resolve::Debounce { ms } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Lifecycle of a transaction.
///
/// `Pending -> Running -> Replaying -> Committed`, with `RolledBack` for
/// effect or replay failures and `Aborted` for cancelled runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Running,
    Replaying,
    Committed,
    RolledBack,
    Aborted,
}

impl TransactionState {
    /// Whether the transaction reached a terminal state.
    pub fn is_ended(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack | TransactionState::Aborted
        )
    }
}

/// Value cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Store statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Query handles created so far.
    pub queries: usize,
    pub services: usize,
    pub listeners: usize,
    /// Transactions started and not yet ended.
    pub running_transactions: usize,
    pub revision: u64,
    pub cache: CacheStats,
}
