//! Error types for the state store.

use thiserror::Error;

/// Main error type for store operations.
///
/// Reads never fail and writes through read-only or unready queries report
/// `false` instead of erroring, so this type only covers effect execution,
/// commits and misuse of the API.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Delivered to an effect when its transaction has been superseded.
    #[error("Transaction cancelled")]
    Cancelled,

    #[error("Effect failed: {0}")]
    Effect(String),

    #[error("Commit failed, state only partially resolved at {key:?}")]
    ReplayFailed { key: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Convenience constructor for effect failures.
    pub fn effect(message: impl Into<String>) -> Self {
        StoreError::Effect(message.into())
    }

    /// Whether this error is the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
