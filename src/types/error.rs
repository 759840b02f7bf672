//! Error types for the points ledger

use mongodb::error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};

/// Main error type for ledger operations
///
/// Every failure guarantees zero side effects: an operation either fully
/// commits (balance change and log entry both persisted) or leaves state
/// unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Task '{task}' has reached its run limit of {max_runs}")]
    TaskLimitExceeded { task: String, max_runs: u32 },

    #[error("Insufficient balance: {required} points required, {available} available")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Content '{content_id}' is already unlocked")]
    AlreadyUnlocked { content_id: String },

    #[error("Concurrent write conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether the caller may safely retry the whole operation.
    ///
    /// True only for storage-level write conflicts, where nothing partial
    /// was committed. The ledger never retries internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

// Implement From conversions for common error types

impl From<mongodb::error::Error> for LedgerError {
    fn from(err: mongodb::error::Error) -> Self {
        // Transactions that raced another writer carry retry labels;
        // everything else is a plain storage failure.
        if err.contains_label(TRANSIENT_TRANSACTION_ERROR)
            || err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
        {
            Self::ConcurrencyConflict(err.to_string())
        } else {
            Self::Database(err.to_string())
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {}", err))
    }
}

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(LedgerError::ConcurrencyConflict("raced".into()).is_retryable());
        assert!(!LedgerError::Database("down".into()).is_retryable());
        assert!(!LedgerError::InsufficientBalance {
            required: 60,
            available: 40
        }
        .is_retryable());
        assert!(!LedgerError::TaskLimitExceeded {
            task: "share_site".into(),
            max_runs: 1
        }
        .is_retryable());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = LedgerError::InsufficientBalance {
            required: 1000,
            available: 250,
        };
        let msg = err.to_string();
        assert!(msg.contains("1000"));
        assert!(msg.contains("250"));

        let err = LedgerError::AlreadyUnlocked {
            content_id: "exp-42".into(),
        };
        assert!(err.to_string().contains("exp-42"));
    }
}
