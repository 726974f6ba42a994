//! Error types for ledger operations.

use std::time::Duration;

use crate::{AccountId, Currency, TransferId};
use thiserror::Error;

/// Coarse classification of a [`LedgerError`].
///
/// The API layer maps these to its own status codes; the retry policy only
/// ever re-runs a unit of work that failed with [`ErrorKind::Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced row does not exist.
    NotFound,
    /// Transient serialization, deadlock or lock-wait conflict.
    Conflict,
    /// Any other durability or connectivity failure.
    Storage,
    /// The request itself is malformed or violates a transfer policy.
    Validation,
    /// The caller cancelled the request or its deadline passed.
    Cancelled,
    /// The service is not accepting requests.
    Unavailable,
}

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transfer does not exist.
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    /// Storage detected a serialization, deadlock or lock-wait conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unrecoverable storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transfer amount is not strictly positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Source and destination are the same account and policy forbids it.
    #[error("Self-transfer not allowed on account {0}")]
    SelfTransfer(AccountId),

    /// Overdraft policy is enabled and the source balance is too low.
    #[error("Insufficient funds in account {account_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: i64,
        required: i64,
    },

    /// Account currency differs from the requested currency.
    #[error("Currency mismatch on account {account_id}: expected {expected}, got {actual}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: Currency,
        actual: Currency,
    },

    /// Currency code is not supported.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Request deadline passed before the unit of work committed.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Caller cancelled the request before the unit of work committed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Service is starting up or shutting down.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AccountNotFound(_) | LedgerError::TransferNotFound(_) => {
                ErrorKind::NotFound
            }
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Storage(_) => ErrorKind::Storage,
            LedgerError::InvalidAmount(_)
            | LedgerError::SelfTransfer(_)
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::UnsupportedCurrency(_) => ErrorKind::Validation,
            LedgerError::Timeout(_) | LedgerError::Cancelled => ErrorKind::Cancelled,
            LedgerError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only storage-level conflicts are; everything else is surfaced to the
    /// caller immediately.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Get a stable error code for the API layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::Storage(_) => "STORAGE_ERROR",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::SelfTransfer(_) => "SELF_TRANSFER",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::Cancelled => "CANCELLED",
            LedgerError::Unavailable(_) => "UNAVAILABLE",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(LedgerError::Conflict("could not serialize access".into()).is_retryable());
        assert!(!LedgerError::AccountNotFound(AccountId::new(1)).is_retryable());
        assert!(!LedgerError::Storage("connection reset".into()).is_retryable());
        assert!(!LedgerError::InvalidAmount(0).is_retryable());
        assert!(!LedgerError::Cancelled.is_retryable());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            LedgerError::TransferNotFound(TransferId::new(3)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::InsufficientFunds {
                account_id: AccountId::new(1),
                balance: 10,
                required: 20,
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LedgerError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(LedgerError::Unavailable("stopping".into()).kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::Conflict(String::new()).error_code(), "CONFLICT");
        assert_eq!(
            LedgerError::SelfTransfer(AccountId::new(4)).error_code(),
            "SELF_TRANSFER"
        );
    }
}
