//! Wallet error types.

use super::models::{TransactionId, TransactionStatus, UserId};
use crate::db::timeouts::TimeoutError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage did not answer in time; nothing was committed
    #[error("Storage timed out: {0}")]
    Timeout(String),

    /// Concurrent modification persisted after retries
    #[error("Concurrent modification conflict, retry later")]
    Conflict,

    /// Insufficient balance
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        available: Decimal,
        required: Decimal,
    },

    /// User/wallet not found
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// External identity already has a wallet
    #[error("User with external id {0} already exists")]
    UserExists(i64),

    /// Referral code does not match any user
    #[error("Unknown referral code: {0}")]
    UnknownReferralCode(String),

    /// Generated referral code collided with an existing one
    #[error("Referral code already taken")]
    ReferralCodeTaken,

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    /// Transaction is no longer pending
    #[error("Transaction {id} already processed ({status})")]
    AlreadyProcessed {
        id: TransactionId,
        status: TransactionStatus,
    },

    /// External reference already recorded on another transaction
    #[error("Duplicate external reference: {0}")]
    DuplicateExternalRef(String),

    /// Invalid amount (must be positive with at most two decimals)
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Withdrawal under the configured minimum
    #[error("Withdrawal of {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    /// Transaction exists but is not of the expected kind
    #[error("Transaction {0} is not a {1}")]
    WrongTransactionType(TransactionId, &'static str),

    /// Stored row could not be decoded
    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}

impl WalletError {
    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database errors are sanitized to prevent information disclosure about
    /// the internal system structure, and user IDs are redacted.
    pub fn client_message(&self) -> String {
        match self {
            WalletError::Database(_) | WalletError::Corrupt(_) => {
                "Internal server error".to_string()
            }
            WalletError::UserNotFound(_) => "User not found".to_string(),
            WalletError::InsufficientFunds { .. } => "Insufficient funds".to_string(),
            _ => self.to_string(),
        }
    }

    /// Serialization failures and deadlocks that are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            WalletError::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            WalletError::Conflict => true,
            _ => false,
        }
    }
}

impl From<TimeoutError> for WalletError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(_) => WalletError::Timeout(err.to_string()),
            TimeoutError::Database(db) => WalletError::Database(db),
        }
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_client_message_hides_user_ids() {
        let err = WalletError::UserNotFound(42);
        assert!(!err.client_message().contains("42"));

        let err = WalletError::InsufficientFunds {
            user_id: 42,
            available: dec!(10),
            required: dec!(100),
        };
        assert_eq!(err.client_message(), "Insufficient funds");
    }

    #[test]
    fn test_conflict_is_retryable() {
        assert!(WalletError::Conflict.is_retryable());
        assert!(!WalletError::InvalidAmount(dec!(0)).is_retryable());
    }
}
