//! Tournament error types.

use super::models::{TournamentId, TournamentStatus};
use crate::db::timeouts::TimeoutError;
use crate::scoring::ScoreRejection;
use crate::wallet::{UserId, WalletError};
use thiserror::Error;

/// Tournament errors
#[derive(Debug, Error)]
pub enum TournamentError {
    #[error("Tournament not found: {0}")]
    TournamentNotFound(TournamentId),

    #[error("Tournament {0} is not open for registration")]
    NotOpenForRegistration(TournamentId),

    #[error("Tournament is full")]
    TournamentFull,

    #[error("User already joined this tournament")]
    AlreadyJoined,

    #[error("User {0} is not an active participant")]
    NotParticipant(UserId),

    #[error("User {0} did not create this tournament")]
    NotCreator(UserId),

    #[error("Tournament {0} is not in progress")]
    NotInProgress(TournamentId),

    #[error("Score already submitted")]
    ScoreAlreadySubmitted,

    #[error("Invalid score submission: {0}")]
    InvalidScoreSubmission(ScoreRejection),

    #[error("{missing} active participants have not submitted a score")]
    ScoresPending { missing: usize },

    #[error("Tournament not in correct state: expected {expected}, got {actual}")]
    InvalidState {
        expected: TournamentStatus,
        actual: TournamentStatus,
    },

    #[error("Invalid entry fee")]
    InvalidEntryFee,

    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage timed out: {0}")]
    Timeout(String),

    #[error("Concurrent modification conflict, retry later")]
    Conflict,

    #[error("Corrupt tournament row: {0}")]
    Corrupt(String),
}

impl TournamentError {
    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            TournamentError::Database(_)
            | TournamentError::Serialization(_)
            | TournamentError::Corrupt(_) => "Internal server error".to_string(),
            TournamentError::Wallet(err) => err.client_message(),
            _ => self.to_string(),
        }
    }

    /// Serialization failures and deadlocks that are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            TournamentError::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            TournamentError::Wallet(err) => err.is_retryable(),
            TournamentError::Conflict => true,
            _ => false,
        }
    }
}

impl From<TimeoutError> for TournamentError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(_) => TournamentError::Timeout(err.to_string()),
            TimeoutError::Database(db) => TournamentError::Database(db),
        }
    }
}

pub type TournamentResult<T> = Result<T, TournamentError>;
