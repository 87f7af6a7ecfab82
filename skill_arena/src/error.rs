//! Crate-level error classification.
//!
//! Module errors are folded into [`ArenaError`] at the action boundary so
//! transports can map an [`ErrorKind`] to a status and show `code` to clients.

use crate::tournament::TournamentError;
use crate::wallet::WalletError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error class used by transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input; nothing was changed
    Validation,
    /// Well-formed request not allowed in the current state
    Precondition,
    /// Referenced entity does not exist
    NotFound,
    /// Concurrent modification persisted after retries; safe to retry
    Conflict,
    /// Storage or gateway did not answer; pending work stays pending
    External,
    Internal,
}

/// Any failure surfaced by an arena action
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Tournament(#[from] TournamentError),

    #[error("Malformed action: {0}")]
    MalformedAction(#[from] serde_json::Error),
}

/// Serializable error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

fn database_kind(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
        {
            ErrorKind::Conflict
        }
        // numeric_value_out_of_range: a balance or total outgrew its column
        sqlx::Error::Database(db) if db.code().as_deref() == Some("22003") => {
            ErrorKind::Validation
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ErrorKind::External,
        _ => ErrorKind::Internal,
    }
}

fn wallet_kind(err: &WalletError) -> ErrorKind {
    match err {
        WalletError::Database(db) => database_kind(db),
        WalletError::Timeout(_) => ErrorKind::External,
        WalletError::Conflict => ErrorKind::Conflict,
        WalletError::InvalidAmount(_)
        | WalletError::BelowMinimum { .. }
        | WalletError::UnknownReferralCode(_) => ErrorKind::Validation,
        WalletError::UserNotFound(_) | WalletError::NotFound(_) => ErrorKind::NotFound,
        WalletError::InsufficientFunds { .. }
        | WalletError::UserExists(_)
        | WalletError::ReferralCodeTaken
        | WalletError::AlreadyProcessed { .. }
        | WalletError::DuplicateExternalRef(_)
        | WalletError::WrongTransactionType(..) => ErrorKind::Precondition,
        WalletError::Corrupt(_) => ErrorKind::Internal,
    }
}

fn wallet_code(err: &WalletError) -> &'static str {
    match err {
        WalletError::Database(_) => "database_error",
        WalletError::Timeout(_) => "storage_timeout",
        WalletError::Conflict => "conflict",
        WalletError::InsufficientFunds { .. } => "insufficient_funds",
        WalletError::UserNotFound(_) => "user_not_found",
        WalletError::UserExists(_) => "user_exists",
        WalletError::UnknownReferralCode(_) => "unknown_referral_code",
        WalletError::ReferralCodeTaken => "referral_code_taken",
        WalletError::NotFound(_) => "transaction_not_found",
        WalletError::AlreadyProcessed { .. } => "already_processed",
        WalletError::DuplicateExternalRef(_) => "duplicate_external_ref",
        WalletError::InvalidAmount(_) => "invalid_amount",
        WalletError::BelowMinimum { .. } => "below_minimum",
        WalletError::WrongTransactionType(..) => "wrong_transaction_type",
        WalletError::Corrupt(_) => "internal_error",
    }
}

impl ArenaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArenaError::Wallet(err) => wallet_kind(err),
            ArenaError::MalformedAction(_) => ErrorKind::Validation,
            ArenaError::Tournament(err) => match err {
                TournamentError::Wallet(inner) => wallet_kind(inner),
                TournamentError::Database(db) => database_kind(db),
                TournamentError::Timeout(_) => ErrorKind::External,
                TournamentError::Conflict => ErrorKind::Conflict,
                TournamentError::TournamentNotFound(_) => ErrorKind::NotFound,
                TournamentError::InvalidScoreSubmission(_)
                | TournamentError::InvalidEntryFee
                | TournamentError::InvalidCapacity(_) => ErrorKind::Validation,
                TournamentError::NotOpenForRegistration(_)
                | TournamentError::TournamentFull
                | TournamentError::AlreadyJoined
                | TournamentError::NotParticipant(_)
                | TournamentError::NotCreator(_)
                | TournamentError::NotInProgress(_)
                | TournamentError::ScoreAlreadySubmitted
                | TournamentError::ScoresPending { .. }
                | TournamentError::InvalidState { .. } => ErrorKind::Precondition,
                TournamentError::Serialization(_) | TournamentError::Corrupt(_) => {
                    ErrorKind::Internal
                }
            },
        }
    }

    /// Stable machine-readable identifier
    pub fn code(&self) -> &'static str {
        match self {
            ArenaError::Wallet(err) => wallet_code(err),
            ArenaError::MalformedAction(_) => "malformed_action",
            ArenaError::Tournament(err) => match err {
                TournamentError::Wallet(inner) => wallet_code(inner),
                TournamentError::TournamentNotFound(_) => "tournament_not_found",
                TournamentError::NotOpenForRegistration(_) => "not_open_for_registration",
                TournamentError::TournamentFull => "tournament_full",
                TournamentError::AlreadyJoined => "already_joined",
                TournamentError::NotParticipant(_) => "not_participant",
                TournamentError::NotCreator(_) => "not_creator",
                TournamentError::NotInProgress(_) => "not_in_progress",
                TournamentError::ScoreAlreadySubmitted => "score_already_submitted",
                TournamentError::InvalidScoreSubmission(_) => "invalid_score_submission",
                TournamentError::ScoresPending { .. } => "scores_pending",
                TournamentError::InvalidState { .. } => "invalid_state",
                TournamentError::InvalidEntryFee => "invalid_entry_fee",
                TournamentError::InvalidCapacity(_) => "invalid_capacity",
                TournamentError::Database(_) => "database_error",
                TournamentError::Serialization(_) | TournamentError::Corrupt(_) => {
                    "internal_error"
                }
                TournamentError::Timeout(_) => "storage_timeout",
                TournamentError::Conflict => "conflict",
            },
        }
    }

    /// Message safe to show to clients
    pub fn client_message(&self) -> String {
        match self {
            ArenaError::Wallet(err) => err.client_message(),
            ArenaError::Tournament(err) => err.client_message(),
            ArenaError::MalformedAction(err) => format!("Malformed action: {err}"),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            code: self.code().to_string(),
            message: self.client_message(),
        }
    }
}

pub type ArenaResult<T> = Result<T, ArenaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wallet_errors_inside_tournament_keep_their_code() {
        let err = ArenaError::from(TournamentError::Wallet(WalletError::InsufficientFunds {
            user_id: 3,
            available: dec!(10),
            required: dec!(50),
        }));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.code(), "insufficient_funds");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            ArenaError::from(TournamentError::TournamentFull).kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            ArenaError::from(WalletError::InvalidAmount(dec!(0))).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ArenaError::from(TournamentError::Conflict).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ArenaError::from(WalletError::Timeout("slow".into())).kind(),
            ErrorKind::External
        );
    }

    #[test]
    fn test_body_hides_internals() {
        let body = ArenaError::from(WalletError::Corrupt("bad stage".into())).to_body();
        assert_eq!(body.kind, ErrorKind::Internal);
        assert_eq!(body.message, "Internal server error");
    }
}
