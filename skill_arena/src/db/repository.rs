//! Repository trait definitions.
//!
//! Every method is one atomic unit: it either commits all of its effects or
//! none of them. The PostgreSQL store runs each one in a single database
//! transaction; the in-memory store runs each one under a single lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;

use crate::tournament::{
    Admission, Departure, DisbursementResult, NewTournament, Participant, ScoreRecorded,
    SettlementClaim, Tournament, TournamentId, TournamentResult, TournamentStatus,
};
use crate::wallet::{
    ConfirmationReceipt, DepositSettlement, LedgerAudit, NewUser, Posting, ReferralBonus,
    Transaction, TransactionId, TransactionStatus, User, UserId, WalletResult, WithdrawalRequest,
};

/// Balance and transaction-log operations
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Open a wallet, crediting referral bonuses when `referred_by` resolves
    async fn create_user(&self, new_user: &NewUser, bonus: ReferralBonus) -> WalletResult<User>;

    async fn get_user(&self, user_id: UserId) -> WalletResult<User>;

    async fn find_user_by_external_id(&self, external_id: i64) -> WalletResult<Option<User>>;

    /// Completed credit
    async fn credit(&self, posting: &Posting) -> WalletResult<Transaction>;

    /// Completed debit; fails without side effects when the balance is short
    async fn debit(&self, posting: &Posting) -> WalletResult<Transaction>;

    /// Pending deposit, or the existing pending one for the same user and method
    async fn create_pending_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        payment_method: &str,
    ) -> WalletResult<Transaction>;

    async fn settle_deposit(
        &self,
        transaction_id: TransactionId,
        external_ref: &str,
    ) -> WalletResult<DepositSettlement>;

    async fn fail_deposit(
        &self,
        transaction_id: TransactionId,
        external_ref: Option<&str>,
    ) -> WalletResult<ConfirmationReceipt>;

    /// Record a pending withdrawal and hold its gross amount
    async fn create_withdrawal(&self, request: &WithdrawalRequest) -> WalletResult<Transaction>;

    async fn complete_withdrawal(
        &self,
        transaction_id: TransactionId,
        external_ref: &str,
    ) -> WalletResult<ConfirmationReceipt>;

    /// Move a pending withdrawal to `status` and release the hold
    async fn reject_withdrawal(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        reason: &str,
    ) -> WalletResult<ConfirmationReceipt>;

    async fn get_transaction(&self, transaction_id: TransactionId) -> WalletResult<Transaction>;

    /// Newest first
    async fn transactions(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> WalletResult<Vec<Transaction>>;

    async fn pending_withdrawals(&self, limit: i64) -> WalletResult<Vec<Transaction>>;

    /// Stored balance and the full log, read in one snapshot
    async fn audit(&self, user_id: UserId) -> WalletResult<LedgerAudit>;
}

/// Tournament lifecycle operations
///
/// Units that move money post through the ledger inside the same unit.
#[async_trait]
pub trait TournamentRepository: Send + Sync {
    /// Insert in `created` and open registration
    async fn create_tournament(&self, new_tournament: &NewTournament)
    -> TournamentResult<Tournament>;

    async fn get_tournament(&self, tournament_id: TournamentId) -> TournamentResult<Tournament>;

    /// Newest first
    async fn list_tournaments(
        &self,
        status: Option<TournamentStatus>,
        limit: i64,
    ) -> TournamentResult<Vec<Tournament>>;

    /// Every participant row, active or not, in join order
    async fn participants(&self, tournament_id: TournamentId)
    -> TournamentResult<Vec<Participant>>;

    async fn user_tournaments(&self, user_id: UserId, limit: i64) -> TournamentResult<Vec<Tournament>>;

    /// Capacity check, fee debit, participant insert and auto-start
    async fn admit(&self, tournament_id: TournamentId, user_id: UserId)
    -> TournamentResult<Admission>;

    /// Deactivate and refund during registration
    async fn depart(&self, tournament_id: TournamentId, user_id: UserId)
    -> TournamentResult<Departure>;

    async fn record_score(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        score: f64,
    ) -> TournamentResult<ScoreRecorded>;

    /// Take the settlement lease and freeze the ranking on first claim
    async fn claim_settlement(
        &self,
        tournament_id: TournamentId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> TournamentResult<SettlementClaim>;

    /// Credit one outstanding payout
    async fn pay_out(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<DisbursementResult>;

    /// Complete the tournament if nothing is owed, otherwise release the lease
    async fn close_settlement(&self, tournament_id: TournamentId) -> TournamentResult<Tournament>;

    /// Mark cancelled and schedule refunds; repeat calls return the outstanding ones
    async fn cancel_tournament(
        &self,
        tournament_id: TournamentId,
    ) -> TournamentResult<(Tournament, Vec<Participant>)>;

    /// Credit one outstanding cancellation refund
    async fn refund(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<DisbursementResult>;

    /// Count a failed payout or refund attempt
    async fn record_disbursement_failure(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<DisbursementResult>;
}

/// Full storage backend
pub trait ArenaStore: LedgerRepository + TournamentRepository {}

impl<T: LedgerRepository + TournamentRepository> ArenaStore for T {}
