//! In-memory storage backend for tests and local development.
//!
//! Every atomic unit takes the store mutex once, runs its checks and then
//! mutates. Nothing is awaited while the lock is held.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

use super::repository::{LedgerRepository, TournamentRepository};
use crate::money::checked_credit;
use crate::tournament::{
    Admission, Departure, Disbursement, DisbursementResult, NewTournament, Participant,
    ParticipantState, ScoreRecorded, SettlementClaim, Tournament, TournamentError, TournamentId,
    TournamentResult, TournamentStatus, rules,
};
use crate::wallet::rules::{ConfirmationStep, check_posting, confirmation_step};
use crate::wallet::{
    ConfirmationReceipt, DEFAULT_RATING, DepositSettlement, EntryDirection, LedgerAudit, NewUser,
    Posting, ReferralBonus, Transaction, TransactionId, TransactionStatus, TransactionType, User,
    UserId, WalletError, WalletResult, WithdrawalRequest,
};

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<UserId, User>,
    transactions: BTreeMap<TransactionId, Transaction>,
    tournaments: BTreeMap<TournamentId, Tournament>,
    participants: BTreeMap<i64, Participant>,
    last_user_id: i64,
    last_transaction_id: i64,
    last_tournament_id: i64,
    last_participant_id: i64,
    credit_failures: HashMap<UserId, u32>,
    record_failures: HashMap<UserId, u32>,
}

impl State {
    fn user(&self, user_id: UserId) -> WalletResult<&User> {
        self.users
            .get(&user_id)
            .ok_or(WalletError::UserNotFound(user_id))
    }

    fn user_mut(&mut self, user_id: UserId) -> WalletResult<&mut User> {
        self.users
            .get_mut(&user_id)
            .ok_or(WalletError::UserNotFound(user_id))
    }

    fn transaction(&self, transaction_id: TransactionId) -> WalletResult<&Transaction> {
        self.transactions
            .get(&transaction_id)
            .ok_or(WalletError::NotFound(transaction_id))
    }

    fn transaction_mut(&mut self, transaction_id: TransactionId) -> WalletResult<&mut Transaction> {
        self.transactions
            .get_mut(&transaction_id)
            .ok_or(WalletError::NotFound(transaction_id))
    }

    fn check_external_ref(&self, reference: &str, owner: Option<TransactionId>) -> WalletResult<()> {
        let taken = self.transactions.values().any(|tx| {
            tx.external_ref.as_deref() == Some(reference) && Some(tx.id) != owner
        });
        if taken {
            Err(WalletError::DuplicateExternalRef(reference.to_string()))
        } else {
            Ok(())
        }
    }

    fn insert_transaction(&mut self, mut transaction: Transaction) -> Transaction {
        self.last_transaction_id += 1;
        transaction.id = self.last_transaction_id;
        self.transactions.insert(transaction.id, transaction.clone());
        transaction
    }

    /// Completed posting; every check runs before the first mutation
    fn post(&mut self, posting: &Posting, direction: EntryDirection) -> WalletResult<Transaction> {
        check_posting(posting)?;
        if let Some(reference) = &posting.external_ref {
            self.check_external_ref(reference, None)?;
        }

        let now = Utc::now();
        let user = self.user_mut(posting.user_id)?;
        match direction {
            EntryDirection::Credit => {
                user.balance = checked_credit(user.balance, posting.amount)
                    .ok_or(WalletError::InvalidAmount(posting.amount))?;
                match posting.transaction_type {
                    TransactionType::Deposit => user.total_deposits += posting.amount,
                    TransactionType::Prize => user.total_winnings += posting.amount,
                    _ => {}
                }
            }
            EntryDirection::Debit => {
                if user.balance < posting.amount {
                    return Err(WalletError::InsufficientFunds {
                        user_id: user.id,
                        available: user.balance,
                        required: posting.amount,
                    });
                }
                user.balance -= posting.amount;
            }
        }
        user.last_active = now;

        Ok(self.insert_transaction(Transaction {
            id: 0,
            user_id: posting.user_id,
            amount: posting.amount,
            fee: Decimal::ZERO,
            direction,
            transaction_type: posting.transaction_type,
            status: TransactionStatus::Completed,
            description: posting.description.clone(),
            payment_method: None,
            external_ref: posting.external_ref.clone(),
            tournament_id: posting.tournament_id,
            created_at: now,
            processed_at: Some(now),
        }))
    }

    fn take_credit_failure(&mut self, user_id: UserId) -> bool {
        take_fault(&mut self.credit_failures, user_id)
    }

    fn tournament(&self, tournament_id: TournamentId) -> TournamentResult<&Tournament> {
        self.tournaments
            .get(&tournament_id)
            .ok_or(TournamentError::TournamentNotFound(tournament_id))
    }

    fn tournament_mut(&mut self, tournament_id: TournamentId) -> TournamentResult<&mut Tournament> {
        self.tournaments
            .get_mut(&tournament_id)
            .ok_or(TournamentError::TournamentNotFound(tournament_id))
    }

    fn participant_id(&self, tournament_id: TournamentId, user_id: UserId) -> Option<i64> {
        self.participants
            .values()
            .find(|p| p.tournament_id == tournament_id && p.user_id == user_id)
            .map(|p| p.id)
    }

    fn participant_mut(
        &mut self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<&mut Participant> {
        let id = self
            .participant_id(tournament_id, user_id)
            .ok_or(TournamentError::NotParticipant(user_id))?;
        self.participants
            .get_mut(&id)
            .ok_or(TournamentError::NotParticipant(user_id))
    }

    fn roster(&self, tournament_id: TournamentId) -> Vec<Participant> {
        let mut roster: Vec<Participant> = self
            .participants
            .values()
            .filter(|p| p.tournament_id == tournament_id)
            .cloned()
            .collect();
        roster.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        roster
    }

    /// Apply a gateway-driven status change to a pending transaction
    fn finalize(
        &mut self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        external_ref: Option<&str>,
    ) -> WalletResult<Transaction> {
        if let Some(reference) = external_ref {
            self.check_external_ref(reference, Some(transaction_id))?;
        }
        let transaction = self.transaction_mut(transaction_id)?;
        transaction.status = status;
        transaction.processed_at = Some(Utc::now());
        if let Some(reference) = external_ref {
            transaction.external_ref = Some(reference.to_string());
        }
        Ok(transaction.clone())
    }
}

/// Storage backend holding everything behind one async mutex
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` prize or refund credits to `user_id` fail
    pub async fn inject_credit_failures(&self, user_id: UserId, count: u32) {
        self.state.lock().await.credit_failures.insert(user_id, count);
    }

    /// Make the next `count` attempts to record a failed disbursement for
    /// `user_id` fail
    pub async fn inject_record_failures(&self, user_id: UserId, count: u32) {
        self.state.lock().await.record_failures.insert(user_id, count);
    }
}

fn take_fault(faults: &mut HashMap<UserId, u32>, user_id: UserId) -> bool {
    match faults.get_mut(&user_id) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

fn injected_failure() -> WalletError {
    WalletError::Timeout("injected credit failure".to_string())
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn create_user(&self, new_user: &NewUser, bonus: ReferralBonus) -> WalletResult<User> {
        let mut state = self.state.lock().await;

        if state
            .users
            .values()
            .any(|u| u.external_id == new_user.external_id)
        {
            return Err(WalletError::UserExists(new_user.external_id));
        }
        if state
            .users
            .values()
            .any(|u| u.referral_code == new_user.referral_code)
        {
            return Err(WalletError::ReferralCodeTaken);
        }
        let referrer_id = match &new_user.referred_by {
            Some(code) => Some(
                state
                    .users
                    .values()
                    .find(|u| &u.referral_code == code)
                    .map(|u| u.id)
                    .ok_or_else(|| WalletError::UnknownReferralCode(code.clone()))?,
            ),
            None => None,
        };

        let now = Utc::now();
        state.last_user_id += 1;
        let user = User {
            id: state.last_user_id,
            external_id: new_user.external_id,
            username: new_user.username.clone(),
            balance: Decimal::ZERO,
            total_deposits: Decimal::ZERO,
            total_withdrawals: Decimal::ZERO,
            total_winnings: Decimal::ZERO,
            rating: DEFAULT_RATING,
            games_played: 0,
            tournaments_played: 0,
            tournaments_won: 0,
            referral_code: new_user.referral_code.clone(),
            referrer_id,
            created_at: now,
            last_active: now,
        };
        let user_id = user.id;
        state.users.insert(user_id, user);

        if let Some(referrer_id) = referrer_id {
            if bonus.new_user > Decimal::ZERO {
                state.post(
                    &Posting::new(
                        user_id,
                        bonus.new_user,
                        TransactionType::ReferralBonus,
                        "Referral welcome bonus",
                    ),
                    EntryDirection::Credit,
                )?;
            }
            if bonus.referrer > Decimal::ZERO {
                state.post(
                    &Posting::new(
                        referrer_id,
                        bonus.referrer,
                        TransactionType::ReferralBonus,
                        format!("Referral bonus for inviting user {user_id}"),
                    ),
                    EntryDirection::Credit,
                )?;
            }
        }

        Ok(state.user(user_id)?.clone())
    }

    async fn get_user(&self, user_id: UserId) -> WalletResult<User> {
        Ok(self.state.lock().await.user(user_id)?.clone())
    }

    async fn find_user_by_external_id(&self, external_id: i64) -> WalletResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn credit(&self, posting: &Posting) -> WalletResult<Transaction> {
        self.state
            .lock()
            .await
            .post(posting, EntryDirection::Credit)
    }

    async fn debit(&self, posting: &Posting) -> WalletResult<Transaction> {
        self.state.lock().await.post(posting, EntryDirection::Debit)
    }

    async fn create_pending_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        payment_method: &str,
    ) -> WalletResult<Transaction> {
        let mut state = self.state.lock().await;
        check_posting(&Posting::new(user_id, amount, TransactionType::Deposit, ""))?;
        state.user(user_id)?;

        if let Some(existing) = state.transactions.values().find(|tx| {
            tx.user_id == user_id
                && tx.transaction_type == TransactionType::Deposit
                && tx.status == TransactionStatus::Pending
                && tx.payment_method.as_deref() == Some(payment_method)
        }) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        Ok(state.insert_transaction(Transaction {
            id: 0,
            user_id,
            amount,
            fee: Decimal::ZERO,
            direction: EntryDirection::Credit,
            transaction_type: TransactionType::Deposit,
            status: TransactionStatus::Pending,
            description: format!("Deposit via {payment_method}"),
            payment_method: Some(payment_method.to_string()),
            external_ref: None,
            tournament_id: None,
            created_at: now,
            processed_at: None,
        }))
    }

    async fn settle_deposit(
        &self,
        transaction_id: TransactionId,
        external_ref: &str,
    ) -> WalletResult<DepositSettlement> {
        let mut state = self.state.lock().await;
        let pending = state.transaction(transaction_id)?.clone();
        let step = confirmation_step(
            &pending,
            TransactionType::Deposit,
            TransactionStatus::Completed,
            Some(external_ref),
        )?;
        if step == ConfirmationStep::Redelivered {
            return Ok(DepositSettlement::AlreadyApplied {
                transaction: pending,
            });
        }

        state.check_external_ref(external_ref, Some(transaction_id))?;
        let user = state.user_mut(pending.user_id)?;
        user.balance = checked_credit(user.balance, pending.amount)
            .ok_or(WalletError::InvalidAmount(pending.amount))?;
        user.total_deposits += pending.amount;
        user.last_active = Utc::now();

        let transaction = state.finalize(
            transaction_id,
            TransactionStatus::Completed,
            Some(external_ref),
        )?;
        Ok(DepositSettlement::Credited { transaction })
    }

    async fn fail_deposit(
        &self,
        transaction_id: TransactionId,
        external_ref: Option<&str>,
    ) -> WalletResult<ConfirmationReceipt> {
        let mut state = self.state.lock().await;
        let pending = state.transaction(transaction_id)?.clone();
        let step = confirmation_step(
            &pending,
            TransactionType::Deposit,
            TransactionStatus::Failed,
            external_ref,
        )?;
        if step == ConfirmationStep::Redelivered {
            return Ok(ConfirmationReceipt {
                transaction: pending,
                applied: false,
            });
        }
        let transaction = state.finalize(transaction_id, TransactionStatus::Failed, external_ref)?;
        Ok(ConfirmationReceipt {
            transaction,
            applied: true,
        })
    }

    async fn create_withdrawal(&self, request: &WithdrawalRequest) -> WalletResult<Transaction> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let user = state.user_mut(request.user_id)?;
        if user.balance < request.gross {
            return Err(WalletError::InsufficientFunds {
                user_id: user.id,
                available: user.balance,
                required: request.gross,
            });
        }
        user.balance -= request.gross;
        user.last_active = now;

        Ok(state.insert_transaction(Transaction {
            id: 0,
            user_id: request.user_id,
            amount: request.net,
            fee: request.commission,
            direction: EntryDirection::Debit,
            transaction_type: TransactionType::Withdrawal,
            status: TransactionStatus::Pending,
            description: format!("Withdrawal to {}", request.destination),
            payment_method: Some(request.destination.clone()),
            external_ref: None,
            tournament_id: None,
            created_at: now,
            processed_at: None,
        }))
    }

    async fn complete_withdrawal(
        &self,
        transaction_id: TransactionId,
        external_ref: &str,
    ) -> WalletResult<ConfirmationReceipt> {
        let mut state = self.state.lock().await;
        let pending = state.transaction(transaction_id)?.clone();
        let step = confirmation_step(
            &pending,
            TransactionType::Withdrawal,
            TransactionStatus::Completed,
            Some(external_ref),
        )?;
        if step == ConfirmationStep::Redelivered {
            return Ok(ConfirmationReceipt {
                transaction: pending,
                applied: false,
            });
        }

        state.check_external_ref(external_ref, Some(transaction_id))?;
        state.user_mut(pending.user_id)?.total_withdrawals += pending.amount;
        let transaction = state.finalize(
            transaction_id,
            TransactionStatus::Completed,
            Some(external_ref),
        )?;
        Ok(ConfirmationReceipt {
            transaction,
            applied: true,
        })
    }

    async fn reject_withdrawal(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        reason: &str,
    ) -> WalletResult<ConfirmationReceipt> {
        let mut state = self.state.lock().await;
        let pending = state.transaction(transaction_id)?.clone();
        let step = confirmation_step(&pending, TransactionType::Withdrawal, status, None)?;
        if step == ConfirmationStep::Redelivered {
            return Ok(ConfirmationReceipt {
                transaction: pending,
                applied: false,
            });
        }

        state.user_mut(pending.user_id)?.balance += pending.gross_amount();
        let transaction = state.transaction_mut(transaction_id)?;
        transaction.status = status;
        transaction.processed_at = Some(Utc::now());
        transaction.description = format!("{} ({reason})", transaction.description);
        Ok(ConfirmationReceipt {
            transaction: transaction.clone(),
            applied: true,
        })
    }

    async fn get_transaction(&self, transaction_id: TransactionId) -> WalletResult<Transaction> {
        Ok(self.state.lock().await.transaction(transaction_id)?.clone())
    }

    async fn transactions(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> WalletResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        state.user(user_id)?;
        Ok(state
            .transactions
            .values()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn pending_withdrawals(&self, limit: i64) -> WalletResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| {
                tx.transaction_type == TransactionType::Withdrawal
                    && tx.status == TransactionStatus::Pending
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn audit(&self, user_id: UserId) -> WalletResult<LedgerAudit> {
        let state = self.state.lock().await;
        let user = state.user(user_id)?;
        let log: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect();
        Ok(LedgerAudit::compute(user, &log))
    }
}

#[async_trait]
impl TournamentRepository for MemoryStore {
    async fn create_tournament(
        &self,
        new_tournament: &NewTournament,
    ) -> TournamentResult<Tournament> {
        let mut state = self.state.lock().await;
        rules::check_draft(&new_tournament.draft)?;
        state.user(new_tournament.creator_id)?;

        let draft = &new_tournament.draft;
        state.last_tournament_id += 1;
        let mut tournament = Tournament {
            id: state.last_tournament_id,
            creator_id: new_tournament.creator_id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            game_type: draft.game_type,
            tournament_type: draft.tournament_type,
            entry_fee: draft.entry_fee,
            max_participants: draft.max_participants,
            min_participants: draft.min_participants,
            prize_pool: new_tournament.prize_pool,
            platform_commission: new_tournament.platform_commission,
            prize_distribution: new_tournament.prize_distribution.clone(),
            status: TournamentStatus::Created,
            participant_count: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            settlement_claimed_at: None,
        };
        rules::check_transition(&tournament, TournamentStatus::Registration)?;
        tournament.status = TournamentStatus::Registration;
        state.tournaments.insert(tournament.id, tournament.clone());
        Ok(tournament)
    }

    async fn get_tournament(&self, tournament_id: TournamentId) -> TournamentResult<Tournament> {
        Ok(self.state.lock().await.tournament(tournament_id)?.clone())
    }

    async fn list_tournaments(
        &self,
        status: Option<TournamentStatus>,
        limit: i64,
    ) -> TournamentResult<Vec<Tournament>> {
        let state = self.state.lock().await;
        Ok(state
            .tournaments
            .values()
            .rev()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn participants(
        &self,
        tournament_id: TournamentId,
    ) -> TournamentResult<Vec<Participant>> {
        let state = self.state.lock().await;
        state.tournament(tournament_id)?;
        Ok(state.roster(tournament_id))
    }

    async fn user_tournaments(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> TournamentResult<Vec<Tournament>> {
        let state = self.state.lock().await;
        Ok(state
            .tournaments
            .values()
            .rev()
            .filter(|t| {
                state
                    .participants
                    .values()
                    .any(|p| p.tournament_id == t.id && p.user_id == user_id && p.is_active)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn admit(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<Admission> {
        let mut state = self.state.lock().await;
        let tournament = state.tournament(tournament_id)?.clone();
        let existing = state
            .participant_id(tournament_id, user_id)
            .and_then(|id| state.participants.get(&id))
            .cloned();
        rules::check_admission(&tournament, existing.as_ref())?;

        let fee = state.post(
            &Posting::new(
                user_id,
                tournament.entry_fee,
                TransactionType::TournamentFee,
                format!("Entry fee for tournament {}", tournament.title),
            )
            .for_tournament(tournament_id),
            EntryDirection::Debit,
        )?;

        let now = Utc::now();
        let participant = match existing {
            Some(mut rejoin) => {
                rejoin.state = ParticipantState::NotSubmitted;
                rejoin.is_active = true;
                rejoin.joined_at = now;
                rejoin.left_at = None;
                rejoin
            }
            None => {
                state.last_participant_id += 1;
                Participant {
                    id: state.last_participant_id,
                    tournament_id,
                    user_id,
                    state: ParticipantState::NotSubmitted,
                    is_active: true,
                    joined_at: now,
                    left_at: None,
                }
            }
        };
        state.participants.insert(participant.id, participant.clone());

        let tournament = state.tournament_mut(tournament_id)?;
        tournament.participant_count += 1;
        let started = rules::should_auto_start(tournament);
        if started {
            tournament.status = TournamentStatus::InProgress;
            tournament.started_at = Some(now);
        }

        Ok(Admission {
            tournament: tournament.clone(),
            participant,
            fee_transaction_id: fee.id,
            started,
        })
    }

    async fn depart(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<Departure> {
        let mut state = self.state.lock().await;
        let tournament = state.tournament(tournament_id)?.clone();
        let existing = state
            .participant_id(tournament_id, user_id)
            .and_then(|id| state.participants.get(&id));
        rules::check_leave(&tournament, user_id, existing)?;

        let refund = state.post(
            &Posting::new(
                user_id,
                tournament.entry_fee,
                TransactionType::TournamentFee,
                format!("Refund for leaving tournament {}", tournament.title),
            )
            .for_tournament(tournament_id),
            EntryDirection::Credit,
        )?;

        let participant = state.participant_mut(tournament_id, user_id)?;
        participant.is_active = false;
        participant.left_at = Some(Utc::now());
        participant.state = ParticipantState::Refunded {
            refund: Disbursement::Paid {
                transaction_id: refund.id,
            },
        };
        let participant = participant.clone();

        let tournament = state.tournament_mut(tournament_id)?;
        tournament.participant_count = tournament.participant_count.saturating_sub(1);

        Ok(Departure {
            tournament: tournament.clone(),
            participant,
            refund_transaction_id: refund.id,
        })
    }

    async fn record_score(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        score: f64,
    ) -> TournamentResult<ScoreRecorded> {
        let mut state = self.state.lock().await;
        let tournament = state.tournament(tournament_id)?.clone();
        let existing = state
            .participant_id(tournament_id, user_id)
            .and_then(|id| state.participants.get(&id));
        rules::check_score_submission(&tournament, user_id, existing)?;

        let participant = state.participant_mut(tournament_id, user_id)?;
        participant.state = ParticipantState::Submitted { score };
        let participant = participant.clone();

        let user = state.user_mut(user_id)?;
        user.games_played += 1;
        user.last_active = Utc::now();

        Ok(ScoreRecorded {
            participant,
            all_submitted: rules::all_scores_submitted(&state.roster(tournament_id)),
        })
    }

    async fn claim_settlement(
        &self,
        tournament_id: TournamentId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> TournamentResult<SettlementClaim> {
        let mut state = self.state.lock().await;
        let tournament = state.tournament(tournament_id)?.clone();
        match tournament.status {
            TournamentStatus::Completed => {
                return Ok(SettlementClaim::AlreadySettled { tournament });
            }
            TournamentStatus::InProgress => {}
            actual => {
                return Err(TournamentError::InvalidState {
                    expected: TournamentStatus::InProgress,
                    actual,
                });
            }
        }
        if rules::lease_active(tournament.settlement_claimed_at, lease, now) {
            return Ok(SettlementClaim::Busy);
        }

        let roster: Vec<Participant> = state
            .roster(tournament_id)
            .into_iter()
            .filter(|p| p.is_active)
            .collect();
        let missing = roster.iter().filter(|p| !p.has_score()).count();
        if missing > 0 {
            return Err(TournamentError::ScoresPending { missing });
        }

        let needs_ranking = roster
            .iter()
            .any(|p| matches!(p.state, ParticipantState::Submitted { .. }));
        if needs_ranking {
            for standing in rules::rank(&tournament, &roster) {
                let participant = state.participant_mut(tournament_id, standing.user_id)?;
                participant.state = ParticipantState::Ranked {
                    score: standing.score,
                    position: standing.position,
                    winnings: standing.winnings,
                    payout: if standing.winnings > Decimal::ZERO {
                        Disbursement::Pending
                    } else {
                        Disbursement::NotDue
                    },
                };
            }
        }

        let tournament = state.tournament_mut(tournament_id)?;
        tournament.settlement_claimed_at = Some(now);
        let tournament = tournament.clone();
        let participants = state
            .roster(tournament_id)
            .into_iter()
            .filter(|p| p.is_active)
            .collect();
        Ok(SettlementClaim::Claimed {
            tournament,
            participants,
        })
    }

    async fn pay_out(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<DisbursementResult> {
        let mut state = self.state.lock().await;
        let tournament = state.tournament(tournament_id)?.clone();
        let participant = state.participant_mut(tournament_id, user_id)?.clone();
        let ParticipantState::Ranked {
            score,
            position,
            winnings,
            payout,
        } = participant.state
        else {
            return Err(TournamentError::InvalidState {
                expected: TournamentStatus::InProgress,
                actual: tournament.status,
            });
        };
        if !payout.is_outstanding() {
            return Ok(DisbursementResult {
                user_id,
                amount: winnings,
                state: payout,
            });
        }
        if state.take_credit_failure(user_id) {
            return Err(injected_failure().into());
        }

        let prize = state.post(
            &Posting::new(
                user_id,
                winnings,
                TransactionType::Prize,
                format!("Prize for position {position} in {}", tournament.title),
            )
            .for_tournament(tournament_id),
            EntryDirection::Credit,
        )?;
        let paid = Disbursement::Paid {
            transaction_id: prize.id,
        };
        state.participant_mut(tournament_id, user_id)?.state = ParticipantState::Ranked {
            score,
            position,
            winnings,
            payout: paid,
        };
        Ok(DisbursementResult {
            user_id,
            amount: winnings,
            state: paid,
        })
    }

    async fn close_settlement(&self, tournament_id: TournamentId) -> TournamentResult<Tournament> {
        let mut state = self.state.lock().await;
        let tournament = state.tournament(tournament_id)?.clone();
        if tournament.status == TournamentStatus::Completed {
            return Ok(tournament);
        }
        rules::check_transition(&tournament, TournamentStatus::Completed)?;

        let roster: Vec<Participant> = state
            .roster(tournament_id)
            .into_iter()
            .filter(|p| p.is_active)
            .collect();
        let outstanding = roster.iter().any(|p| match p.state {
            ParticipantState::Ranked { payout, .. } => payout.is_outstanding(),
            _ => true,
        });
        if outstanding {
            let tournament = state.tournament_mut(tournament_id)?;
            tournament.settlement_claimed_at = None;
            return Ok(tournament.clone());
        }

        for participant in &roster {
            let user = state.user_mut(participant.user_id)?;
            user.tournaments_played += 1;
            if participant.state.position() == Some(1) {
                user.tournaments_won += 1;
            }
        }

        let tournament = state.tournament_mut(tournament_id)?;
        tournament.status = TournamentStatus::Completed;
        tournament.ended_at = Some(Utc::now());
        tournament.settlement_claimed_at = None;
        Ok(tournament.clone())
    }

    async fn cancel_tournament(
        &self,
        tournament_id: TournamentId,
    ) -> TournamentResult<(Tournament, Vec<Participant>)> {
        let mut state = self.state.lock().await;
        let tournament = state.tournament(tournament_id)?.clone();
        if tournament.status != TournamentStatus::Cancelled {
            rules::check_cancel(&tournament)?;
            let ids: Vec<i64> = state
                .roster(tournament_id)
                .into_iter()
                .filter(|p| p.is_active)
                .map(|p| p.id)
                .collect();
            for id in ids {
                if let Some(participant) = state.participants.get_mut(&id) {
                    participant.state = ParticipantState::Refunded {
                        refund: Disbursement::Pending,
                    };
                }
            }
            state.tournament_mut(tournament_id)?.status = TournamentStatus::Cancelled;
        }

        let tournament = state.tournament(tournament_id)?.clone();
        let participants = state
            .roster(tournament_id)
            .into_iter()
            .filter(|p| p.is_active)
            .collect();
        Ok((tournament, participants))
    }

    async fn refund(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<DisbursementResult> {
        let mut state = self.state.lock().await;
        let tournament = state.tournament(tournament_id)?.clone();
        let participant = state.participant_mut(tournament_id, user_id)?.clone();
        let ParticipantState::Refunded { refund } = participant.state else {
            return Err(TournamentError::InvalidState {
                expected: TournamentStatus::Cancelled,
                actual: tournament.status,
            });
        };
        if !refund.is_outstanding() {
            return Ok(DisbursementResult {
                user_id,
                amount: tournament.entry_fee,
                state: refund,
            });
        }
        if state.take_credit_failure(user_id) {
            return Err(injected_failure().into());
        }

        let credit = state.post(
            &Posting::new(
                user_id,
                tournament.entry_fee,
                TransactionType::TournamentFee,
                format!("Refund for cancelled tournament {}", tournament.title),
            )
            .for_tournament(tournament_id),
            EntryDirection::Credit,
        )?;
        let paid = Disbursement::Paid {
            transaction_id: credit.id,
        };
        state.participant_mut(tournament_id, user_id)?.state =
            ParticipantState::Refunded { refund: paid };
        Ok(DisbursementResult {
            user_id,
            amount: tournament.entry_fee,
            state: paid,
        })
    }

    async fn record_disbursement_failure(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<DisbursementResult> {
        let mut state = self.state.lock().await;
        if take_fault(&mut state.record_failures, user_id) {
            return Err(TournamentError::Timeout("injected record failure".to_string()));
        }
        let entry_fee = state.tournament(tournament_id)?.entry_fee;
        let participant = state.participant_mut(tournament_id, user_id)?;
        let (amount, disbursement) = match &mut participant.state {
            ParticipantState::Ranked {
                winnings, payout, ..
            } => (*winnings, payout),
            ParticipantState::Refunded { refund } => (entry_fee, refund),
            _ => return Err(TournamentError::NotParticipant(user_id)),
        };
        if disbursement.is_outstanding() {
            *disbursement = Disbursement::Failed {
                attempts: disbursement.attempts() + 1,
            };
        }
        Ok(DisbursementResult {
            user_id,
            amount,
            state: *disbursement,
        })
    }
}
