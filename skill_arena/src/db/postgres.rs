//! PostgreSQL storage backend.
//!
//! Each atomic unit is one database transaction. Rows are locked with
//! `SELECT ... FOR UPDATE` in the order tournament, participant, user, and
//! debits use a conditional `UPDATE ... WHERE balance >= $1`.
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use super::repository::{LedgerRepository, TournamentRepository};
use super::retry::{Retryable, with_retry};
use super::timeouts::{DEFAULT_TRANSACTION_TIMEOUT, TimeoutError, with_default_timeout, within};
use crate::config::RetryPolicy;
use crate::prize::PrizeDistribution;
use crate::tournament::{
    Admission, Departure, Disbursement, DisbursementResult, NewTournament, Participant,
    ParticipantState, ScoreRecorded, SettlementClaim, Tournament, TournamentError, TournamentId,
    TournamentResult, TournamentStatus, rules,
};
use crate::wallet::rules::{ConfirmationStep, check_posting, confirmation_step};
use crate::wallet::{
    ConfirmationReceipt, DepositSettlement, EntryDirection, LedgerAudit, NewUser, Posting,
    ReferralBonus, Transaction, TransactionId, TransactionStatus, TransactionType, User, UserId,
    WalletError, WalletResult, WithdrawalRequest,
};

type DbTx<'c> = sqlx::Transaction<'c, Postgres>;

/// Storage backend over a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    retry: RetryPolicy,
    unit_timeout: Duration,
}

impl PgStore {
    /// Create a store over an existing pool
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    /// * `retry` - Policy for serialization conflicts and deadlocks
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            unit_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }

    /// Override the deadline applied to each atomic unit
    pub fn with_unit_timeout(mut self, unit_timeout: Duration) -> Self {
        self.unit_timeout = unit_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run<T, E, F, Fut>(&self, label: &str, mut unit: F) -> Result<T, E>
    where
        E: Retryable + From<TimeoutError>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        with_retry(&self.retry, label, || within(self.unit_timeout, unit())).await
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn parse<T: FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T, String> {
    let raw: String = row.try_get(column).map_err(|e| e.to_string())?;
    raw.parse()
}

fn timestamp(row: &PgRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    Ok(row.try_get::<NaiveDateTime, _>(column)?.and_utc())
}

fn optional_timestamp(row: &PgRow, column: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    Ok(row
        .try_get::<Option<NaiveDateTime>, _>(column)?
        .map(|dt| dt.and_utc()))
}

fn count(row: &PgRow, column: &str) -> Result<u32, String> {
    let value: i32 = row.try_get(column).map_err(|e| e.to_string())?;
    u32::try_from(value).map_err(|_| format!("negative {column}: {value}"))
}

fn user_from_row(row: &PgRow) -> WalletResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        username: row.try_get("username")?,
        balance: row.try_get("balance")?,
        total_deposits: row.try_get("total_deposits")?,
        total_withdrawals: row.try_get("total_withdrawals")?,
        total_winnings: row.try_get("total_winnings")?,
        rating: row.try_get("rating")?,
        games_played: row.try_get("games_played")?,
        tournaments_played: row.try_get("tournaments_played")?,
        tournaments_won: row.try_get("tournaments_won")?,
        referral_code: row.try_get("referral_code")?,
        referrer_id: row.try_get("referrer_id")?,
        created_at: timestamp(row, "created_at")?,
        last_active: timestamp(row, "last_active")?,
    })
}

fn transaction_from_row(row: &PgRow) -> WalletResult<Transaction> {
    Ok(Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        direction: parse(row, "direction").map_err(WalletError::Corrupt)?,
        transaction_type: parse(row, "transaction_type").map_err(WalletError::Corrupt)?,
        status: parse(row, "status").map_err(WalletError::Corrupt)?,
        description: row.try_get("description")?,
        payment_method: row.try_get("payment_method")?,
        external_ref: row.try_get("external_ref")?,
        tournament_id: row.try_get("tournament_id")?,
        created_at: timestamp(row, "created_at")?,
        processed_at: optional_timestamp(row, "processed_at")?,
    })
}

fn tournament_from_row(row: &PgRow) -> TournamentResult<Tournament> {
    let distribution: Json<PrizeDistribution> = row.try_get("prize_distribution")?;
    Ok(Tournament {
        id: row.try_get("id")?,
        creator_id: row.try_get("creator_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        game_type: parse(row, "game_type").map_err(TournamentError::Corrupt)?,
        tournament_type: parse(row, "tournament_type").map_err(TournamentError::Corrupt)?,
        entry_fee: row.try_get("entry_fee")?,
        max_participants: count(row, "max_participants").map_err(TournamentError::Corrupt)?,
        min_participants: count(row, "min_participants").map_err(TournamentError::Corrupt)?,
        prize_pool: row.try_get("prize_pool")?,
        platform_commission: row.try_get("platform_commission")?,
        prize_distribution: distribution.0,
        status: parse(row, "status").map_err(TournamentError::Corrupt)?,
        participant_count: count(row, "participant_count").map_err(TournamentError::Corrupt)?,
        created_at: timestamp(row, "created_at")?,
        started_at: optional_timestamp(row, "started_at")?,
        ended_at: optional_timestamp(row, "ended_at")?,
        settlement_claimed_at: optional_timestamp(row, "settlement_claimed_at")?,
    })
}

/// Participant state spread over relational columns
struct StateColumns {
    stage: &'static str,
    score: Option<f64>,
    final_position: Option<i32>,
    winnings: Option<Decimal>,
    disbursement: Option<&'static str>,
    disbursement_transaction_id: Option<i64>,
    disbursement_attempts: i32,
}

fn disbursement_columns(disbursement: Disbursement) -> (&'static str, Option<i64>, i32) {
    match disbursement {
        Disbursement::NotDue => ("not_due", None, 0),
        Disbursement::Pending => ("pending", None, 0),
        Disbursement::Paid { transaction_id } => ("paid", Some(transaction_id), 0),
        Disbursement::Failed { attempts } => {
            ("failed", None, i32::try_from(attempts).unwrap_or(i32::MAX))
        }
    }
}

fn encode_state(state: &ParticipantState) -> StateColumns {
    let empty = StateColumns {
        stage: "not_submitted",
        score: None,
        final_position: None,
        winnings: None,
        disbursement: None,
        disbursement_transaction_id: None,
        disbursement_attempts: 0,
    };
    match *state {
        ParticipantState::NotSubmitted => empty,
        ParticipantState::Submitted { score } => StateColumns {
            stage: "submitted",
            score: Some(score),
            ..empty
        },
        ParticipantState::Ranked {
            score,
            position,
            winnings,
            payout,
        } => {
            let (disbursement, transaction_id, attempts) = disbursement_columns(payout);
            StateColumns {
                stage: "ranked",
                score: Some(score),
                final_position: Some(i32::try_from(position).unwrap_or(i32::MAX)),
                winnings: Some(winnings),
                disbursement: Some(disbursement),
                disbursement_transaction_id: transaction_id,
                disbursement_attempts: attempts,
            }
        }
        ParticipantState::Refunded { refund } => {
            let (disbursement, transaction_id, attempts) = disbursement_columns(refund);
            StateColumns {
                stage: "refunded",
                disbursement: Some(disbursement),
                disbursement_transaction_id: transaction_id,
                disbursement_attempts: attempts,
                ..empty
            }
        }
    }
}

fn decode_disbursement(row: &PgRow) -> Result<Disbursement, String> {
    let status: Option<String> = row.try_get("disbursement").map_err(|e| e.to_string())?;
    let transaction_id: Option<i64> = row
        .try_get("disbursement_transaction_id")
        .map_err(|e| e.to_string())?;
    let attempts = count(row, "disbursement_attempts")?;
    match (status.as_deref(), transaction_id) {
        (Some("not_due"), _) => Ok(Disbursement::NotDue),
        (Some("pending"), _) => Ok(Disbursement::Pending),
        (Some("paid"), Some(transaction_id)) => Ok(Disbursement::Paid { transaction_id }),
        (Some("failed"), _) => Ok(Disbursement::Failed { attempts }),
        (other, _) => Err(format!("bad disbursement: {other:?}")),
    }
}

fn decode_state(row: &PgRow) -> Result<ParticipantState, String> {
    let stage: String = row.try_get("stage").map_err(|e| e.to_string())?;
    let score: Option<f64> = row.try_get("score").map_err(|e| e.to_string())?;
    let missing_score = || format!("stage {stage} without score");
    match stage.as_str() {
        "not_submitted" => Ok(ParticipantState::NotSubmitted),
        "submitted" => Ok(ParticipantState::Submitted {
            score: score.ok_or_else(missing_score)?,
        }),
        "ranked" => {
            let position: Option<i32> = row.try_get("final_position").map_err(|e| e.to_string())?;
            let winnings: Option<Decimal> = row.try_get("winnings").map_err(|e| e.to_string())?;
            Ok(ParticipantState::Ranked {
                score: score.ok_or_else(missing_score)?,
                position: position
                    .and_then(|p| u32::try_from(p).ok())
                    .ok_or("ranked without position")?,
                winnings: winnings.ok_or("ranked without winnings")?,
                payout: decode_disbursement(row)?,
            })
        }
        "refunded" => Ok(ParticipantState::Refunded {
            refund: decode_disbursement(row)?,
        }),
        other => Err(format!("unknown stage: {other}")),
    }
}

fn participant_from_row(row: &PgRow) -> TournamentResult<Participant> {
    Ok(Participant {
        id: row.try_get("id")?,
        tournament_id: row.try_get("tournament_id")?,
        user_id: row.try_get("user_id")?,
        state: decode_state(row).map_err(TournamentError::Corrupt)?,
        is_active: row.try_get("is_active")?,
        joined_at: timestamp(row, "joined_at")?,
        left_at: optional_timestamp(row, "left_at")?,
    })
}

// ---------------------------------------------------------------------------
// Ledger helpers shared by wallet and tournament units
// ---------------------------------------------------------------------------

async fn ensure_ref_unused(
    tx: &mut DbTx<'_>,
    external_ref: &str,
    owner: Option<TransactionId>,
) -> WalletResult<()> {
    let taken = sqlx::query("SELECT id FROM transactions WHERE external_ref = $1 AND id IS DISTINCT FROM $2")
        .bind(external_ref)
        .bind(owner)
        .fetch_optional(&mut **tx)
        .await?;
    match taken {
        Some(_) => Err(WalletError::DuplicateExternalRef(external_ref.to_string())),
        None => Ok(()),
    }
}

async fn insufficient_or_missing(tx: &mut DbTx<'_>, user_id: UserId, required: Decimal) -> WalletError {
    let row = sqlx::query("SELECT balance FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await;
    match row {
        Ok(Some(row)) => match row.try_get("balance") {
            Ok(available) => WalletError::InsufficientFunds {
                user_id,
                available,
                required,
            },
            Err(e) => WalletError::Database(e),
        },
        Ok(None) => WalletError::UserNotFound(user_id),
        Err(e) => WalletError::Database(e),
    }
}

/// Completed posting inside an open transaction
async fn post_in(
    tx: &mut DbTx<'_>,
    posting: &Posting,
    direction: EntryDirection,
) -> WalletResult<Transaction> {
    check_posting(posting)?;
    if let Some(reference) = &posting.external_ref {
        ensure_ref_unused(tx, reference, None).await?;
    }

    let updated = match direction {
        EntryDirection::Credit => {
            sqlx::query(
                r#"
                UPDATE users
                SET balance = balance + $1,
                    total_deposits = total_deposits + CASE WHEN $3 = 'deposit' THEN $1 ELSE 0 END,
                    total_winnings = total_winnings + CASE WHEN $3 = 'prize' THEN $1 ELSE 0 END,
                    last_active = NOW()
                WHERE id = $2
                RETURNING id
                "#,
            )
            .bind(posting.amount)
            .bind(posting.user_id)
            .bind(posting.transaction_type.to_string())
            .fetch_optional(&mut **tx)
            .await?
        }
        EntryDirection::Debit => {
            sqlx::query(
                r#"
                UPDATE users
                SET balance = balance - $1, last_active = NOW()
                WHERE id = $2 AND balance >= $1
                RETURNING id
                "#,
            )
            .bind(posting.amount)
            .bind(posting.user_id)
            .fetch_optional(&mut **tx)
            .await?
        }
    };
    if updated.is_none() {
        return Err(match direction {
            EntryDirection::Credit => WalletError::UserNotFound(posting.user_id),
            EntryDirection::Debit => {
                insufficient_or_missing(tx, posting.user_id, posting.amount).await
            }
        });
    }

    let row = sqlx::query(
        r#"
        INSERT INTO transactions
            (user_id, amount, direction, transaction_type, status, description, external_ref, tournament_id, processed_at)
        VALUES ($1, $2, $3, $4, 'completed', $5, $6, $7, NOW())
        RETURNING *
        "#,
    )
    .bind(posting.user_id)
    .bind(posting.amount)
    .bind(direction.to_string())
    .bind(posting.transaction_type.to_string())
    .bind(&posting.description)
    .bind(&posting.external_ref)
    .bind(posting.tournament_id)
    .fetch_one(&mut **tx)
    .await?;
    transaction_from_row(&row)
}

async fn lock_transaction(tx: &mut DbTx<'_>, transaction_id: TransactionId) -> WalletResult<Transaction> {
    let row = sqlx::query("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
        .bind(transaction_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(WalletError::NotFound(transaction_id))?;
    transaction_from_row(&row)
}

async fn finalize_in(
    tx: &mut DbTx<'_>,
    transaction_id: TransactionId,
    status: TransactionStatus,
    external_ref: Option<&str>,
) -> WalletResult<Transaction> {
    let row = sqlx::query(
        r#"
        UPDATE transactions
        SET status = $2, external_ref = COALESCE($3, external_ref), processed_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(status.to_string())
    .bind(external_ref)
    .fetch_one(&mut **tx)
    .await?;
    transaction_from_row(&row)
}

// ---------------------------------------------------------------------------
// Tournament helpers
// ---------------------------------------------------------------------------

async fn lock_tournament(tx: &mut DbTx<'_>, tournament_id: TournamentId) -> TournamentResult<Tournament> {
    let row = sqlx::query("SELECT * FROM tournaments WHERE id = $1 FOR UPDATE")
        .bind(tournament_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(TournamentError::TournamentNotFound(tournament_id))?;
    tournament_from_row(&row)
}

async fn lock_participant(
    tx: &mut DbTx<'_>,
    tournament_id: TournamentId,
    user_id: UserId,
) -> TournamentResult<Option<Participant>> {
    let row = sqlx::query(
        "SELECT * FROM participants WHERE tournament_id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(tournament_id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(participant_from_row).transpose()
}

async fn active_roster(tx: &mut DbTx<'_>, tournament_id: TournamentId) -> TournamentResult<Vec<Participant>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM participants
        WHERE tournament_id = $1 AND is_active
        ORDER BY joined_at, id
        FOR UPDATE
        "#,
    )
    .bind(tournament_id)
    .fetch_all(&mut **tx)
    .await?;
    rows.iter().map(participant_from_row).collect()
}

async fn write_state(
    tx: &mut DbTx<'_>,
    participant_id: i64,
    state: &ParticipantState,
) -> TournamentResult<Participant> {
    let columns = encode_state(state);
    let row = sqlx::query(
        r#"
        UPDATE participants
        SET stage = $2, score = $3, final_position = $4, winnings = $5,
            disbursement = $6, disbursement_transaction_id = $7, disbursement_attempts = $8
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(participant_id)
    .bind(columns.stage)
    .bind(columns.score)
    .bind(columns.final_position)
    .bind(columns.winnings)
    .bind(columns.disbursement)
    .bind(columns.disbursement_transaction_id)
    .bind(columns.disbursement_attempts)
    .fetch_one(&mut **tx)
    .await?;
    participant_from_row(&row)
}

async fn participant_or_missing(
    tx: &mut DbTx<'_>,
    tournament_id: TournamentId,
    user_id: UserId,
) -> TournamentResult<Participant> {
    lock_participant(tx, tournament_id, user_id)
        .await?
        .ok_or(TournamentError::NotParticipant(user_id))
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn create_user(&self, new_user: &NewUser, bonus: ReferralBonus) -> WalletResult<User> {
        self.run("create_user", move || async move {
            let mut tx = self.pool.begin().await?;

            let exists = sqlx::query("SELECT id FROM users WHERE external_id = $1")
                .bind(new_user.external_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_some() {
                return Err(WalletError::UserExists(new_user.external_id));
            }
            let code_taken = sqlx::query("SELECT id FROM users WHERE referral_code = $1")
                .bind(&new_user.referral_code)
                .fetch_optional(&mut *tx)
                .await?;
            if code_taken.is_some() {
                return Err(WalletError::ReferralCodeTaken);
            }

            let referrer_id: Option<UserId> = match &new_user.referred_by {
                Some(code) => {
                    let row = sqlx::query("SELECT id FROM users WHERE referral_code = $1 FOR UPDATE")
                        .bind(code)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or_else(|| WalletError::UnknownReferralCode(code.clone()))?;
                    Some(row.try_get("id")?)
                }
                None => None,
            };

            let row = sqlx::query(
                r#"
                INSERT INTO users (external_id, username, referral_code, referrer_id)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(new_user.external_id)
            .bind(&new_user.username)
            .bind(&new_user.referral_code)
            .bind(referrer_id)
            .fetch_one(&mut *tx)
            .await?;
            let user_id: UserId = row.try_get("id")?;

            if let Some(referrer_id) = referrer_id {
                if bonus.new_user > Decimal::ZERO {
                    let welcome = Posting::new(
                        user_id,
                        bonus.new_user,
                        TransactionType::ReferralBonus,
                        "Referral welcome bonus",
                    );
                    post_in(&mut tx, &welcome, EntryDirection::Credit).await?;
                }
                if bonus.referrer > Decimal::ZERO {
                    let reward = Posting::new(
                        referrer_id,
                        bonus.referrer,
                        TransactionType::ReferralBonus,
                        format!("Referral bonus for inviting user {user_id}"),
                    );
                    post_in(&mut tx, &reward, EntryDirection::Credit).await?;
                }
            }

            let row = sqlx::query("SELECT * FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
            let user = user_from_row(&row)?;
            tx.commit().await?;
            Ok(user)
        })
        .await
    }

    async fn get_user(&self, user_id: UserId) -> WalletResult<User> {
        let row = with_default_timeout(
            sqlx::query("SELECT * FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(WalletError::UserNotFound(user_id))?;
        user_from_row(&row)
    }

    async fn find_user_by_external_id(&self, external_id: i64) -> WalletResult<Option<User>> {
        let row = with_default_timeout(
            sqlx::query("SELECT * FROM users WHERE external_id = $1")
                .bind(external_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn credit(&self, posting: &Posting) -> WalletResult<Transaction> {
        self.run("credit", move || async move {
            let mut tx = self.pool.begin().await?;
            let record = post_in(&mut tx, posting, EntryDirection::Credit).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    async fn debit(&self, posting: &Posting) -> WalletResult<Transaction> {
        self.run("debit", move || async move {
            let mut tx = self.pool.begin().await?;
            let record = post_in(&mut tx, posting, EntryDirection::Debit).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    async fn create_pending_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        payment_method: &str,
    ) -> WalletResult<Transaction> {
        check_posting(&Posting::new(user_id, amount, TransactionType::Deposit, ""))?;
        self.run("create_pending_deposit", move || async move {
            let mut tx = self.pool.begin().await?;

            // Serialises concurrent requests for the same user
            sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(WalletError::UserNotFound(user_id))?;

            let existing = sqlx::query(
                r#"
                SELECT * FROM transactions
                WHERE user_id = $1 AND transaction_type = 'deposit'
                  AND status = 'pending' AND payment_method = $2
                ORDER BY id
                LIMIT 1
                "#,
            )
            .bind(user_id)
            .bind(payment_method)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = existing {
                let pending = transaction_from_row(&row)?;
                tx.commit().await?;
                return Ok(pending);
            }

            let row = sqlx::query(
                r#"
                INSERT INTO transactions
                    (user_id, amount, direction, transaction_type, status, description, payment_method)
                VALUES ($1, $2, 'credit', 'deposit', 'pending', $3, $4)
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(amount)
            .bind(format!("Deposit via {payment_method}"))
            .bind(payment_method)
            .fetch_one(&mut *tx)
            .await?;
            let pending = transaction_from_row(&row)?;
            tx.commit().await?;
            Ok(pending)
        })
        .await
    }

    async fn settle_deposit(
        &self,
        transaction_id: TransactionId,
        external_ref: &str,
    ) -> WalletResult<DepositSettlement> {
        self.run("settle_deposit", move || async move {
            let mut tx = self.pool.begin().await?;
            let pending = lock_transaction(&mut tx, transaction_id).await?;
            let step = confirmation_step(
                &pending,
                TransactionType::Deposit,
                TransactionStatus::Completed,
                Some(external_ref),
            )?;
            if step == ConfirmationStep::Redelivered {
                tx.commit().await?;
                return Ok(DepositSettlement::AlreadyApplied {
                    transaction: pending,
                });
            }

            ensure_ref_unused(&mut tx, external_ref, Some(transaction_id)).await?;
            sqlx::query(
                r#"
                UPDATE users
                SET balance = balance + $1, total_deposits = total_deposits + $1, last_active = NOW()
                WHERE id = $2
                "#,
            )
            .bind(pending.amount)
            .bind(pending.user_id)
            .execute(&mut *tx)
            .await?;
            let transaction = finalize_in(
                &mut tx,
                transaction_id,
                TransactionStatus::Completed,
                Some(external_ref),
            )
            .await?;
            tx.commit().await?;
            Ok(DepositSettlement::Credited { transaction })
        })
        .await
    }

    async fn fail_deposit(
        &self,
        transaction_id: TransactionId,
        external_ref: Option<&str>,
    ) -> WalletResult<ConfirmationReceipt> {
        self.run("fail_deposit", move || async move {
            let mut tx = self.pool.begin().await?;
            let pending = lock_transaction(&mut tx, transaction_id).await?;
            let step = confirmation_step(
                &pending,
                TransactionType::Deposit,
                TransactionStatus::Failed,
                external_ref,
            )?;
            if step == ConfirmationStep::Redelivered {
                tx.commit().await?;
                return Ok(ConfirmationReceipt {
                    transaction: pending,
                    applied: false,
                });
            }
            if let Some(reference) = external_ref {
                ensure_ref_unused(&mut tx, reference, Some(transaction_id)).await?;
            }
            let transaction =
                finalize_in(&mut tx, transaction_id, TransactionStatus::Failed, external_ref).await?;
            tx.commit().await?;
            Ok(ConfirmationReceipt {
                transaction,
                applied: true,
            })
        })
        .await
    }

    async fn create_withdrawal(&self, request: &WithdrawalRequest) -> WalletResult<Transaction> {
        self.run("create_withdrawal", move || async move {
            let mut tx = self.pool.begin().await?;
            let held = sqlx::query(
                r#"
                UPDATE users
                SET balance = balance - $1, last_active = NOW()
                WHERE id = $2 AND balance >= $1
                RETURNING id
                "#,
            )
            .bind(request.gross)
            .bind(request.user_id)
            .fetch_optional(&mut *tx)
            .await?;
            if held.is_none() {
                return Err(insufficient_or_missing(&mut tx, request.user_id, request.gross).await);
            }

            let row = sqlx::query(
                r#"
                INSERT INTO transactions
                    (user_id, amount, fee, direction, transaction_type, status, description, payment_method)
                VALUES ($1, $2, $3, 'debit', 'withdrawal', 'pending', $4, $5)
                RETURNING *
                "#,
            )
            .bind(request.user_id)
            .bind(request.net)
            .bind(request.commission)
            .bind(format!("Withdrawal to {}", request.destination))
            .bind(&request.destination)
            .fetch_one(&mut *tx)
            .await?;
            let transaction = transaction_from_row(&row)?;
            tx.commit().await?;
            Ok(transaction)
        })
        .await
    }

    async fn complete_withdrawal(
        &self,
        transaction_id: TransactionId,
        external_ref: &str,
    ) -> WalletResult<ConfirmationReceipt> {
        self.run("complete_withdrawal", move || async move {
            let mut tx = self.pool.begin().await?;
            let pending = lock_transaction(&mut tx, transaction_id).await?;
            let step = confirmation_step(
                &pending,
                TransactionType::Withdrawal,
                TransactionStatus::Completed,
                Some(external_ref),
            )?;
            if step == ConfirmationStep::Redelivered {
                tx.commit().await?;
                return Ok(ConfirmationReceipt {
                    transaction: pending,
                    applied: false,
                });
            }

            ensure_ref_unused(&mut tx, external_ref, Some(transaction_id)).await?;
            sqlx::query("UPDATE users SET total_withdrawals = total_withdrawals + $1 WHERE id = $2")
                .bind(pending.amount)
                .bind(pending.user_id)
                .execute(&mut *tx)
                .await?;
            let transaction = finalize_in(
                &mut tx,
                transaction_id,
                TransactionStatus::Completed,
                Some(external_ref),
            )
            .await?;
            tx.commit().await?;
            Ok(ConfirmationReceipt {
                transaction,
                applied: true,
            })
        })
        .await
    }

    async fn reject_withdrawal(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        reason: &str,
    ) -> WalletResult<ConfirmationReceipt> {
        self.run("reject_withdrawal", move || async move {
            let mut tx = self.pool.begin().await?;
            let pending = lock_transaction(&mut tx, transaction_id).await?;
            let step = confirmation_step(&pending, TransactionType::Withdrawal, status, None)?;
            if step == ConfirmationStep::Redelivered {
                tx.commit().await?;
                return Ok(ConfirmationReceipt {
                    transaction: pending,
                    applied: false,
                });
            }

            sqlx::query("UPDATE users SET balance = balance + $1 WHERE id = $2")
                .bind(pending.gross_amount())
                .bind(pending.user_id)
                .execute(&mut *tx)
                .await?;
            let row = sqlx::query(
                r#"
                UPDATE transactions
                SET status = $2, description = description || ' (' || $3 || ')', processed_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(transaction_id)
            .bind(status.to_string())
            .bind(reason)
            .fetch_one(&mut *tx)
            .await?;
            let transaction = transaction_from_row(&row)?;
            tx.commit().await?;
            Ok(ConfirmationReceipt {
                transaction,
                applied: true,
            })
        })
        .await
    }

    async fn get_transaction(&self, transaction_id: TransactionId) -> WalletResult<Transaction> {
        let row = with_default_timeout(
            sqlx::query("SELECT * FROM transactions WHERE id = $1")
                .bind(transaction_id)
                .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(WalletError::NotFound(transaction_id))?;
        transaction_from_row(&row)
    }

    async fn transactions(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> WalletResult<Vec<Transaction>> {
        self.get_user(user_id).await?;
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT * FROM transactions
                WHERE user_id = $1
                ORDER BY id DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(user_id)
            .bind(limit.max(0))
            .bind(offset.max(0))
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn pending_withdrawals(&self, limit: i64) -> WalletResult<Vec<Transaction>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT * FROM transactions
                WHERE transaction_type = 'withdrawal' AND status = 'pending'
                ORDER BY id
                LIMIT $1
                "#,
            )
            .bind(limit.max(0))
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn audit(&self, user_id: UserId) -> WalletResult<LedgerAudit> {
        within(self.unit_timeout, async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                .execute(&mut *tx)
                .await?;
            let row = sqlx::query("SELECT * FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(WalletError::UserNotFound(user_id))?;
            let user = user_from_row(&row)?;
            let rows = sqlx::query("SELECT * FROM transactions WHERE user_id = $1 ORDER BY id")
                .bind(user_id)
                .fetch_all(&mut *tx)
                .await?;
            let log = rows
                .iter()
                .map(transaction_from_row)
                .collect::<WalletResult<Vec<_>>>()?;
            tx.commit().await?;
            Ok(LedgerAudit::compute(&user, &log))
        })
        .await
    }
}

#[async_trait]
impl TournamentRepository for PgStore {
    async fn create_tournament(
        &self,
        new_tournament: &NewTournament,
    ) -> TournamentResult<Tournament> {
        rules::check_draft(&new_tournament.draft)?;
        let draft = &new_tournament.draft;
        let max_participants = i32::try_from(draft.max_participants)
            .map_err(|_| TournamentError::InvalidCapacity("max_participants too large".to_string()))?;
        let min_participants = i32::try_from(draft.min_participants)
            .map_err(|_| TournamentError::InvalidCapacity("min_participants too large".to_string()))?;

        self.run("create_tournament", move || async move {
            let mut tx = self.pool.begin().await?;
            sqlx::query("SELECT id FROM users WHERE id = $1")
                .bind(new_tournament.creator_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(WalletError::UserNotFound(new_tournament.creator_id))?;

            let row = sqlx::query(
                r#"
                INSERT INTO tournaments
                    (creator_id, title, description, game_type, tournament_type, entry_fee,
                     max_participants, min_participants, prize_pool, platform_commission,
                     prize_distribution, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'created')
                RETURNING id
                "#,
            )
            .bind(new_tournament.creator_id)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(draft.game_type.to_string())
            .bind(draft.tournament_type.to_string())
            .bind(draft.entry_fee)
            .bind(max_participants)
            .bind(min_participants)
            .bind(new_tournament.prize_pool)
            .bind(new_tournament.platform_commission)
            .bind(Json(&new_tournament.prize_distribution))
            .fetch_one(&mut *tx)
            .await?;
            let id: TournamentId = row.try_get("id")?;

            let row = sqlx::query(
                "UPDATE tournaments SET status = 'registration' WHERE id = $1 AND status = 'created' RETURNING *",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            let tournament = tournament_from_row(&row)?;
            tx.commit().await?;
            Ok(tournament)
        })
        .await
    }

    async fn get_tournament(&self, tournament_id: TournamentId) -> TournamentResult<Tournament> {
        let row = with_default_timeout(
            sqlx::query("SELECT * FROM tournaments WHERE id = $1")
                .bind(tournament_id)
                .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(TournamentError::TournamentNotFound(tournament_id))?;
        tournament_from_row(&row)
    }

    async fn list_tournaments(
        &self,
        status: Option<TournamentStatus>,
        limit: i64,
    ) -> TournamentResult<Vec<Tournament>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT * FROM tournaments
                WHERE ($1::TEXT IS NULL OR status = $1)
                ORDER BY id DESC
                LIMIT $2
                "#,
            )
            .bind(status.map(|s| s.to_string()))
            .bind(limit.max(0))
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(tournament_from_row).collect()
    }

    async fn participants(
        &self,
        tournament_id: TournamentId,
    ) -> TournamentResult<Vec<Participant>> {
        self.get_tournament(tournament_id).await?;
        let rows = with_default_timeout(
            sqlx::query("SELECT * FROM participants WHERE tournament_id = $1 ORDER BY joined_at, id")
                .bind(tournament_id)
                .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(participant_from_row).collect()
    }

    async fn user_tournaments(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> TournamentResult<Vec<Tournament>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT t.* FROM tournaments t
                JOIN participants p ON p.tournament_id = t.id
                WHERE p.user_id = $1 AND p.is_active
                ORDER BY t.id DESC
                LIMIT $2
                "#,
            )
            .bind(user_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(tournament_from_row).collect()
    }

    async fn admit(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<Admission> {
        self.run("admit", move || async move {
            let mut tx = self.pool.begin().await?;
            let tournament = lock_tournament(&mut tx, tournament_id).await?;
            let existing = lock_participant(&mut tx, tournament_id, user_id).await?;
            rules::check_admission(&tournament, existing.as_ref())?;

            let fee = Posting::new(
                user_id,
                tournament.entry_fee,
                TransactionType::TournamentFee,
                format!("Entry fee for tournament {}", tournament.title),
            )
            .for_tournament(tournament_id);
            let fee = post_in(&mut tx, &fee, EntryDirection::Debit).await?;

            let participant = match existing {
                Some(rejoin) => {
                    sqlx::query(
                        "UPDATE participants SET is_active = TRUE, joined_at = NOW(), left_at = NULL WHERE id = $1",
                    )
                    .bind(rejoin.id)
                    .execute(&mut *tx)
                    .await?;
                    write_state(&mut tx, rejoin.id, &ParticipantState::NotSubmitted).await?
                }
                None => {
                    let row = sqlx::query(
                        r#"
                        INSERT INTO participants (tournament_id, user_id, stage)
                        VALUES ($1, $2, 'not_submitted')
                        RETURNING *
                        "#,
                    )
                    .bind(tournament_id)
                    .bind(user_id)
                    .fetch_one(&mut *tx)
                    .await?;
                    participant_from_row(&row)?
                }
            };

            let row = sqlx::query(
                "UPDATE tournaments SET participant_count = participant_count + 1 WHERE id = $1 RETURNING *",
            )
            .bind(tournament_id)
            .fetch_one(&mut *tx)
            .await?;
            let mut tournament = tournament_from_row(&row)?;

            let started = rules::should_auto_start(&tournament);
            if started {
                let row = sqlx::query(
                    "UPDATE tournaments SET status = 'in_progress', started_at = NOW() WHERE id = $1 RETURNING *",
                )
                .bind(tournament_id)
                .fetch_one(&mut *tx)
                .await?;
                tournament = tournament_from_row(&row)?;
            }

            tx.commit().await?;
            Ok(Admission {
                tournament,
                participant,
                fee_transaction_id: fee.id,
                started,
            })
        })
        .await
    }

    async fn depart(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<Departure> {
        self.run("depart", move || async move {
            let mut tx = self.pool.begin().await?;
            let tournament = lock_tournament(&mut tx, tournament_id).await?;
            let existing = lock_participant(&mut tx, tournament_id, user_id).await?;
            rules::check_leave(&tournament, user_id, existing.as_ref())?;
            let participant = existing.ok_or(TournamentError::NotParticipant(user_id))?;

            let refund = Posting::new(
                user_id,
                tournament.entry_fee,
                TransactionType::TournamentFee,
                format!("Refund for leaving tournament {}", tournament.title),
            )
            .for_tournament(tournament_id);
            let refund = post_in(&mut tx, &refund, EntryDirection::Credit).await?;

            sqlx::query("UPDATE participants SET is_active = FALSE, left_at = NOW() WHERE id = $1")
                .bind(participant.id)
                .execute(&mut *tx)
                .await?;
            let participant = write_state(
                &mut tx,
                participant.id,
                &ParticipantState::Refunded {
                    refund: Disbursement::Paid {
                        transaction_id: refund.id,
                    },
                },
            )
            .await?;

            let row = sqlx::query(
                "UPDATE tournaments SET participant_count = participant_count - 1 WHERE id = $1 RETURNING *",
            )
            .bind(tournament_id)
            .fetch_one(&mut *tx)
            .await?;
            let tournament = tournament_from_row(&row)?;

            tx.commit().await?;
            Ok(Departure {
                tournament,
                participant,
                refund_transaction_id: refund.id,
            })
        })
        .await
    }

    async fn record_score(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        score: f64,
    ) -> TournamentResult<ScoreRecorded> {
        self.run("record_score", move || async move {
            let mut tx = self.pool.begin().await?;
            let tournament = lock_tournament(&mut tx, tournament_id).await?;
            let existing = lock_participant(&mut tx, tournament_id, user_id).await?;
            rules::check_score_submission(&tournament, user_id, existing.as_ref())?;
            let participant = existing.ok_or(TournamentError::NotParticipant(user_id))?;

            let participant =
                write_state(&mut tx, participant.id, &ParticipantState::Submitted { score }).await?;
            sqlx::query("UPDATE users SET games_played = games_played + 1, last_active = NOW() WHERE id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            let roster = active_roster(&mut tx, tournament_id).await?;

            tx.commit().await?;
            Ok(ScoreRecorded {
                participant,
                all_submitted: rules::all_scores_submitted(&roster),
            })
        })
        .await
    }

    async fn claim_settlement(
        &self,
        tournament_id: TournamentId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> TournamentResult<SettlementClaim> {
        self.run("claim_settlement", move || async move {
            let mut tx = self.pool.begin().await?;
            let tournament = lock_tournament(&mut tx, tournament_id).await?;
            match tournament.status {
                TournamentStatus::Completed => {
                    tx.commit().await?;
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
                tx.commit().await?;
                return Ok(SettlementClaim::Busy);
            }

            let mut roster = active_roster(&mut tx, tournament_id).await?;
            let missing = roster.iter().filter(|p| !p.has_score()).count();
            if missing > 0 {
                return Err(TournamentError::ScoresPending { missing });
            }

            if roster
                .iter()
                .any(|p| matches!(p.state, ParticipantState::Submitted { .. }))
            {
                for standing in rules::rank(&tournament, &roster) {
                    let Some(participant) = roster.iter().find(|p| p.user_id == standing.user_id)
                    else {
                        continue;
                    };
                    let payout = if standing.winnings > Decimal::ZERO {
                        Disbursement::Pending
                    } else {
                        Disbursement::NotDue
                    };
                    write_state(
                        &mut tx,
                        participant.id,
                        &ParticipantState::Ranked {
                            score: standing.score,
                            position: standing.position,
                            winnings: standing.winnings,
                            payout,
                        },
                    )
                    .await?;
                }
                roster = active_roster(&mut tx, tournament_id).await?;
            }

            let row = sqlx::query(
                "UPDATE tournaments SET settlement_claimed_at = $2 WHERE id = $1 RETURNING *",
            )
            .bind(tournament_id)
            .bind(now.naive_utc())
            .fetch_one(&mut *tx)
            .await?;
            let tournament = tournament_from_row(&row)?;

            tx.commit().await?;
            Ok(SettlementClaim::Claimed {
                tournament,
                participants: roster,
            })
        })
        .await
    }

    async fn pay_out(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<DisbursementResult> {
        self.run("pay_out", move || async move {
            let mut tx = self.pool.begin().await?;
            let tournament = lock_tournament(&mut tx, tournament_id).await?;
            let participant = participant_or_missing(&mut tx, tournament_id, user_id).await?;
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
                tx.commit().await?;
                return Ok(DisbursementResult {
                    user_id,
                    amount: winnings,
                    state: payout,
                });
            }

            let prize = Posting::new(
                user_id,
                winnings,
                TransactionType::Prize,
                format!("Prize for position {position} in {}", tournament.title),
            )
            .for_tournament(tournament_id);
            let prize = post_in(&mut tx, &prize, EntryDirection::Credit).await?;
            let paid = Disbursement::Paid {
                transaction_id: prize.id,
            };
            write_state(
                &mut tx,
                participant.id,
                &ParticipantState::Ranked {
                    score,
                    position,
                    winnings,
                    payout: paid,
                },
            )
            .await?;

            tx.commit().await?;
            Ok(DisbursementResult {
                user_id,
                amount: winnings,
                state: paid,
            })
        })
        .await
    }

    async fn close_settlement(&self, tournament_id: TournamentId) -> TournamentResult<Tournament> {
        self.run("close_settlement", move || async move {
            let mut tx = self.pool.begin().await?;
            let tournament = lock_tournament(&mut tx, tournament_id).await?;
            if tournament.status == TournamentStatus::Completed {
                tx.commit().await?;
                return Ok(tournament);
            }
            rules::check_transition(&tournament, TournamentStatus::Completed)?;

            let roster = active_roster(&mut tx, tournament_id).await?;
            let outstanding = roster.iter().any(|p| match p.state {
                ParticipantState::Ranked { payout, .. } => payout.is_outstanding(),
                _ => true,
            });
            if outstanding {
                let row = sqlx::query(
                    "UPDATE tournaments SET settlement_claimed_at = NULL WHERE id = $1 RETURNING *",
                )
                .bind(tournament_id)
                .fetch_one(&mut *tx)
                .await?;
                let tournament = tournament_from_row(&row)?;
                tx.commit().await?;
                return Ok(tournament);
            }

            for participant in &roster {
                let won = i32::from(participant.state.position() == Some(1));
                sqlx::query(
                    r#"
                    UPDATE users
                    SET tournaments_played = tournaments_played + 1,
                        tournaments_won = tournaments_won + $2
                    WHERE id = $1
                    "#,
                )
                .bind(participant.user_id)
                .bind(won)
                .execute(&mut *tx)
                .await?;
            }

            let row = sqlx::query(
                r#"
                UPDATE tournaments
                SET status = 'completed', ended_at = NOW(), settlement_claimed_at = NULL
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(tournament_id)
            .fetch_one(&mut *tx)
            .await?;
            let tournament = tournament_from_row(&row)?;
            tx.commit().await?;
            Ok(tournament)
        })
        .await
    }

    async fn cancel_tournament(
        &self,
        tournament_id: TournamentId,
    ) -> TournamentResult<(Tournament, Vec<Participant>)> {
        self.run("cancel_tournament", move || async move {
            let mut tx = self.pool.begin().await?;
            let mut tournament = lock_tournament(&mut tx, tournament_id).await?;
            let mut roster = active_roster(&mut tx, tournament_id).await?;

            if tournament.status != TournamentStatus::Cancelled {
                rules::check_cancel(&tournament)?;
                let refund = ParticipantState::Refunded {
                    refund: Disbursement::Pending,
                };
                for participant in &mut roster {
                    *participant = write_state(&mut tx, participant.id, &refund).await?;
                }
                let row = sqlx::query(
                    "UPDATE tournaments SET status = 'cancelled', ended_at = NOW() WHERE id = $1 RETURNING *",
                )
                .bind(tournament_id)
                .fetch_one(&mut *tx)
                .await?;
                tournament = tournament_from_row(&row)?;
            }

            tx.commit().await?;
            Ok((tournament, roster))
        })
        .await
    }

    async fn refund(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<DisbursementResult> {
        self.run("refund", move || async move {
            let mut tx = self.pool.begin().await?;
            let tournament = lock_tournament(&mut tx, tournament_id).await?;
            let participant = participant_or_missing(&mut tx, tournament_id, user_id).await?;
            let ParticipantState::Refunded { refund } = participant.state else {
                return Err(TournamentError::InvalidState {
                    expected: TournamentStatus::Cancelled,
                    actual: tournament.status,
                });
            };
            if !refund.is_outstanding() {
                tx.commit().await?;
                return Ok(DisbursementResult {
                    user_id,
                    amount: tournament.entry_fee,
                    state: refund,
                });
            }

            let credit = Posting::new(
                user_id,
                tournament.entry_fee,
                TransactionType::TournamentFee,
                format!("Refund for cancelled tournament {}", tournament.title),
            )
            .for_tournament(tournament_id);
            let credit = post_in(&mut tx, &credit, EntryDirection::Credit).await?;
            let paid = Disbursement::Paid {
                transaction_id: credit.id,
            };
            write_state(&mut tx, participant.id, &ParticipantState::Refunded { refund: paid })
                .await?;

            tx.commit().await?;
            Ok(DisbursementResult {
                user_id,
                amount: tournament.entry_fee,
                state: paid,
            })
        })
        .await
    }

    async fn record_disbursement_failure(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<DisbursementResult> {
        self.run("record_disbursement_failure", move || async move {
            let mut tx = self.pool.begin().await?;
            let tournament = lock_tournament(&mut tx, tournament_id).await?;
            let participant = participant_or_missing(&mut tx, tournament_id, user_id).await?;

            let bump = |d: Disbursement| {
                if d.is_outstanding() {
                    Disbursement::Failed {
                        attempts: d.attempts() + 1,
                    }
                } else {
                    d
                }
            };
            let (amount, next) = match participant.state {
                ParticipantState::Ranked {
                    score,
                    position,
                    winnings,
                    payout,
                } => (
                    winnings,
                    ParticipantState::Ranked {
                        score,
                        position,
                        winnings,
                        payout: bump(payout),
                    },
                ),
                ParticipantState::Refunded { refund } => (
                    tournament.entry_fee,
                    ParticipantState::Refunded {
                        refund: bump(refund),
                    },
                ),
                _ => return Err(TournamentError::NotParticipant(user_id)),
            };
            let updated = write_state(&mut tx, participant.id, &next).await?;
            tx.commit().await?;

            let state = match updated.state {
                ParticipantState::Ranked { payout, .. } => payout,
                ParticipantState::Refunded { refund } => refund,
                _ => Disbursement::NotDue,
            };
            Ok(DisbursementResult {
                user_id,
                amount,
                state,
            })
        })
        .await
    }
}
