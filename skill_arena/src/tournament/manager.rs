//! Tournament lifecycle manager.
//!
//! Drives a tournament through `created -> registration -> in_progress ->
//! completed` (or `cancelled`). Each step that moves money is delegated to
//! the storage backend as one atomic unit; settlement and cancellation then
//! disburse per participant so one failing credit never blocks the others.

use super::{
    errors::{TournamentError, TournamentResult},
    models::{
        Admission, CancellationReport, Departure, Disbursement, DisbursementResult, NewTournament,
        Participant, ParticipantState, ScoreSubmission, SettlementClaim, SettlementReport, Standing,
        Tournament, TournamentDraft, TournamentId, TournamentStatus,
    },
    rules,
};
use crate::config::ArenaConfig;
use crate::db::ArenaStore;
use crate::prize::PrizeCalculator;
use crate::scoring::{ScoreValidator, ScoreVerdict, Telemetry};
use crate::wallet::UserId;
use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;

/// Tournament manager
#[derive(Clone)]
pub struct TournamentManager {
    store: Arc<dyn ArenaStore>,
    config: Arc<ArenaConfig>,
    calculator: PrizeCalculator,
    validator: ScoreValidator,
}

impl TournamentManager {
    /// Create a new tournament manager
    ///
    /// # Arguments
    ///
    /// * `store` - Storage backend shared with the wallet manager
    /// * `config` - Commission tiers, scoring rules and retry settings
    pub fn new(store: Arc<dyn ArenaStore>, config: Arc<ArenaConfig>) -> Self {
        let calculator = PrizeCalculator::new(config.commission_tiers.clone());
        let validator = ScoreValidator::new(config.scoring.clone());
        Self {
            store,
            config,
            calculator,
            validator,
        }
    }

    pub fn calculator(&self) -> &PrizeCalculator {
        &self.calculator
    }

    /// Create a tournament and open registration
    ///
    /// The prize pool, commission and distribution are fixed here and never
    /// recomputed.
    ///
    /// # Errors
    ///
    /// * `InvalidEntryFee` - Fee not positive or finer than cents
    /// * `InvalidCapacity` - Bad participant bounds for the format
    pub async fn create(
        &self,
        creator_id: UserId,
        draft: TournamentDraft,
    ) -> TournamentResult<Tournament> {
        rules::check_draft(&draft)?;

        let breakdown = self
            .calculator
            .breakdown(draft.entry_fee, draft.max_participants)
            .ok_or(TournamentError::InvalidEntryFee)?;
        let new_tournament = NewTournament {
            creator_id,
            prize_distribution: self.calculator.distribution_table(draft.tournament_type),
            prize_pool: breakdown.prize_pool,
            platform_commission: breakdown.platform_commission,
            draft,
        };
        let tournament = self.store.create_tournament(&new_tournament).await?;

        log::info!(
            "Created tournament {} '{}' ({}, fee {}, pool {}, commission {})",
            tournament.id,
            tournament.title,
            tournament.tournament_type,
            tournament.entry_fee,
            tournament.prize_pool,
            tournament.platform_commission
        );
        Ok(tournament)
    }

    /// Charge the entry fee and admit a user
    ///
    /// # Errors
    ///
    /// * `TournamentNotFound`, `NotOpenForRegistration`, `TournamentFull`, `AlreadyJoined`
    /// * `Wallet(InsufficientFunds)` - Balance below the entry fee
    pub async fn join(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<Admission> {
        let admission = self.store.admit(tournament_id, user_id).await?;
        log::info!(
            "User {} joined tournament {} ({}/{})",
            user_id,
            tournament_id,
            admission.tournament.participant_count,
            admission.tournament.max_participants
        );
        if admission.started {
            log::info!("Tournament {} started", tournament_id);
        }
        Ok(admission)
    }

    /// Leave during registration; the entry fee is refunded
    pub async fn leave(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> TournamentResult<Departure> {
        let departure = self.store.depart(tournament_id, user_id).await?;
        log::info!(
            "User {} left tournament {}, refunded {}",
            user_id,
            tournament_id,
            departure.tournament.entry_fee
        );
        Ok(departure)
    }

    /// Validate telemetry and record the resulting score
    ///
    /// When this was the last outstanding score, settlement runs before
    /// returning.
    ///
    /// # Errors
    ///
    /// * `NotInProgress` - The tournament has not started or is over
    /// * `InvalidScoreSubmission` - Telemetry rejected; nothing is recorded
    /// * `NotParticipant`, `ScoreAlreadySubmitted`
    pub async fn submit_score(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        telemetry: &Telemetry,
    ) -> TournamentResult<ScoreSubmission> {
        let tournament = self.store.get_tournament(tournament_id).await?;
        if tournament.status != TournamentStatus::InProgress {
            return Err(TournamentError::NotInProgress(tournament_id));
        }

        let score = match self.validator.validate(tournament.game_type, telemetry) {
            ScoreVerdict::Accepted { score } => score,
            ScoreVerdict::Rejected { rejection } => {
                log::warn!(
                    "Rejected {} telemetry from user {} in tournament {}: {}",
                    tournament.game_type,
                    user_id,
                    tournament_id,
                    rejection
                );
                return Err(TournamentError::InvalidScoreSubmission(rejection));
            }
        };

        let recorded = self.store.record_score(tournament_id, user_id, score).await?;
        log::info!(
            "User {} scored {:.2} in tournament {}",
            user_id,
            score,
            tournament_id
        );

        let settlement = if recorded.all_submitted {
            match self.settle(tournament_id).await {
                Ok(report) => Some(report),
                Err(e) => {
                    // The score is committed; a later settle call picks this up
                    log::error!("Auto-settlement of tournament {} failed: {}", tournament_id, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(ScoreSubmission {
            participant: recorded.participant,
            settlement,
        })
    }

    /// Rank, pay out and complete a tournament
    ///
    /// Safe to call repeatedly: a completed tournament is a no-op, and a run
    /// that left payouts outstanding is resumed, retrying only the unpaid ones.
    ///
    /// # Errors
    ///
    /// * `InvalidState` - The tournament is not in progress
    /// * `ScoresPending` - Some active participant has no score yet
    pub async fn settle(&self, tournament_id: TournamentId) -> TournamentResult<SettlementReport> {
        let claim = self
            .store
            .claim_settlement(tournament_id, self.config.settlement_lease, Utc::now())
            .await?;
        let participants = match claim {
            SettlementClaim::AlreadySettled { tournament } => {
                log::debug!("Tournament {} already settled", tournament_id);
                return Ok(SettlementReport::AlreadySettled { tournament });
            }
            SettlementClaim::Busy => {
                log::info!("Tournament {} is being settled by another run", tournament_id);
                return Ok(SettlementReport::InProgress { tournament_id });
            }
            SettlementClaim::Claimed { participants, .. } => participants,
        };
        log::info!(
            "Settling tournament {} with {} participants",
            tournament_id,
            participants.len()
        );

        let mut failed = Vec::new();
        for participant in &participants {
            let ParticipantState::Ranked {
                payout, winnings, ..
            } = participant.state
            else {
                continue;
            };
            if !payout.is_outstanding() {
                continue;
            }
            let user_id = participant.user_id;
            let paid = self
                .disburse("payout", tournament_id, user_id, || {
                    self.store.pay_out(tournament_id, user_id)
                })
                .await;
            if let Err(e) = paid {
                log::error!(
                    "Payout to user {} in tournament {} failed: {}",
                    user_id,
                    tournament_id,
                    e
                );
                failed.push(
                    self.record_failure(tournament_id, user_id, winnings, payout)
                        .await,
                );
            }
        }

        let tournament = self.store.close_settlement(tournament_id).await?;
        let standings = standings(&self.store.participants(tournament_id).await?);

        if tournament.status == TournamentStatus::Completed {
            log::info!(
                "Tournament {} completed; winner {:?}",
                tournament_id,
                standings.first().map(|s| s.user_id)
            );
            Ok(SettlementReport::Completed {
                tournament,
                standings,
            })
        } else {
            log::warn!(
                "Tournament {} has {} outstanding payouts",
                tournament_id,
                failed.len()
            );
            Ok(SettlementReport::PayoutsOutstanding {
                tournament,
                standings,
                failed,
            })
        }
    }

    /// Cancel before the start and refund every active participant
    ///
    /// Calling it again on a cancelled tournament retries refunds that failed.
    ///
    /// # Errors
    ///
    /// * `InvalidState` - The tournament already started or completed
    pub async fn cancel(&self, tournament_id: TournamentId) -> TournamentResult<CancellationReport> {
        let (tournament, participants) = self.store.cancel_tournament(tournament_id).await?;
        log::info!(
            "Tournament {} cancelled, refunding {} participants",
            tournament_id,
            participants.len()
        );

        let mut refunds = Vec::with_capacity(participants.len());
        for participant in &participants {
            let ParticipantState::Refunded { refund } = participant.state else {
                continue;
            };
            let user_id = participant.user_id;
            if !refund.is_outstanding() {
                refunds.push(DisbursementResult {
                    user_id,
                    amount: tournament.entry_fee,
                    state: refund,
                });
                continue;
            }
            let result = self
                .disburse("refund", tournament_id, user_id, || {
                    self.store.refund(tournament_id, user_id)
                })
                .await;
            match result {
                Ok(done) => refunds.push(done),
                Err(e) => {
                    log::error!(
                        "Refund to user {} in tournament {} failed: {}",
                        user_id,
                        tournament_id,
                        e
                    );
                    refunds.push(
                        self.record_failure(tournament_id, user_id, tournament.entry_fee, refund)
                            .await,
                    );
                }
            }
        }

        Ok(CancellationReport {
            tournament,
            refunds,
        })
    }

    pub async fn get(&self, tournament_id: TournamentId) -> TournamentResult<Tournament> {
        self.store.get_tournament(tournament_id).await
    }

    /// Tournaments, newest first, optionally filtered by status
    pub async fn list(
        &self,
        status: Option<TournamentStatus>,
        limit: i64,
    ) -> TournamentResult<Vec<Tournament>> {
        self.store.list_tournaments(status, limit).await
    }

    /// Participant rows ordered by join time, including departed ones
    pub async fn participants(
        &self,
        tournament_id: TournamentId,
    ) -> TournamentResult<Vec<Participant>> {
        self.store.participants(tournament_id).await
    }

    pub async fn user_tournaments(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> TournamentResult<Vec<Tournament>> {
        self.store.user_tournaments(user_id, limit).await
    }

    /// One payout or refund with the configured bounded retry
    /// Persist a failed disbursement attempt
    ///
    /// A storage error here is only logged: the run goes on with the next
    /// participant and still closes its settlement claim.
    async fn record_failure(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        amount: Decimal,
        previous: Disbursement,
    ) -> DisbursementResult {
        match self
            .store
            .record_disbursement_failure(tournament_id, user_id)
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => {
                log::error!(
                    "Could not record failed disbursement to user {} in tournament {}: {}",
                    user_id,
                    tournament_id,
                    e
                );
                DisbursementResult {
                    user_id,
                    amount,
                    state: Disbursement::Failed {
                        attempts: previous.attempts() + 1,
                    },
                }
            }
        }
    }

    async fn disburse<F, Fut>(
        &self,
        label: &str,
        tournament_id: TournamentId,
        user_id: UserId,
        mut attempt: F,
    ) -> TournamentResult<DisbursementResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TournamentResult<DisbursementResult>>,
    {
        let policy = self.config.payout_retry;
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt().await {
                Ok(result) => return Ok(result),
                Err(e) if tries < policy.max_attempts => {
                    log::warn!(
                        "{label} to user {user_id} in tournament {tournament_id} failed (attempt {tries}): {e}"
                    );
                    tokio::time::sleep(policy.delay_for(tries)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Standings from ranked participants, by position
fn standings(participants: &[Participant]) -> Vec<Standing> {
    let mut standings: Vec<Standing> = participants
        .iter()
        .filter(|p| p.is_active)
        .filter_map(|p| match p.state {
            ParticipantState::Ranked {
                score,
                position,
                winnings,
                ..
            } => Some(Standing {
                user_id: p.user_id,
                position,
                score,
                winnings,
            }),
            _ => None,
        })
        .collect();
    standings.sort_by_key(|s| s.position);
    standings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::db::MemoryStore;
    use crate::scoring::GameType;
    use crate::tournament::Disbursement;
    use crate::wallet::{TransactionType, WalletError, WalletManager};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        wallets: WalletManager,
        tournaments: TournamentManager,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(ArenaConfig {
            payout_retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
            ..ArenaConfig::default()
        });
        Fixture {
            wallets: WalletManager::new(store.clone(), config.clone()),
            tournaments: TournamentManager::new(store.clone(), config),
            store,
        }
    }

    async fn funded_user(wallets: &WalletManager, external_id: i64, amount: Decimal) -> UserId {
        let user = wallets.register_user(external_id, None, None).await.unwrap();
        wallets
            .credit(user.id, amount, TransactionType::Deposit, "seed", None)
            .await
            .unwrap();
        user.id
    }

    fn clicks(clicks: u32) -> Telemetry {
        Telemetry::Clicker {
            clicks,
            start_time: 0.0,
            end_time: 10.0,
        }
    }

    #[tokio::test]
    async fn test_create_fixes_money_split() {
        let f = fixture();
        let creator = funded_user(&f.wallets, 1, dec!(0.01)).await;
        let tournament = f
            .tournaments
            .create(creator, TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
            .await
            .unwrap();

        assert_eq!(tournament.status, TournamentStatus::Registration);
        assert_eq!(tournament.prize_pool, dec!(160.00));
        assert_eq!(tournament.platform_commission, dec!(40.00));
    }

    #[tokio::test]
    async fn test_rejected_telemetry_leaves_score_unset() {
        let f = fixture();
        let a = funded_user(&f.wallets, 1, dec!(100)).await;
        let b = funded_user(&f.wallets, 2, dec!(100)).await;
        let t = f
            .tournaments
            .create(a, TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
            .await
            .unwrap();
        f.tournaments.join(t.id, a).await.unwrap();
        f.tournaments.join(t.id, b).await.unwrap();

        let result = f.tournaments.submit_score(t.id, a, &clicks(500)).await;
        assert!(matches!(result, Err(TournamentError::InvalidScoreSubmission(_))));

        let participants = f.tournaments.participants(t.id).await.unwrap();
        assert!(participants.iter().all(|p| !p.has_score()));
    }

    #[tokio::test]
    async fn test_last_score_triggers_settlement() {
        let f = fixture();
        let a = funded_user(&f.wallets, 1, dec!(100)).await;
        let b = funded_user(&f.wallets, 2, dec!(100)).await;
        let t = f
            .tournaments
            .create(a, TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
            .await
            .unwrap();
        f.tournaments.join(t.id, a).await.unwrap();
        f.tournaments.join(t.id, b).await.unwrap();

        let first = f.tournaments.submit_score(t.id, a, &clicks(50)).await.unwrap();
        assert!(first.settlement.is_none());
        let last = f.tournaments.submit_score(t.id, b, &clicks(120)).await.unwrap();

        let Some(SettlementReport::Completed { standings, .. }) = last.settlement else {
            panic!("expected completed settlement, got {:?}", last.settlement);
        };
        assert_eq!(standings[0].user_id, b);
        assert_eq!(standings[0].winnings, dec!(144.00));
        assert_eq!(f.wallets.get_user(b).await.unwrap().balance, dec!(144.00));
        assert_eq!(f.wallets.get_user(b).await.unwrap().tournaments_won, 1);

        let again = f.tournaments.settle(t.id).await.unwrap();
        assert!(matches!(again, SettlementReport::AlreadySettled { .. }));
        assert_eq!(f.wallets.get_user(b).await.unwrap().balance, dec!(144.00));
    }

    #[tokio::test]
    async fn test_failed_payout_resumed_by_next_settle() {
        let f = fixture();
        let a = funded_user(&f.wallets, 1, dec!(100)).await;
        let b = funded_user(&f.wallets, 2, dec!(100)).await;
        let t = f
            .tournaments
            .create(a, TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
            .await
            .unwrap();
        f.tournaments.join(t.id, a).await.unwrap();
        f.tournaments.join(t.id, b).await.unwrap();

        // Outlasts both attempts of the first run
        f.store.inject_credit_failures(a, 2).await;
        f.tournaments.submit_score(t.id, b, &clicks(50)).await.unwrap();
        let last = f.tournaments.submit_score(t.id, a, &clicks(120)).await.unwrap();

        let Some(SettlementReport::PayoutsOutstanding { tournament, failed, .. }) = last.settlement
        else {
            panic!("expected outstanding payouts, got {:?}", last.settlement);
        };
        assert_eq!(tournament.status, TournamentStatus::InProgress);
        assert_eq!(failed[0].state, Disbursement::Failed { attempts: 1 });
        assert_eq!(f.wallets.get_user(a).await.unwrap().balance, Decimal::ZERO);

        let report = f.tournaments.settle(t.id).await.unwrap();
        assert!(matches!(report, SettlementReport::Completed { .. }));
        assert_eq!(f.wallets.get_user(a).await.unwrap().balance, dec!(144.00));
    }

    #[tokio::test]
    async fn test_cancel_refunds_once() {
        let f = fixture();
        let a = funded_user(&f.wallets, 1, dec!(100)).await;
        let t = f
            .tournaments
            .create(a, TournamentDraft::group("Cup", GameType::Reaction, dec!(100), 4))
            .await
            .unwrap();
        f.tournaments.join(t.id, a).await.unwrap();

        let report = f.tournaments.cancel(t.id).await.unwrap();
        assert!(report.all_refunded());
        let again = f.tournaments.cancel(t.id).await.unwrap();
        assert!(again.all_refunded());
        assert_eq!(f.wallets.get_user(a).await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn test_join_without_funds() {
        let f = fixture();
        let a = funded_user(&f.wallets, 1, dec!(10)).await;
        let t = f
            .tournaments
            .create(a, TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
            .await
            .unwrap();
        let result = f.tournaments.join(t.id, a).await;
        assert!(matches!(
            result,
            Err(TournamentError::Wallet(WalletError::InsufficientFunds { .. }))
        ));
        assert_eq!(f.tournaments.get(t.id).await.unwrap().participant_count, 0);
    }

    #[tokio::test]
    async fn test_unrecorded_payout_failure_still_pays_others_and_releases_claim() {
        let f = fixture();
        let a = funded_user(&f.wallets, 1, dec!(100)).await;
        let b = funded_user(&f.wallets, 2, dec!(100)).await;
        let c = funded_user(&f.wallets, 3, dec!(100)).await;
        let t = f
            .tournaments
            .create(a, TournamentDraft::group("Trio", GameType::Clicker, dec!(100), 3))
            .await
            .unwrap();
        for user in [a, b, c] {
            f.tournaments.join(t.id, user).await.unwrap();
        }

        f.store.inject_credit_failures(a, 2).await;
        f.store.inject_record_failures(a, 1).await;
        f.tournaments.submit_score(t.id, c, &clicks(60)).await.unwrap();
        f.tournaments.submit_score(t.id, b, &clicks(120)).await.unwrap();
        let last = f.tournaments.submit_score(t.id, a, &clicks(150)).await.unwrap();

        let Some(SettlementReport::PayoutsOutstanding { failed, .. }) = last.settlement else {
            panic!("expected outstanding payouts, got {:?}", last.settlement);
        };
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].user_id, a);
        assert_eq!(failed[0].state, Disbursement::Failed { attempts: 1 });
        // Pool 240 split 50/30/20
        assert_eq!(f.wallets.get_user(b).await.unwrap().balance, dec!(72.00));
        assert_eq!(f.wallets.get_user(c).await.unwrap().balance, dec!(48.00));

        // The claim was closed, so the next run is not refused as busy
        let report = f.tournaments.settle(t.id).await.unwrap();
        assert!(matches!(report, SettlementReport::Completed { .. }));
        assert_eq!(f.wallets.get_user(a).await.unwrap().balance, dec!(120.00));
    }

    #[tokio::test]
    async fn test_unrecorded_refund_failure_keeps_refunding() {
        let f = fixture();
        let a = funded_user(&f.wallets, 1, dec!(100)).await;
        let b = funded_user(&f.wallets, 2, dec!(100)).await;
        let t = f
            .tournaments
            .create(a, TournamentDraft::group("Cup", GameType::Reaction, dec!(100), 4))
            .await
            .unwrap();
        f.tournaments.join(t.id, a).await.unwrap();
        f.tournaments.join(t.id, b).await.unwrap();

        f.store.inject_credit_failures(a, 2).await;
        f.store.inject_record_failures(a, 1).await;
        let report = f.tournaments.cancel(t.id).await.unwrap();

        assert_eq!(report.refunds.len(), 2);
        let owed = report.refunds.iter().find(|r| r.user_id == a).unwrap();
        assert_eq!(owed.state, Disbursement::Failed { attempts: 1 });
        assert_eq!(owed.amount, dec!(100));
        assert_eq!(f.wallets.get_user(b).await.unwrap().balance, dec!(100));

        let retry = f.tournaments.cancel(t.id).await.unwrap();
        assert!(retry.all_refunded());
        assert_eq!(f.wallets.get_user(a).await.unwrap().balance, dec!(100));
    }
}
