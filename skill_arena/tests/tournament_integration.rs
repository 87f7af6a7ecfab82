//! Integration tests for the tournament lifecycle.
//!
//! Covers creation, admission and auto-start, leaving and rejoining, score
//! validation, settlement and cancellation against the in-memory backend.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skill_arena::ArenaConfig;
use skill_arena::db::MemoryStore;
use skill_arena::scoring::{GameType, Telemetry};
use skill_arena::tournament::{
    Disbursement, ParticipantState, SettlementReport, Tournament, TournamentDraft,
    TournamentError, TournamentManager, TournamentStatus,
};
use skill_arena::wallet::{TransactionType, UserId, WalletError, WalletManager};
use std::sync::Arc;

struct Harness {
    wallets: WalletManager,
    tournaments: TournamentManager,
}

fn setup() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let config = Arc::new(ArenaConfig::default());
    Harness {
        wallets: WalletManager::new(store.clone(), config.clone()),
        tournaments: TournamentManager::new(store, config),
    }
}

impl Harness {
    async fn players(&self, count: usize, funds: Decimal) -> Vec<UserId> {
        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            let user = self
                .wallets
                .register_user(1000 + n as i64, Some(format!("player{n}")), None)
                .await
                .expect("registration should succeed");
            self.wallets
                .credit(user.id, funds, TransactionType::Deposit, "seed", None)
                .await
                .expect("seed credit should succeed");
            ids.push(user.id);
        }
        ids
    }

    async fn balance(&self, user_id: UserId) -> Decimal {
        self.wallets.get_user(user_id).await.unwrap().balance
    }

    async fn create(&self, creator: UserId, draft: TournamentDraft) -> Tournament {
        self.tournaments
            .create(creator, draft)
            .await
            .expect("creation should succeed")
    }
}

/// Valid clicker round; score is clicks per second × 100
fn clicker(clicks: u32) -> Telemetry {
    Telemetry::Clicker {
        clicks,
        start_time: 1_700_000_000.0,
        end_time: 1_700_000_010.0,
    }
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_scenario_a_duel_pool() {
    let h = setup();
    let players = h.players(1, Decimal::ZERO).await;
    let tournament = h
        .create(players[0], TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
        .await;

    assert_eq!(tournament.prize_pool, dec!(160.00));
    assert_eq!(tournament.platform_commission, dec!(40.00));
    assert_eq!(
        tournament.prize_pool + tournament.platform_commission,
        tournament.entry_fee * Decimal::from(tournament.max_participants)
    );
}

#[tokio::test]
async fn test_invalid_drafts_rejected() {
    let h = setup();
    let creator = h.players(1, Decimal::ZERO).await[0];

    let mut duel = TournamentDraft::duel("Duel", GameType::Clicker, dec!(100));
    duel.max_participants = 3;
    assert!(matches!(
        h.tournaments.create(creator, duel).await,
        Err(TournamentError::InvalidCapacity(_))
    ));

    let free = TournamentDraft::group("Free", GameType::Clicker, dec!(0), 4);
    assert!(matches!(
        h.tournaments.create(creator, free).await,
        Err(TournamentError::InvalidEntryFee)
    ));

    let inverted = TournamentDraft::marathon("Inverted", GameType::Reaction, dec!(5), 10, 4);
    assert!(matches!(
        h.tournaments.create(creator, inverted).await,
        Err(TournamentError::InvalidCapacity(_))
    ));
    assert!(h.tournaments.list(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_entry_fee_rejected() {
    let h = setup();
    let creator = h.players(1, Decimal::ZERO).await[0];

    let huge = TournamentDraft::group(
        "Huge",
        GameType::Clicker,
        dec!(10000000000000000000000000000),
        10,
    );
    assert!(matches!(
        h.tournaments.create(creator, huge).await,
        Err(TournamentError::InvalidEntryFee)
    ));

    // Each fee fits, but the field's gross amount does not
    let wide = TournamentDraft::marathon("Wide", GameType::Clicker, dec!(900000000000), 2, 10);
    assert!(matches!(
        h.tournaments.create(creator, wide).await,
        Err(TournamentError::InvalidEntryFee)
    ));
    assert!(h.tournaments.list(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_creator_rejected() {
    let h = setup();
    let result = h
        .tournaments
        .create(42, TournamentDraft::duel("Duel", GameType::Clicker, dec!(10)))
        .await;
    assert!(matches!(
        result,
        Err(TournamentError::Wallet(WalletError::UserNotFound(42)))
    ));
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_join_charges_fee_and_auto_starts() {
    let h = setup();
    let p = h.players(3, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::marathon("Open", GameType::Clicker, dec!(25), 2, 3))
        .await;

    let first = h.tournaments.join(t.id, p[0]).await.unwrap();
    assert!(!first.started);
    assert_eq!(h.balance(p[0]).await, dec!(75));

    let second = h.tournaments.join(t.id, p[1]).await.unwrap();
    assert!(second.started);
    assert_eq!(second.tournament.status, TournamentStatus::InProgress);
    assert!(second.tournament.started_at.is_some());

    let late = h.tournaments.join(t.id, p[2]).await;
    assert!(matches!(late, Err(TournamentError::NotOpenForRegistration(_))));
    assert_eq!(h.balance(p[2]).await, dec!(100));
}

#[tokio::test]
async fn test_join_after_last_seat_is_tournament_full() {
    let h = setup();
    let p = h.players(5, dec!(100)).await;

    let duel = h
        .create(p[0], TournamentDraft::duel("Duel", GameType::Clicker, dec!(10)))
        .await;
    h.tournaments.join(duel.id, p[0]).await.unwrap();
    assert!(h.tournaments.join(duel.id, p[1]).await.unwrap().started);
    let extra = h.tournaments.join(duel.id, p[2]).await;
    assert!(matches!(extra, Err(TournamentError::TournamentFull)));
    let seated = h.tournaments.join(duel.id, p[0]).await;
    assert!(matches!(seated, Err(TournamentError::AlreadyJoined)));

    let marathon = h
        .create(p[0], TournamentDraft::marathon("Three", GameType::Clicker, dec!(10), 3, 3))
        .await;
    for &user in &p[..3] {
        h.tournaments.join(marathon.id, user).await.unwrap();
    }
    let extra = h.tournaments.join(marathon.id, p[4]).await;
    assert!(matches!(extra, Err(TournamentError::TournamentFull)));
    assert_eq!(h.balance(p[4]).await, dec!(100));
}

#[tokio::test]
async fn test_double_join_rejected() {
    let h = setup();
    let p = h.players(1, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::group("Cup", GameType::Clicker, dec!(10), 4))
        .await;

    h.tournaments.join(t.id, p[0]).await.unwrap();
    let again = h.tournaments.join(t.id, p[0]).await;
    assert!(matches!(again, Err(TournamentError::AlreadyJoined)));
    assert_eq!(h.balance(p[0]).await, dec!(90));
}

#[tokio::test]
async fn test_leave_and_rejoin_charges_twice_refunds_once() {
    let h = setup();
    let p = h.players(1, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::group("Cup", GameType::Clicker, dec!(30), 4))
        .await;

    h.tournaments.join(t.id, p[0]).await.unwrap();
    let departure = h.tournaments.leave(t.id, p[0]).await.unwrap();
    assert!(!departure.participant.is_active);
    assert_eq!(departure.tournament.participant_count, 0);
    assert_eq!(h.balance(p[0]).await, dec!(100));

    let rejoin = h.tournaments.join(t.id, p[0]).await.unwrap();
    assert_eq!(rejoin.participant.id, departure.participant.id);
    assert_eq!(rejoin.participant.state, ParticipantState::NotSubmitted);
    assert_eq!(h.balance(p[0]).await, dec!(70));

    let log = h.wallets.transactions(p[0], 10, 0).await.unwrap();
    let fees = log
        .iter()
        .filter(|tx| tx.transaction_type == TransactionType::TournamentFee)
        .count();
    assert_eq!(fees, 3);
    assert!(h.wallets.audit(p[0]).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_leave_after_start_rejected() {
    let h = setup();
    let p = h.players(2, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::duel("Duel", GameType::Clicker, dec!(50)))
        .await;
    h.tournaments.join(t.id, p[0]).await.unwrap();
    h.tournaments.join(t.id, p[1]).await.unwrap();

    let result = h.tournaments.leave(t.id, p[0]).await;
    assert!(matches!(result, Err(TournamentError::NotOpenForRegistration(_))));
}

// ============================================================================
// Scores and settlement
// ============================================================================

#[tokio::test]
async fn test_scenario_a_duel_settlement() {
    let h = setup();
    let p = h.players(2, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
        .await;
    h.tournaments.join(t.id, p[0]).await.unwrap();
    h.tournaments.join(t.id, p[1]).await.unwrap();

    // Scores 500 and 300
    h.tournaments.submit_score(t.id, p[1], &clicker(30)).await.unwrap();
    let last = h.tournaments.submit_score(t.id, p[0], &clicker(50)).await.unwrap();

    let Some(SettlementReport::Completed { tournament, standings }) = last.settlement else {
        panic!("expected completion, got {:?}", last.settlement);
    };
    assert_eq!(tournament.status, TournamentStatus::Completed);
    assert!(tournament.ended_at.is_some());
    assert_eq!(standings.len(), 2);
    assert_eq!((standings[0].user_id, standings[0].winnings), (p[0], dec!(144.00)));
    assert_eq!((standings[1].user_id, standings[1].winnings), (p[1], Decimal::ZERO));

    assert_eq!(h.balance(p[0]).await, dec!(144.00));
    assert_eq!(h.balance(p[1]).await, Decimal::ZERO);

    let winner = h.wallets.get_user(p[0]).await.unwrap();
    assert_eq!(winner.tournaments_played, 1);
    assert_eq!(winner.tournaments_won, 1);
    assert_eq!(winner.games_played, 1);
    assert_eq!(winner.total_winnings, dec!(144.00));
}

#[tokio::test]
async fn test_scenario_b_group_payouts() {
    let h = setup();
    let p = h.players(8, dec!(50)).await;
    let t = h
        .create(p[0], TournamentDraft::group("Eight", GameType::Clicker, dec!(50), 8))
        .await;
    assert_eq!(t.prize_pool, dec!(320.00));

    for &user in &p {
        h.tournaments.join(t.id, user).await.unwrap();
    }
    for (n, &user) in p.iter().enumerate() {
        h.tournaments
            .submit_score(t.id, user, &clicker(100 + n as u32 * 10))
            .await
            .unwrap();
    }

    let tournament = h.tournaments.get(t.id).await.unwrap();
    assert_eq!(tournament.status, TournamentStatus::Completed);

    // Last player scored highest
    assert_eq!(h.balance(p[7]).await, dec!(160.00));
    assert_eq!(h.balance(p[6]).await, dec!(96.00));
    assert_eq!(h.balance(p[5]).await, dec!(64.00));
    for &user in &p[..5] {
        assert_eq!(h.balance(user).await, Decimal::ZERO);
    }
}

#[tokio::test]
async fn test_marathon_range_split_among_filled_ranks() {
    let h = setup();
    let p = h.players(5, dec!(10)).await;
    let t = h
        .create(p[0], TournamentDraft::marathon("Long", GameType::Clicker, dec!(10), 5, 20))
        .await;
    assert_eq!(t.prize_pool, dec!(160.00));

    for &user in &p {
        h.tournaments.join(t.id, user).await.unwrap();
    }
    for (n, &user) in p.iter().enumerate() {
        h.tournaments
            .submit_score(t.id, user, &clicker(150 - n as u32 * 10))
            .await
            .unwrap();
    }

    let paid: Vec<Decimal> = {
        let mut v = Vec::new();
        for &user in &p {
            v.push(h.balance(user).await);
        }
        v
    };
    assert_eq!(
        paid,
        vec![dec!(64.00), dec!(40.00), dec!(24.00), dec!(16.00), dec!(16.00)]
    );
}

#[tokio::test]
async fn test_tie_goes_to_earlier_join() {
    let h = setup();
    let p = h.players(2, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::duel("Tie", GameType::Clicker, dec!(100)))
        .await;
    h.tournaments.join(t.id, p[1]).await.unwrap();
    h.tournaments.join(t.id, p[0]).await.unwrap();

    h.tournaments.submit_score(t.id, p[0], &clicker(80)).await.unwrap();
    h.tournaments.submit_score(t.id, p[1], &clicker(80)).await.unwrap();

    assert_eq!(h.balance(p[1]).await, dec!(144.00));
    assert_eq!(h.balance(p[0]).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_scenario_c_rejected_clicker_keeps_score_unset() {
    let h = setup();
    let p = h.players(2, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
        .await;
    h.tournaments.join(t.id, p[0]).await.unwrap();
    h.tournaments.join(t.id, p[1]).await.unwrap();

    let slow = Telemetry::Clicker {
        clicks: 5,
        start_time: 0.0,
        end_time: 10.2,
    };
    let result = h.tournaments.submit_score(t.id, p[0], &slow).await;
    assert!(matches!(result, Err(TournamentError::InvalidScoreSubmission(_))));

    let participants = h.tournaments.participants(t.id).await.unwrap();
    let entry = participants.iter().find(|x| x.user_id == p[0]).unwrap();
    assert_eq!(entry.state, ParticipantState::NotSubmitted);

    // A valid retry is still accepted
    h.tournaments.submit_score(t.id, p[0], &clicker(60)).await.unwrap();
}

#[tokio::test]
async fn test_scenario_e_reaction_score() {
    let h = setup();
    let p = h.players(2, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::duel("React", GameType::Reaction, dec!(100)))
        .await;
    h.tournaments.join(t.id, p[0]).await.unwrap();
    h.tournaments.join(t.id, p[1]).await.unwrap();

    let mut attempts = vec![350.0; 9];
    attempts.push(50.0);
    let submission = h
        .tournaments
        .submit_score(t.id, p[0], &Telemetry::Reaction { attempts })
        .await
        .unwrap();

    let score = submission.participant.state.score().unwrap();
    assert!((score - 585.0).abs() < 1e-9, "score was {score}");
}

#[tokio::test]
async fn test_wrong_game_telemetry_rejected() {
    let h = setup();
    let p = h.players(2, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::duel("Duel", GameType::TileMerge, dec!(100)))
        .await;
    h.tournaments.join(t.id, p[0]).await.unwrap();
    h.tournaments.join(t.id, p[1]).await.unwrap();

    let result = h.tournaments.submit_score(t.id, p[0], &clicker(80)).await;
    assert!(matches!(result, Err(TournamentError::InvalidScoreSubmission(_))));
}

#[tokio::test]
async fn test_second_submission_rejected() {
    let h = setup();
    let p = h.players(3, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::marathon("M", GameType::Clicker, dec!(10), 3, 3))
        .await;
    for &user in &p {
        h.tournaments.join(t.id, user).await.unwrap();
    }

    h.tournaments.submit_score(t.id, p[0], &clicker(80)).await.unwrap();
    let again = h.tournaments.submit_score(t.id, p[0], &clicker(90)).await;
    assert!(matches!(again, Err(TournamentError::ScoreAlreadySubmitted)));
}

#[tokio::test]
async fn test_settle_waits_for_scores() {
    let h = setup();
    let p = h.players(2, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
        .await;
    h.tournaments.join(t.id, p[0]).await.unwrap();
    h.tournaments.join(t.id, p[1]).await.unwrap();
    h.tournaments.submit_score(t.id, p[0], &clicker(80)).await.unwrap();

    let result = h.tournaments.settle(t.id).await;
    assert!(matches!(result, Err(TournamentError::ScoresPending { missing: 1 })));
}

#[tokio::test]
async fn test_settle_before_start_is_invalid_state() {
    let h = setup();
    let p = h.players(1, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
        .await;
    let result = h.tournaments.settle(t.id).await;
    assert!(matches!(result, Err(TournamentError::InvalidState { .. })));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_refunds_every_active_participant_once() {
    let h = setup();
    let p = h.players(3, dec!(40)).await;
    let t = h
        .create(p[0], TournamentDraft::group("Cup", GameType::Clicker, dec!(40), 5))
        .await;
    for &user in &p {
        h.tournaments.join(t.id, user).await.unwrap();
    }
    h.tournaments.leave(t.id, p[2]).await.unwrap();

    let report = h.tournaments.cancel(t.id).await.unwrap();
    assert_eq!(report.tournament.status, TournamentStatus::Cancelled);
    assert_eq!(report.refunds.len(), 2);
    assert!(report.all_refunded());

    let again = h.tournaments.cancel(t.id).await.unwrap();
    assert!(again
        .refunds
        .iter()
        .all(|r| matches!(r.state, Disbursement::Paid { .. })));

    for &user in &p {
        assert_eq!(h.balance(user).await, dec!(40));
        assert!(h.wallets.audit(user).await.unwrap().is_consistent());
    }
}

#[tokio::test]
async fn test_cancel_after_start_rejected() {
    let h = setup();
    let p = h.players(2, dec!(100)).await;
    let t = h
        .create(p[0], TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
        .await;
    h.tournaments.join(t.id, p[0]).await.unwrap();
    h.tournaments.join(t.id, p[1]).await.unwrap();

    let result = h.tournaments.cancel(t.id).await;
    assert!(matches!(result, Err(TournamentError::InvalidState { .. })));
}

// ============================================================================
// Read side
// ============================================================================

#[tokio::test]
async fn test_list_and_user_tournaments() {
    let h = setup();
    let p = h.players(2, dec!(100)).await;
    let open = h
        .create(p[0], TournamentDraft::group("Open", GameType::Clicker, dec!(10), 4))
        .await;
    let running = h
        .create(p[0], TournamentDraft::duel("Running", GameType::Clicker, dec!(10)))
        .await;
    h.tournaments.join(running.id, p[0]).await.unwrap();
    h.tournaments.join(running.id, p[1]).await.unwrap();
    h.tournaments.join(open.id, p[1]).await.unwrap();

    let registration = h
        .tournaments
        .list(Some(TournamentStatus::Registration), 10)
        .await
        .unwrap();
    assert_eq!(registration.len(), 1);
    assert_eq!(registration[0].id, open.id);

    let all = h.tournaments.list(None, 10).await.unwrap();
    assert_eq!(all[0].id, running.id);

    let mine = h.tournaments.user_tournaments(p[1], 10).await.unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(h.tournaments.user_tournaments(p[0], 10).await.unwrap().len(), 1);
}
