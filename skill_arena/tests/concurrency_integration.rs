//! Concurrent access tests.
//!
//! Races joins for the last seat, settles from several tasks at once and
//! hammers one wallet with parallel debits, then checks that no money was
//! created or lost.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skill_arena::ArenaConfig;
use skill_arena::db::MemoryStore;
use skill_arena::scoring::{GameType, Telemetry};
use skill_arena::tournament::{
    SettlementReport, TournamentDraft, TournamentError, TournamentManager, TournamentStatus,
};
use skill_arena::wallet::{TransactionType, UserId, WalletError, WalletManager};
use std::sync::Arc;

fn managers() -> (WalletManager, TournamentManager) {
    let store = Arc::new(MemoryStore::new());
    let config = Arc::new(ArenaConfig::default());
    (
        WalletManager::new(store.clone(), config.clone()),
        TournamentManager::new(store, config),
    )
}

async fn funded(wallets: &WalletManager, external_id: i64, amount: Decimal) -> UserId {
    let user = wallets.register_user(external_id, None, None).await.unwrap();
    wallets
        .credit(user.id, amount, TransactionType::Deposit, "seed", None)
        .await
        .unwrap();
    user.id
}

fn clicker(clicks: u32) -> Telemetry {
    Telemetry::Clicker {
        clicks,
        start_time: 0.0,
        end_time: 10.0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_seat_race_admits_exactly_one() {
    let (wallets, tournaments) = managers();
    let first = funded(&wallets, 1, dec!(100)).await;
    let t = tournaments
        .create(first, TournamentDraft::duel("Race", GameType::Clicker, dec!(20)))
        .await
        .unwrap();
    tournaments.join(t.id, first).await.unwrap();
    let second = funded(&wallets, 2, dec!(100)).await;

    let mut contenders = Vec::new();
    for n in 0..6 {
        contenders.push(funded(&wallets, 10 + n, dec!(100)).await);
    }

    let mut handles = Vec::new();
    for user_id in contenders.iter().copied().chain([second]) {
        let tournaments = tournaments.clone();
        handles.push(tokio::spawn(async move {
            (user_id, tournaments.join(t.id, user_id).await)
        }));
    }

    let mut admitted = Vec::new();
    let mut refused = 0;
    for handle in handles {
        let (user_id, result) = handle.await.unwrap();
        match result {
            Ok(_) => admitted.push(user_id),
            Err(TournamentError::TournamentFull) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // The winner fills the duel and starts it
    assert_eq!(admitted.len(), 1);
    assert_eq!(refused, 6);

    let tournament = tournaments.get(t.id).await.unwrap();
    assert_eq!(tournament.participant_count, 2);
    assert_eq!(tournament.status, TournamentStatus::InProgress);

    for user_id in contenders.iter().copied().chain([second]) {
        let expected = if admitted.contains(&user_id) {
            dec!(80)
        } else {
            dec!(100)
        };
        assert_eq!(wallets.get_user(user_id).await.unwrap().balance, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_tournament_refuses_extra_joins() {
    let (wallets, tournaments) = managers();
    let creator = funded(&wallets, 1, dec!(10)).await;
    let t = tournaments
        .create(
            creator,
            TournamentDraft::marathon("Seats", GameType::Clicker, dec!(10), 5, 5),
        )
        .await
        .unwrap();

    let mut users = Vec::new();
    for n in 0..8 {
        users.push(funded(&wallets, 100 + n, dec!(10)).await);
    }

    let mut handles = Vec::new();
    for &user_id in &users {
        let tournaments = tournaments.clone();
        handles.push(tokio::spawn(async move { tournaments.join(t.id, user_id).await }));
    }
    let mut joined = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(TournamentError::TournamentFull) => full += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(joined, 5);
    assert_eq!(full, 3);
    let tournament = tournaments.get(t.id).await.unwrap();
    assert_eq!(tournament.participant_count, 5);
    assert!(tournament.participant_count <= tournament.max_participants);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settle_after_completion_is_noop() {
    let (wallets, tournaments) = managers();
    let a = funded(&wallets, 1, dec!(100)).await;
    let b = funded(&wallets, 2, dec!(100)).await;
    let c = funded(&wallets, 3, dec!(100)).await;
    let t = tournaments
        .create(
            a,
            TournamentDraft::marathon("Settle", GameType::Clicker, dec!(100), 3, 3),
        )
        .await
        .unwrap();
    for user_id in [a, b, c] {
        tournaments.join(t.id, user_id).await.unwrap();
    }
    tournaments.submit_score(t.id, a, &clicker(90)).await.unwrap();
    tournaments.submit_score(t.id, b, &clicker(60)).await.unwrap();

    let last = tournaments.submit_score(t.id, c, &clicker(30)).await.unwrap();
    assert!(matches!(
        last.settlement,
        Some(SettlementReport::Completed { .. })
    ));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let tournaments = tournaments.clone();
        handles.push(tokio::spawn(async move { tournaments.settle(t.id).await }));
    }
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert!(matches!(report, SettlementReport::AlreadySettled { .. }));
    }

    let pool = tournaments.get(t.id).await.unwrap().prize_pool;
    let mut paid = Decimal::ZERO;
    for user_id in [a, b, c] {
        paid += wallets.get_user(user_id).await.unwrap().total_winnings;
        assert!(wallets.audit(user_id).await.unwrap().is_consistent());
    }
    assert!(paid <= pool);
    assert_eq!(wallets.get_user(a).await.unwrap().tournaments_won, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_settlements_after_failed_payout() {
    let store = Arc::new(MemoryStore::new());
    let mut config = ArenaConfig::default();
    config.payout_retry.max_attempts = 1;
    config.payout_retry.base_delay = std::time::Duration::from_millis(1);
    let config = Arc::new(config);
    let wallets = WalletManager::new(store.clone(), config.clone());
    let tournaments = TournamentManager::new(store.clone(), config);

    let a = funded(&wallets, 1, dec!(100)).await;
    let b = funded(&wallets, 2, dec!(100)).await;
    let t = tournaments
        .create(a, TournamentDraft::duel("Duel", GameType::Clicker, dec!(100)))
        .await
        .unwrap();
    tournaments.join(t.id, a).await.unwrap();
    tournaments.join(t.id, b).await.unwrap();

    store.inject_credit_failures(a, 1).await;
    tournaments.submit_score(t.id, b, &clicker(30)).await.unwrap();
    let last = tournaments.submit_score(t.id, a, &clicker(90)).await.unwrap();
    assert!(matches!(
        last.settlement,
        Some(SettlementReport::PayoutsOutstanding { .. })
    ));
    assert_eq!(wallets.get_user(a).await.unwrap().balance, Decimal::ZERO);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let tournaments = tournaments.clone();
        handles.push(tokio::spawn(async move { tournaments.settle(t.id).await }));
    }
    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            SettlementReport::Completed { .. } => completed += 1,
            SettlementReport::InProgress { .. } | SettlementReport::AlreadySettled { .. } => {}
            other => panic!("unexpected report: {other:?}"),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(wallets.get_user(a).await.unwrap().balance, dec!(144.00));
    assert_eq!(
        tournaments.get(t.id).await.unwrap().status,
        TournamentStatus::Completed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_debits_never_overdraw() {
    let (wallets, _) = managers();
    let user_id = funded(&wallets, 1, dec!(100)).await;

    let mut handles = Vec::new();
    for n in 0..25 {
        let wallets = wallets.clone();
        handles.push(tokio::spawn(async move {
            wallets
                .debit(
                    user_id,
                    dec!(7.50),
                    TransactionType::TournamentFee,
                    format!("debit {n}"),
                )
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(WalletError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // 13 × 7.50 = 97.50
    assert_eq!(succeeded, 13);
    let user = wallets.get_user(user_id).await.unwrap();
    assert_eq!(user.balance, dec!(2.50));
    assert!(wallets.audit(user_id).await.unwrap().is_consistent());
}
