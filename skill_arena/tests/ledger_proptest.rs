/// Property-based tests for the wallet ledger and prize math using proptest
///
/// These tests drive random operation sequences through the in-memory store
/// and check that balances never go negative and always match the log.
use proptest::prelude::*;
use rust_decimal::Decimal;
use skill_arena::ArenaConfig;
use skill_arena::db::MemoryStore;
use skill_arena::prize::{PrizeCalculator, PrizeDistribution};
use skill_arena::tournament::TournamentType;
use skill_arena::wallet::{PaymentConfirmation, PaymentOutcome, TransactionType, WalletManager};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum LedgerOp {
    Credit(i64),
    Debit(i64),
    Deposit { cents: i64, confirm: bool },
    Withdraw { cents: i64, complete: bool },
}

// Amounts in cents, 0.01 to 2000.00
fn cents_strategy() -> impl Strategy<Value = i64> {
    1i64..=200_000
}

fn op_strategy() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        cents_strategy().prop_map(LedgerOp::Credit),
        cents_strategy().prop_map(LedgerOp::Debit),
        (cents_strategy(), any::<bool>())
            .prop_map(|(cents, confirm)| LedgerOp::Deposit { cents, confirm }),
        (cents_strategy(), any::<bool>())
            .prop_map(|(cents, complete)| LedgerOp::Withdraw { cents, complete }),
    ]
}

fn tournament_type_strategy() -> impl Strategy<Value = TournamentType> {
    prop_oneof![
        Just(TournamentType::Duel),
        Just(TournamentType::Group),
        Just(TournamentType::Marathon),
    ]
}

fn money(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Apply `ops` to one user; returns (balance, ledger balance) after each step
fn run_ops(ops: Vec<LedgerOp>) -> Vec<(Decimal, Decimal)> {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async move {
        let wallets = WalletManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ArenaConfig::default()),
        );
        let user = wallets.register_user(1, None, None).await.unwrap();
        let mut observed = Vec::with_capacity(ops.len());

        for (n, op) in ops.into_iter().enumerate() {
            // Business errors such as insufficient funds are expected; state must hold anyway
            match op {
                LedgerOp::Credit(cents) => {
                    let _ = wallets
                        .credit(user.id, money(cents), TransactionType::Prize, "prize", None)
                        .await;
                }
                LedgerOp::Debit(cents) => {
                    let _ = wallets
                        .debit(user.id, money(cents), TransactionType::TournamentFee, "fee")
                        .await;
                }
                LedgerOp::Deposit { cents, confirm } => {
                    if let Ok(pending) = wallets
                        .create_pending_deposit(user.id, money(cents), &format!("card-{n}"))
                        .await
                    {
                        let outcome = if confirm {
                            PaymentOutcome::Succeeded
                        } else {
                            PaymentOutcome::Failed
                        };
                        let _ = wallets
                            .handle_payment_confirmation(&PaymentConfirmation {
                                transaction_id: pending.id,
                                external_ref: format!("gw-{n}"),
                                outcome,
                            })
                            .await;
                    }
                }
                LedgerOp::Withdraw { cents, complete } => {
                    if let Ok(pending) = wallets
                        .create_withdrawal(user.id, money(cents), "iban")
                        .await
                    {
                        let _ = if complete {
                            wallets
                                .complete_withdrawal(pending.id, &format!("payout-{n}"))
                                .await
                        } else {
                            wallets.reject_withdrawal(pending.id, "bank declined").await
                        };
                    }
                }
            }

            let balance = wallets.get_user(user.id).await.unwrap().balance;
            let audit = wallets.audit(user.id).await.unwrap();
            observed.push((balance, audit.ledger_balance));
        }
        observed
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_balance_never_negative_and_matches_ledger(
        ops in prop::collection::vec(op_strategy(), 1..40)
    ) {
        for (step, (balance, ledger)) in run_ops(ops).into_iter().enumerate() {
            prop_assert!(balance >= Decimal::ZERO, "negative balance {} at step {}", balance, step);
            prop_assert_eq!(balance, ledger, "ledger mismatch at step {}", step);
            prop_assert!(balance.scale() <= 2);
        }
    }

    #[test]
    fn test_payouts_never_exceed_pool(
        kind in tournament_type_strategy(),
        pool_cents in 1i64..=10_000_000,
        finishers in 1u32..=60,
    ) {
        let table = PrizeDistribution::standard(kind);
        let pool = money(pool_cents);
        let total: Decimal = (1..=finishers)
            .map(|rank| table.payout_for(rank, pool, finishers))
            .sum();
        prop_assert!(total <= pool, "{:?} paid {} from pool {}", kind, total, pool);

        for rank in 1..=finishers {
            let payout = table.payout_for(rank, pool, finishers);
            prop_assert!(payout >= Decimal::ZERO);
            prop_assert!(payout.scale() <= 2);
        }
    }

    #[test]
    fn test_breakdown_conserves_gross(
        fee_cents in 1i64..=500_000,
        seats in 2u32..=500,
    ) {
        let calc = PrizeCalculator::new(ArenaConfig::default().commission_tiers);
        let fee = money(fee_cents);
        let split = calc.breakdown(fee, seats).unwrap();
        prop_assert_eq!(split.prize_pool + split.platform_commission, split.gross);
        prop_assert_eq!(split.gross, fee * Decimal::from(seats));
        prop_assert!(split.prize_pool <= split.gross);
        prop_assert!(split.prize_pool.scale() <= 2);
    }
}
