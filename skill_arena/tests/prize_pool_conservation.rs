//! Prize pool conservation tests.
//!
//! The pool and commission always add up to the gross entry fees, and the
//! payouts of a ranked field never add up to more than the pool. Truncation
//! to cents may leave a remainder; it must never create money.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skill_arena::ArenaConfig;
use skill_arena::prize::{PrizeCalculator, PrizeDistribution};
use skill_arena::tournament::TournamentType;

fn calculator() -> PrizeCalculator {
    PrizeCalculator::new(ArenaConfig::default().commission_tiers)
}

fn payout_sum(table: &PrizeDistribution, pool: Decimal, finishers: u32) -> Decimal {
    (1..=finishers)
        .map(|rank| table.payout_for(rank, pool, finishers))
        .sum()
}

#[test]
fn test_pool_plus_commission_equals_gross() {
    let calc = calculator();
    let cases = [
        (dec!(1), 2),
        (dec!(9.99), 3),
        (dec!(10), 7),
        (dec!(33.33), 11),
        (dec!(50), 8),
        (dec!(100), 2),
        (dec!(250.01), 100),
    ];

    for (fee, seats) in cases {
        let split = calc.breakdown(fee, seats).unwrap();
        assert_eq!(
            split.prize_pool + split.platform_commission,
            fee * Decimal::from(seats),
            "fee {fee} × {seats} seats"
        );
        assert!(split.prize_pool.scale() <= 2);
        assert!(split.platform_commission >= Decimal::ZERO);
    }
}

#[test]
fn test_duel_conservation() {
    let table = PrizeDistribution::standard(TournamentType::Duel);
    for pool in [dec!(1.60), dec!(160.00), dec!(15.99), dec!(0.01)] {
        let sum = payout_sum(&table, pool, 2);
        assert!(sum <= pool, "duel pool {pool} paid {sum}");
    }
    assert_eq!(payout_sum(&table, dec!(160.00), 2), dec!(144.00));
}

#[test]
fn test_group_conservation() {
    let table = PrizeDistribution::standard(TournamentType::Group);
    for finishers in 2..=12 {
        for pool in [dec!(320.00), dec!(99.99), dec!(7.01), dec!(1000.03)] {
            let sum = payout_sum(&table, pool, finishers);
            assert!(sum <= pool, "{finishers} finishers, pool {pool}, paid {sum}");
        }
    }
    assert_eq!(payout_sum(&table, dec!(320.00), 8), dec!(320.00));
}

#[test]
fn test_marathon_range_never_overpays() {
    let table = PrizeDistribution::standard(TournamentType::Marathon);
    for finishers in 1..=30 {
        for pool in [dec!(160.00), dec!(333.33), dec!(1.00), dec!(12345.67)] {
            let sum = payout_sum(&table, pool, finishers);
            assert!(sum <= pool, "{finishers} finishers, pool {pool}, paid {sum}");
        }
    }
}

#[test]
fn test_marathon_full_range_pays_entire_pool() {
    let table = PrizeDistribution::standard(TournamentType::Marathon);

    // 20% of 700 is 140, split over seven filled ranks
    assert_eq!(payout_sum(&table, dec!(700.00), 10), dec!(700.00));
    assert_eq!(payout_sum(&table, dec!(700.00), 25), dec!(700.00));
    assert_eq!(table.payout_for(10, dec!(700.00), 25), dec!(20.00));
    assert_eq!(table.payout_for(11, dec!(700.00), 25), Decimal::ZERO);
}

#[test]
fn test_marathon_partial_range_forfeits_unfilled_share() {
    let table = PrizeDistribution::standard(TournamentType::Marathon);
    let pool = dec!(160.00);

    let payouts: Vec<Decimal> = (1..=5).map(|rank| table.payout_for(rank, pool, 5)).collect();
    assert_eq!(
        payouts,
        vec![dec!(64.00), dec!(40.00), dec!(24.00), dec!(16.00), dec!(16.00)]
    );

    // Three finishers: the whole range share stays unpaid
    assert_eq!(payout_sum(&table, pool, 3), dec!(128.00));
}

#[test]
fn test_truncation_remainder_is_small() {
    let table = PrizeDistribution::standard(TournamentType::Marathon);
    let pool = dec!(100.00);

    // 20 / 6 = 3.333.. truncates to 3.33 per rank
    assert_eq!(table.payout_for(4, pool, 9), dec!(3.33));
    let sum = payout_sum(&table, pool, 9);
    assert_eq!(pool - sum, dec!(0.02));
}

#[test]
fn test_standard_tables_share_at_most_everything() {
    for kind in [
        TournamentType::Duel,
        TournamentType::Group,
        TournamentType::Marathon,
    ] {
        assert!(PrizeDistribution::standard(kind).total_share() <= Decimal::ONE);
    }
}
