//! Commission and prize pool calculator.

use super::distribution::PrizeDistribution;
use crate::config::CommissionTier;
use crate::money::{checked_total, round_currency};
use crate::tournament::models::TournamentType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Money split of a tournament, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBreakdown {
    pub commission_rate: Decimal,
    /// `entry_fee × max_participants`
    pub gross: Decimal,
    pub prize_pool: Decimal,
    pub platform_commission: Decimal,
}

/// Pure commission and payout calculator
#[derive(Debug, Clone)]
pub struct PrizeCalculator {
    tiers: Vec<CommissionTier>,
}

impl PrizeCalculator {
    /// Create a calculator from commission tiers sorted by ascending threshold
    pub fn new(tiers: Vec<CommissionTier>) -> Self {
        Self { tiers }
    }

    /// Commission rate for an entry fee: the highest tier whose threshold the fee reaches
    pub fn commission_rate(&self, entry_fee: Decimal) -> Decimal {
        self.tiers
            .iter()
            .rev()
            .find(|tier| entry_fee >= tier.min_fee)
            .or(self.tiers.first())
            .map_or(Decimal::ZERO, |tier| tier.rate)
    }

    /// Prize pool for a full tournament, rounded half-even to cents
    pub fn prize_pool(&self, entry_fee: Decimal, max_participants: u32) -> Option<Decimal> {
        self.breakdown(entry_fee, max_participants)
            .map(|split| split.prize_pool)
    }

    /// Full money split; commission is the exact remainder of the gross amount
    ///
    /// Returns `None` when the gross amount exceeds
    /// [`MAX_AMOUNT`](crate::money::MAX_AMOUNT).
    pub fn breakdown(&self, entry_fee: Decimal, max_participants: u32) -> Option<PoolBreakdown> {
        let commission_rate = self.commission_rate(entry_fee);
        let gross = checked_total(entry_fee, max_participants)?;
        let prize_pool = round_currency(gross.checked_mul(Decimal::ONE - commission_rate)?);
        Some(PoolBreakdown {
            commission_rate,
            gross,
            prize_pool,
            platform_commission: gross - prize_pool,
        })
    }

    /// Prize distribution for a tournament format
    pub fn distribution_table(&self, tournament_type: TournamentType) -> PrizeDistribution {
        PrizeDistribution::standard(tournament_type)
    }

    /// Payout for a rank
    pub fn payout_for(
        &self,
        rank: u32,
        table: &PrizeDistribution,
        pool: Decimal,
        finishers: u32,
    ) -> Decimal {
        table.payout_for(rank, pool, finishers)
    }
}
