//! Prize distribution tables.

use crate::money::floor_currency;
use crate::tournament::models::TournamentType;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Share of the pool paid to an inclusive rank range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeTier {
    /// First rank of the tier (1-indexed)
    pub first_rank: u32,
    /// Last rank of the tier, equal to `first_rank` for a single place
    pub last_rank: u32,
    /// Share of the pool for the whole tier
    pub share: Decimal,
}

impl PrizeTier {
    /// Tier for one finishing place
    pub fn single(rank: u32, share: Decimal) -> Self {
        Self {
            first_rank: rank,
            last_rank: rank,
            share,
        }
    }

    /// Tier shared evenly by a range of places
    pub fn range(first_rank: u32, last_rank: u32, share: Decimal) -> Self {
        Self {
            first_rank,
            last_rank,
            share,
        }
    }

    pub fn is_single(&self) -> bool {
        self.first_rank == self.last_rank
    }

    pub fn contains(&self, rank: u32) -> bool {
        (self.first_rank..=self.last_rank).contains(&rank)
    }

    /// Ranks of this tier that are occupied when `finishers` participants are ranked
    pub fn filled_ranks(&self, finishers: u32) -> u32 {
        if finishers < self.first_rank {
            0
        } else {
            finishers.min(self.last_rank) - self.first_rank + 1
        }
    }
}

/// Ordered rank -> share mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeDistribution {
    pub tiers: Vec<PrizeTier>,
}

impl PrizeDistribution {
    /// Standard distribution for a tournament format
    ///
    /// - Duel: 90% to the winner
    /// - Group: 50/30/20
    /// - Marathon: 40/25/15 and 20% shared by ranks 4-10
    pub fn standard(tournament_type: TournamentType) -> Self {
        let tiers = match tournament_type {
            TournamentType::Duel => vec![PrizeTier::single(1, dec!(0.90))],
            TournamentType::Group => vec![
                PrizeTier::single(1, dec!(0.50)),
                PrizeTier::single(2, dec!(0.30)),
                PrizeTier::single(3, dec!(0.20)),
            ],
            TournamentType::Marathon => vec![
                PrizeTier::single(1, dec!(0.40)),
                PrizeTier::single(2, dec!(0.25)),
                PrizeTier::single(3, dec!(0.15)),
                PrizeTier::range(4, 10, dec!(0.20)),
            ],
        };
        Self { tiers }
    }

    /// Tier paying the given rank: an exact single-rank tier wins over a range
    pub fn tier_for(&self, rank: u32) -> Option<&PrizeTier> {
        self.tiers
            .iter()
            .find(|tier| tier.is_single() && tier.first_rank == rank)
            .or_else(|| self.tiers.iter().find(|tier| tier.contains(rank)))
    }

    /// Payout for a rank, given the pool and the number of ranked finishers
    ///
    /// A range tier is split evenly across its filled ranks only; the share of
    /// unfilled ranks is forfeited. Amounts are truncated to cents so the sum
    /// of all payouts never exceeds the pool.
    pub fn payout_for(&self, rank: u32, pool: Decimal, finishers: u32) -> Decimal {
        if rank == 0 || rank > finishers {
            return Decimal::ZERO;
        }
        let Some(tier) = self.tier_for(rank) else {
            return Decimal::ZERO;
        };
        let filled = tier.filled_ranks(finishers);
        if filled == 0 {
            return Decimal::ZERO;
        }
        floor_currency(pool * tier.share / Decimal::from(filled))
    }

    /// Sum of all tier shares
    pub fn total_share(&self) -> Decimal {
        self.tiers.iter().map(|tier| tier.share).sum()
    }
}
