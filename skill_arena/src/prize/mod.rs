//! Commission and prize calculation.
//!
//! Everything here is pure and deterministic:
//! - tiered commission rate from the entry fee
//! - prize pool and platform commission of a full tournament
//! - rank -> payout lookup over typed prize tiers

pub mod calculator;
pub mod distribution;

pub use calculator::{PoolBreakdown, PrizeCalculator};
pub use distribution::{PrizeDistribution, PrizeTier};
