//! Engine configuration.
//!
//! Every tunable constant of the ledger, the calculator and the score
//! validator lives in [`ArenaConfig`]. The configuration is an immutable value
//! handed to the managers at construction, so tests can substitute alternate
//! tiers without touching process-wide state.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable could not be parsed
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    /// Values are individually valid but inconsistent
    #[error("Invalid configuration: {0}")]
    Inconsistent(String),
}

/// One commission tier: fees at or above `min_fee` pay `rate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub min_fee: Decimal,
    pub rate: Decimal,
}

/// Bounds used by the per-game score validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRules {
    /// Fixed clicker round length in seconds
    pub clicker_round_secs: f64,
    /// Allowed deviation from the round length in seconds
    pub clicker_tolerance_secs: f64,
    pub clicker_min_cps: f64,
    pub clicker_max_cps: f64,
    /// Number of latencies a reaction test must report
    pub reaction_attempts: usize,
    pub reaction_min_ms: f64,
    pub reaction_max_ms: f64,
    /// Share of attempts that must be within bounds
    pub reaction_min_valid_ratio: f64,
    /// Longest accepted tile-merge session in seconds
    pub tile_merge_max_secs: f64,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            clicker_round_secs: 10.0,
            clicker_tolerance_secs: 1.0,
            clicker_min_cps: 0.5,
            clicker_max_cps: 20.0,
            reaction_attempts: 10,
            reaction_min_ms: 100.0,
            reaction_max_ms: 2000.0,
            reaction_min_valid_ratio: 0.8,
            tile_merge_max_secs: 300.0,
        }
    }
}

/// Bounded retry for transient storage conflicts and payout failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the given retry (1-indexed), doubling each time
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Commission tiers sorted by ascending `min_fee`
    pub commission_tiers: Vec<CommissionTier>,
    /// Share of a withdrawal withheld as commission
    pub withdrawal_commission_rate: Decimal,
    /// Smallest gross withdrawal accepted
    pub min_withdrawal: Decimal,
    /// Bonus credited to a newly registered referred user
    pub referral_bonus_new_user: Decimal,
    /// Bonus credited to the referrer
    pub referral_bonus_referrer: Decimal,
    pub scoring: ScoringRules,
    /// Retries for serialization conflicts in the store
    pub conflict_retry: RetryPolicy,
    /// Retries for an individual payout or refund within one settlement run
    pub payout_retry: RetryPolicy,
    /// How long a settlement claim blocks other settlement runs
    pub settlement_lease: Duration,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            commission_tiers: vec![
                CommissionTier {
                    min_fee: Decimal::ZERO,
                    rate: dec!(0.20),
                },
                CommissionTier {
                    min_fee: dec!(500),
                    rate: dec!(0.15),
                },
                CommissionTier {
                    min_fee: dec!(2000),
                    rate: dec!(0.10),
                },
            ],
            withdrawal_commission_rate: dec!(0.03),
            min_withdrawal: dec!(500.00),
            referral_bonus_new_user: dec!(100.00),
            referral_bonus_referrer: dec!(50.00),
            scoring: ScoringRules::default(),
            conflict_retry: RetryPolicy::default(),
            payout_retry: RetryPolicy::default(),
            settlement_lease: Duration::from_secs(60),
        }
    }
}

impl ArenaConfig {
    /// Load configuration overrides from environment variables
    ///
    /// Recognized variables (all optional):
    /// - `WITHDRAWAL_COMMISSION`: withdrawal commission rate (default: 0.03)
    /// - `MIN_WITHDRAWAL_AMOUNT`: minimum withdrawal (default: 500.00)
    /// - `REFERRAL_BONUS_NEW_USER` / `REFERRAL_BONUS_REFERRER` (default: 100.00 / 50.00)
    /// - `COMMISSION_RATE_LOW` / `COMMISSION_RATE_MEDIUM` / `COMMISSION_RATE_HIGH`
    /// - `COMMISSION_MEDIUM_FROM` / `COMMISSION_HIGH_FROM`: tier thresholds (default: 500 / 2000)
    /// - `PAYOUT_MAX_ATTEMPTS`: payout attempts per settlement run (default: 3)
    /// - `CONFLICT_MAX_ATTEMPTS`: attempts on serialization conflicts (default: 3)
    /// - `SETTLEMENT_LEASE_SECS`: settlement claim lease (default: 60)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result is inconsistent
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let low = env_or("COMMISSION_RATE_LOW", defaults.commission_tiers[0].rate)?;
        let medium = env_or("COMMISSION_RATE_MEDIUM", defaults.commission_tiers[1].rate)?;
        let high = env_or("COMMISSION_RATE_HIGH", defaults.commission_tiers[2].rate)?;
        let medium_from = env_or("COMMISSION_MEDIUM_FROM", defaults.commission_tiers[1].min_fee)?;
        let high_from = env_or("COMMISSION_HIGH_FROM", defaults.commission_tiers[2].min_fee)?;

        let config = Self {
            commission_tiers: vec![
                CommissionTier {
                    min_fee: Decimal::ZERO,
                    rate: low,
                },
                CommissionTier {
                    min_fee: medium_from,
                    rate: medium,
                },
                CommissionTier {
                    min_fee: high_from,
                    rate: high,
                },
            ],
            withdrawal_commission_rate: env_or(
                "WITHDRAWAL_COMMISSION",
                defaults.withdrawal_commission_rate,
            )?,
            min_withdrawal: env_or("MIN_WITHDRAWAL_AMOUNT", defaults.min_withdrawal)?,
            referral_bonus_new_user: env_or(
                "REFERRAL_BONUS_NEW_USER",
                defaults.referral_bonus_new_user,
            )?,
            referral_bonus_referrer: env_or(
                "REFERRAL_BONUS_REFERRER",
                defaults.referral_bonus_referrer,
            )?,
            scoring: defaults.scoring,
            conflict_retry: RetryPolicy {
                max_attempts: env_or("CONFLICT_MAX_ATTEMPTS", defaults.conflict_retry.max_attempts)?,
                ..defaults.conflict_retry
            },
            payout_retry: RetryPolicy {
                max_attempts: env_or("PAYOUT_MAX_ATTEMPTS", defaults.payout_retry.max_attempts)?,
                ..defaults.payout_retry
            },
            settlement_lease: Duration::from_secs(env_or(
                "SETTLEMENT_LEASE_SECS",
                defaults.settlement_lease.as_secs(),
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check tier ordering and rate bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.commission_tiers.is_empty() {
            return Err(ConfigError::Inconsistent(
                "at least one commission tier is required".to_string(),
            ));
        }
        if self.commission_tiers[0].min_fee != Decimal::ZERO {
            return Err(ConfigError::Inconsistent(
                "the first commission tier must start at zero".to_string(),
            ));
        }
        for pair in self.commission_tiers.windows(2) {
            if pair[1].min_fee <= pair[0].min_fee {
                return Err(ConfigError::Inconsistent(
                    "commission tiers must have ascending thresholds".to_string(),
                ));
            }
        }
        let unit = Decimal::ZERO..Decimal::ONE;
        if self.commission_tiers.iter().any(|t| !unit.contains(&t.rate)) {
            return Err(ConfigError::Inconsistent(
                "commission rates must be in [0, 1)".to_string(),
            ));
        }
        if !unit.contains(&self.withdrawal_commission_rate) {
            return Err(ConfigError::Inconsistent(
                "withdrawal commission must be in [0, 1)".to_string(),
            ));
        }
        if self.payout_retry.max_attempts == 0 || self.conflict_retry.max_attempts == 0 {
            return Err(ConfigError::Inconsistent(
                "retry policies need at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}
