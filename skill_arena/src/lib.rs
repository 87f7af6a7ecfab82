//! # Skill Arena
//!
//! Wallet ledger and tournament settlement engine for paid skill-game
//! tournaments.
//!
//! Users hold a balance backed by an auditable transaction log. Tournaments
//! charge an entry fee on admission, fix their prize pool at creation, accept
//! one validated score per participant and pay out exactly once when the
//! last score is in.
//!
//! ## Core Modules
//!
//! - [`wallet`]: balances, transaction log, deposits and withdrawals
//! - [`tournament`]: lifecycle state machine and settlement
//! - [`prize`]: commission tiers and prize distribution tables
//! - [`scoring`]: per-game telemetry bounds checking
//! - [`db`]: storage traits with PostgreSQL and in-memory backends
//! - [`action`]: normalized action envelope and the [`Arena`] facade
//!
//! ## Example
//!
//! ```
//! use skill_arena::{Arena, ArenaConfig};
//! use skill_arena::prize::PrizeCalculator;
//! use rust_decimal_macros::dec;
//!
//! let config = ArenaConfig::default();
//! let calculator = PrizeCalculator::new(config.commission_tiers.clone());
//! assert_eq!(calculator.prize_pool(dec!(100), 2), Some(dec!(160.00)));
//!
//! let _arena = Arena::in_memory(config);
//! ```

pub mod action;
pub mod config;
pub mod db;
pub mod error;
pub mod money;
pub mod prize;
pub mod scoring;
pub mod tournament;
pub mod wallet;

pub use action::{Action, ActionEnvelope, ActionOutcome, Arena};
pub use config::{ArenaConfig, ConfigError};
pub use error::{ArenaError, ArenaResult, ErrorBody, ErrorKind};
