//! Tournament lifecycle: creation, admission, scoring and settlement.
//!
//! This module provides:
//! - Tournament creation with a prize pool fixed up front
//! - Admission with the entry fee charged in the same atomic unit
//! - Auto-start once enough participants joined
//! - Validated score submission and automatic settlement
//! - Resumable payouts and refunds
//!
//! ## Example
//!
//! ```no_run
//! use skill_arena::config::ArenaConfig;
//! use skill_arena::db::MemoryStore;
//! use skill_arena::scoring::GameType;
//! use skill_arena::tournament::{TournamentDraft, TournamentManager};
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let tournaments = TournamentManager::new(store, Arc::new(ArenaConfig::default()));
//!
//!     let draft = TournamentDraft::group("Friday Cup", GameType::TileMerge, dec!(100), 5);
//!     let tournament = tournaments.create(1, draft).await?;
//!     println!("Prize pool: {}", tournament.prize_pool);
//!
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;
pub mod rules;

pub use errors::{TournamentError, TournamentResult};
pub use manager::TournamentManager;
pub use models::{
    Admission, CancellationReport, Departure, Disbursement, DisbursementResult, NewTournament,
    Participant, ParticipantState, ScoreRecorded, ScoreSubmission, SettlementClaim,
    SettlementReport, Standing, Tournament, TournamentDraft, TournamentId, TournamentStatus,
    TournamentType,
};
