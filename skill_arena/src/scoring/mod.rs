//! Score validation (anti-cheat bounds checking).
//!
//! A submitted game result only counts toward ranking if its telemetry passes
//! the bounds of its game:
//! - **Clicker**: round length within tolerance, clicks per second within bounds
//! - **Reaction**: exact attempt count, enough attempts with plausible latency
//! - **Tile merge**: session no longer than the time limit
//!
//! ## Example
//!
//! ```
//! use skill_arena::scoring::{GameType, ScoreValidator, Telemetry};
//!
//! let validator = ScoreValidator::default();
//! let verdict = validator.validate(
//!     GameType::Clicker,
//!     &Telemetry::Clicker { clicks: 5, start_time: 0.0, end_time: 10.2 },
//! );
//! assert!(!verdict.is_valid());
//! assert_eq!(verdict.score(), 0.0);
//! ```

pub mod models;
pub mod validator;

pub use models::{GameType, ScoreRejection, ScoreVerdict, Telemetry};
pub use validator::{
    ClickerRules, GameRules, GameValidator, ReactionRules, ScoreValidator, TileMergeRules,
};
