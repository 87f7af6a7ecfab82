//! Telemetry and verdict models.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported game types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    /// Click as fast as possible during a fixed round
    Clicker,
    /// Ten reaction-time attempts
    Reaction,
    /// 2048-style tile-merge puzzle
    #[serde(alias = "2048")]
    TileMerge,
}

impl std::fmt::Display for GameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameType::Clicker => write!(f, "clicker"),
            GameType::Reaction => write!(f, "reaction"),
            GameType::TileMerge => write!(f, "tile_merge"),
        }
    }
}

impl std::str::FromStr for GameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clicker" => Ok(GameType::Clicker),
            "reaction" => Ok(GameType::Reaction),
            "tile_merge" | "2048" => Ok(GameType::TileMerge),
            other => Err(format!("unknown game type: {other}")),
        }
    }
}

/// Raw telemetry reported by a game client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum Telemetry {
    Clicker {
        clicks: u32,
        /// Round start, seconds since the epoch
        start_time: f64,
        /// Round end, seconds since the epoch
        end_time: f64,
    },
    Reaction {
        /// Latency of each attempt in milliseconds, in order
        attempts: Vec<f64>,
    },
    TileMerge {
        /// Score accumulated by merges
        score: u64,
        max_tile: u32,
        moves: u32,
        start_time: f64,
        end_time: f64,
    },
}

impl Telemetry {
    pub fn game_type(&self) -> GameType {
        match self {
            Telemetry::Clicker { .. } => GameType::Clicker,
            Telemetry::Reaction { .. } => GameType::Reaction,
            Telemetry::TileMerge { .. } => GameType::TileMerge,
        }
    }
}

/// Why telemetry was not trusted
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ScoreRejection {
    #[error("Telemetry for {got} submitted to a {expected} tournament")]
    WrongGame { expected: GameType, got: GameType },

    #[error("Telemetry contains non-finite values")]
    NonFinite,

    #[error("Round duration {secs:.2}s outside accepted bounds")]
    DurationOutOfBounds { secs: f64 },

    #[error("Click rate {cps:.2}/s outside accepted bounds")]
    ClickRateOutOfBounds { cps: f64 },

    #[error("Expected {expected} reaction attempts, got {got}")]
    WrongAttemptCount { expected: usize, got: usize },

    #[error("Only {valid} valid reaction attempts, {required} required")]
    TooFewValidAttempts { valid: usize, required: usize },
}

/// Outcome of validating one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ScoreVerdict {
    Accepted { score: f64 },
    Rejected { rejection: ScoreRejection },
}

impl ScoreVerdict {
    /// Trusted score, zero when rejected
    pub fn score(&self) -> f64 {
        match self {
            ScoreVerdict::Accepted { score } => *score,
            ScoreVerdict::Rejected { .. } => 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ScoreVerdict::Accepted { .. })
    }

    pub(crate) fn reject(rejection: ScoreRejection) -> Self {
        ScoreVerdict::Rejected { rejection }
    }
}
