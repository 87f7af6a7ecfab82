//! Per-game score validators.
//!
//! Each game implements [`GameRules`]; [`GameValidator`] dispatches to the
//! right implementation with `enum_dispatch`.

use super::models::{GameType, ScoreRejection, ScoreVerdict, Telemetry};
use crate::config::ScoringRules;
use enum_dispatch::enum_dispatch;

/// Bounds check and scoring for one game
#[enum_dispatch]
pub trait GameRules {
    fn game_type(&self) -> GameType;

    /// Turn telemetry into a trusted score or a rejection
    #[must_use]
    fn evaluate(&self, telemetry: &Telemetry, rules: &ScoringRules) -> ScoreVerdict;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClickerRules;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReactionRules;

#[derive(Debug, Clone, Copy, Default)]
pub struct TileMergeRules;

#[enum_dispatch(GameRules)]
#[derive(Debug, Clone, Copy)]
pub enum GameValidator {
    Clicker(ClickerRules),
    Reaction(ReactionRules),
    TileMerge(TileMergeRules),
}

impl From<GameType> for GameValidator {
    fn from(game_type: GameType) -> Self {
        match game_type {
            GameType::Clicker => ClickerRules.into(),
            GameType::Reaction => ReactionRules.into(),
            GameType::TileMerge => TileMergeRules.into(),
        }
    }
}

fn wrong_game(expected: GameType, telemetry: &Telemetry) -> ScoreVerdict {
    ScoreVerdict::reject(ScoreRejection::WrongGame {
        expected,
        got: telemetry.game_type(),
    })
}

impl GameRules for ClickerRules {
    fn game_type(&self) -> GameType {
        GameType::Clicker
    }

    fn evaluate(&self, telemetry: &Telemetry, rules: &ScoringRules) -> ScoreVerdict {
        let Telemetry::Clicker {
            clicks,
            start_time,
            end_time,
        } = telemetry
        else {
            return wrong_game(GameType::Clicker, telemetry);
        };

        if !start_time.is_finite() || !end_time.is_finite() {
            return ScoreVerdict::reject(ScoreRejection::NonFinite);
        }

        let duration = end_time - start_time;
        if duration <= 0.0 || (duration - rules.clicker_round_secs).abs() > rules.clicker_tolerance_secs
        {
            return ScoreVerdict::reject(ScoreRejection::DurationOutOfBounds { secs: duration });
        }

        let cps = f64::from(*clicks) / duration;
        if cps < rules.clicker_min_cps || cps > rules.clicker_max_cps {
            return ScoreVerdict::reject(ScoreRejection::ClickRateOutOfBounds { cps });
        }

        ScoreVerdict::Accepted { score: cps * 100.0 }
    }
}

impl GameRules for ReactionRules {
    fn game_type(&self) -> GameType {
        GameType::Reaction
    }

    fn evaluate(&self, telemetry: &Telemetry, rules: &ScoringRules) -> ScoreVerdict {
        let Telemetry::Reaction { attempts } = telemetry else {
            return wrong_game(GameType::Reaction, telemetry);
        };

        if attempts.iter().any(|latency| !latency.is_finite()) {
            return ScoreVerdict::reject(ScoreRejection::NonFinite);
        }

        if attempts.len() != rules.reaction_attempts {
            return ScoreVerdict::reject(ScoreRejection::WrongAttemptCount {
                expected: rules.reaction_attempts,
                got: attempts.len(),
            });
        }

        let valid: Vec<f64> = attempts
            .iter()
            .copied()
            .filter(|latency| (rules.reaction_min_ms..=rules.reaction_max_ms).contains(latency))
            .collect();

        let required = (rules.reaction_attempts as f64 * rules.reaction_min_valid_ratio).ceil() as usize;
        if valid.is_empty() || valid.len() < required {
            return ScoreVerdict::reject(ScoreRejection::TooFewValidAttempts {
                valid: valid.len(),
                required,
            });
        }

        let average = valid.iter().sum::<f64>() / valid.len() as f64;
        let completion = valid.len() as f64 / rules.reaction_attempts as f64;
        ScoreVerdict::Accepted {
            score: (1000.0 - average).max(0.0) * completion,
        }
    }
}

impl GameRules for TileMergeRules {
    fn game_type(&self) -> GameType {
        GameType::TileMerge
    }

    fn evaluate(&self, telemetry: &Telemetry, rules: &ScoringRules) -> ScoreVerdict {
        let Telemetry::TileMerge {
            score,
            max_tile,
            moves,
            start_time,
            end_time,
        } = telemetry
        else {
            return wrong_game(GameType::TileMerge, telemetry);
        };

        if !start_time.is_finite() || !end_time.is_finite() {
            return ScoreVerdict::reject(ScoreRejection::NonFinite);
        }

        let duration = end_time - start_time;
        if duration < 0.0 || duration > rules.tile_merge_max_secs {
            return ScoreVerdict::reject(ScoreRejection::DurationOutOfBounds { secs: duration });
        }

        let total = *score as f64 + f64::from(*max_tile) * 10.0 + f64::from(*moves) * 5.0;
        ScoreVerdict::Accepted { score: total }
    }
}

/// Score validator holding the configured bounds
#[derive(Debug, Clone, Default)]
pub struct ScoreValidator {
    rules: ScoringRules,
}

impl ScoreValidator {
    pub fn new(rules: ScoringRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ScoringRules {
        &self.rules
    }

    /// Validate telemetry for a game type
    pub fn validate(&self, game_type: GameType, telemetry: &Telemetry) -> ScoreVerdict {
        GameValidator::from(game_type).evaluate(telemetry, &self.rules)
    }
}
