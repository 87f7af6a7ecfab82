//! Tournament data models.

use crate::prize::PrizeDistribution;
use crate::scoring::GameType;
use crate::wallet::{TransactionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tournament ID type
pub type TournamentId = i64;

/// Tournament lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    /// Row exists, money split not yet published
    Created,
    /// Accepting participants
    Registration,
    /// Enough participants joined; scores are being submitted
    InProgress,
    /// Settled and paid out
    Completed,
    /// Cancelled before start, fees refunded
    Cancelled,
}

impl TournamentStatus {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: TournamentStatus) -> bool {
        use TournamentStatus::*;
        matches!(
            (self, next),
            (Created, Registration)
                | (Registration, InProgress)
                | (InProgress, Completed)
                | (Created, Cancelled)
                | (Registration, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TournamentStatus::Completed | TournamentStatus::Cancelled)
    }
}

impl std::fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TournamentStatus::Created => write!(f, "created"),
            TournamentStatus::Registration => write!(f, "registration"),
            TournamentStatus::InProgress => write!(f, "in_progress"),
            TournamentStatus::Completed => write!(f, "completed"),
            TournamentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TournamentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TournamentStatus::Created),
            "registration" => Ok(TournamentStatus::Registration),
            "in_progress" => Ok(TournamentStatus::InProgress),
            "completed" => Ok(TournamentStatus::Completed),
            "cancelled" => Ok(TournamentStatus::Cancelled),
            other => Err(format!("unknown tournament status: {other}")),
        }
    }
}

/// Tournament format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentType {
    /// Two players, winner takes the pool
    Duel,
    /// Small group, top three paid
    Group,
    /// Large field, top ten paid
    Marathon,
}

impl std::fmt::Display for TournamentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TournamentType::Duel => write!(f, "duel"),
            TournamentType::Group => write!(f, "group"),
            TournamentType::Marathon => write!(f, "marathon"),
        }
    }
}

impl std::str::FromStr for TournamentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duel" => Ok(TournamentType::Duel),
            "group" => Ok(TournamentType::Group),
            "marathon" => Ok(TournamentType::Marathon),
            other => Err(format!("unknown tournament type: {other}")),
        }
    }
}

/// Tournament creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub game_type: GameType,
    pub tournament_type: TournamentType,
    pub entry_fee: Decimal,
    pub max_participants: u32,
    #[serde(default = "default_min_participants")]
    pub min_participants: u32,
}

fn default_min_participants() -> u32 {
    2
}

impl TournamentDraft {
    /// A two-player duel
    pub fn duel(title: impl Into<String>, game_type: GameType, entry_fee: Decimal) -> Self {
        Self {
            title: title.into(),
            description: None,
            game_type,
            tournament_type: TournamentType::Duel,
            entry_fee,
            max_participants: 2,
            min_participants: 2,
        }
    }

    /// A group tournament that starts once it is full
    pub fn group(
        title: impl Into<String>,
        game_type: GameType,
        entry_fee: Decimal,
        participants: u32,
    ) -> Self {
        Self {
            title: title.into(),
            description: None,
            game_type,
            tournament_type: TournamentType::Group,
            entry_fee,
            max_participants: participants,
            min_participants: participants,
        }
    }

    /// A marathon with separate minimum and maximum field sizes
    pub fn marathon(
        title: impl Into<String>,
        game_type: GameType,
        entry_fee: Decimal,
        min_participants: u32,
        max_participants: u32,
    ) -> Self {
        Self {
            title: title.into(),
            description: None,
            game_type,
            tournament_type: TournamentType::Marathon,
            entry_fee,
            max_participants,
            min_participants,
        }
    }
}

/// Tournament ready to be stored: the draft plus its fixed money split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTournament {
    pub creator_id: UserId,
    pub draft: TournamentDraft,
    pub prize_pool: Decimal,
    pub platform_commission: Decimal,
    pub prize_distribution: PrizeDistribution,
}

/// Stored tournament
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    pub creator_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub game_type: GameType,
    pub tournament_type: TournamentType,
    pub entry_fee: Decimal,
    pub max_participants: u32,
    pub min_participants: u32,
    pub prize_pool: Decimal,
    pub platform_commission: Decimal,
    pub prize_distribution: PrizeDistribution,
    pub status: TournamentStatus,
    /// Number of active participants
    pub participant_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Start of the running settlement claim, if any
    pub settlement_claimed_at: Option<DateTime<Utc>>,
}

impl Tournament {
    pub fn is_full(&self) -> bool {
        self.participant_count >= self.max_participants
    }
}

/// Progress of a payout or refund owed to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Disbursement {
    /// Nothing is owed
    NotDue,
    /// Owed, not yet attempted
    Pending,
    /// Credited by the given transaction
    Paid { transaction_id: TransactionId },
    /// Every attempt so far failed; retried by the next run
    Failed { attempts: u32 },
}

impl Disbursement {
    /// `true` while money is still owed
    pub fn is_outstanding(self) -> bool {
        matches!(self, Disbursement::Pending | Disbursement::Failed { .. })
    }

    pub fn attempts(self) -> u32 {
        match self {
            Disbursement::Failed { attempts } => attempts,
            _ => 0,
        }
    }
}

/// Participant lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ParticipantState {
    /// Joined, no trusted score yet
    NotSubmitted,
    /// Trusted score recorded
    Submitted { score: f64 },
    /// Placed by settlement; set exactly once
    Ranked {
        score: f64,
        position: u32,
        winnings: Decimal,
        payout: Disbursement,
    },
    /// Entry fee returned after leaving or cancellation
    Refunded { refund: Disbursement },
}

impl ParticipantState {
    pub fn score(&self) -> Option<f64> {
        match self {
            ParticipantState::Submitted { score } | ParticipantState::Ranked { score, .. } => {
                Some(*score)
            }
            _ => None,
        }
    }

    pub fn position(&self) -> Option<u32> {
        match self {
            ParticipantState::Ranked { position, .. } => Some(*position),
            _ => None,
        }
    }

    pub fn winnings(&self) -> Decimal {
        match self {
            ParticipantState::Ranked { winnings, .. } => *winnings,
            _ => Decimal::ZERO,
        }
    }
}

/// A user's entry into a tournament
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub tournament_id: TournamentId,
    pub user_id: UserId,
    pub state: ParticipantState,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn has_score(&self) -> bool {
        self.state.score().is_some()
    }
}

/// Result of an admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub tournament: Tournament,
    pub participant: Participant,
    /// Entry-fee transaction
    pub fee_transaction_id: TransactionId,
    /// `true` when this join moved the tournament to `in_progress`
    pub started: bool,
}

/// Result of leaving during registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Departure {
    pub tournament: Tournament,
    pub participant: Participant,
    /// Refund of the entry fee
    pub refund_transaction_id: TransactionId,
}

/// Result of recording a trusted score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecorded {
    pub participant: Participant,
    /// Every active participant now has a score
    pub all_submitted: bool,
}

/// Result of an accepted score submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSubmission {
    pub participant: Participant,
    /// Present when this submission was the last one and triggered settlement
    pub settlement: Option<SettlementReport>,
}

/// Final placement computed during settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub user_id: UserId,
    pub position: u32,
    pub score: f64,
    pub winnings: Decimal,
}

/// Settlement claim returned by the store
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementClaim {
    /// This caller owns the settlement run; participants are ranked
    Claimed {
        tournament: Tournament,
        participants: Vec<Participant>,
    },
    /// Another run holds an unexpired lease
    Busy,
    /// Tournament already completed
    AlreadySettled { tournament: Tournament },
}

/// What happened to one payout or refund in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisbursementResult {
    pub user_id: UserId,
    pub amount: Decimal,
    pub state: Disbursement,
}

/// Result of a settlement attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SettlementReport {
    /// All payouts made; tournament completed by this call
    Completed {
        tournament: Tournament,
        standings: Vec<Standing>,
    },
    /// Ranking frozen but some payouts failed; tournament stays in progress
    PayoutsOutstanding {
        tournament: Tournament,
        standings: Vec<Standing>,
        failed: Vec<DisbursementResult>,
    },
    /// Another settlement run is active
    InProgress { tournament_id: TournamentId },
    /// Idempotent no-op on a completed tournament
    AlreadySettled { tournament: Tournament },
}

/// Result of a cancellation or refund retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationReport {
    pub tournament: Tournament,
    pub refunds: Vec<DisbursementResult>,
}

impl CancellationReport {
    pub fn all_refunded(&self) -> bool {
        self.refunds.iter().all(|r| !r.state.is_outstanding())
    }
}
