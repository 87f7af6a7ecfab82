//! Wallet data models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// User ID type
pub type UserId = i64;

/// Transaction ID type
pub type TransactionId = i64;

/// User with wallet balance and play counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Identity on the chat platform
    pub external_id: i64,
    pub username: Option<String>,
    pub balance: Decimal,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub total_winnings: Decimal,
    pub rating: i32,
    pub games_played: i32,
    pub tournaments_played: i32,
    pub tournaments_won: i32,
    pub referral_code: String,
    pub referrer_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Starting rating of every account
pub const DEFAULT_RATING: i32 = 1000;

/// Data needed to open a wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub external_id: i64,
    pub username: Option<String>,
    /// Freshly generated code for the new account
    pub referral_code: String,
    /// Code of the inviting user, if any
    pub referred_by: Option<String>,
}

/// Bonus amounts credited when a referred user registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferralBonus {
    pub new_user: Decimal,
    pub referrer: Decimal,
}

/// Which way a transaction moves the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl std::fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryDirection::Debit => write!(f, "debit"),
            EntryDirection::Credit => write!(f, "credit"),
        }
    }
}

impl std::str::FromStr for EntryDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryDirection::Debit),
            "credit" => Ok(EntryDirection::Credit),
            other => Err(format!("unknown entry direction: {other}")),
        }
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    TournamentFee,
    Prize,
    ReferralBonus,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Withdrawal => write!(f, "withdrawal"),
            TransactionType::TournamentFee => write!(f, "tournament_fee"),
            TransactionType::Prize => write!(f, "prize"),
            TransactionType::ReferralBonus => write!(f, "referral_bonus"),
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "tournament_fee" => Ok(TransactionType::TournamentFee),
            "prize" => Ok(TransactionType::Prize),
            "referral_bonus" => Ok(TransactionType::ReferralBonus),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// Transaction status; moves only forward from `Pending`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    /// `true` for completed, failed and cancelled
    pub fn is_final(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Whether moving to `next` respects the forward-only lifecycle
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        self == TransactionStatus::Pending && next.is_final()
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Failed => write!(f, "failed"),
            TransactionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Immutable record of one balance-affecting event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    /// Magnitude; for withdrawals the net amount paid out
    pub amount: Decimal,
    /// Commission withheld from a withdrawal, zero otherwise
    pub fee: Decimal,
    pub direction: EntryDirection,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub description: String,
    pub payment_method: Option<String>,
    pub external_ref: Option<String>,
    pub tournament_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Signed effect of this record on the balance
    pub fn balance_effect(&self) -> Decimal {
        match (self.transaction_type, self.status) {
            (_, TransactionStatus::Failed | TransactionStatus::Cancelled) => Decimal::ZERO,
            // Gross amount is held from creation on
            (TransactionType::Withdrawal, _) => -(self.amount + self.fee),
            (_, TransactionStatus::Pending) => Decimal::ZERO,
            (_, TransactionStatus::Completed) => match self.direction {
                EntryDirection::Credit => self.amount,
                EntryDirection::Debit => -self.amount,
            },
        }
    }

    /// Gross amount of a withdrawal (net payout plus commission)
    pub fn gross_amount(&self) -> Decimal {
        self.amount + self.fee
    }
}

/// A completed balance movement requested by the ledger or the lifecycle manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub user_id: UserId,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub description: String,
    pub external_ref: Option<String>,
    pub tournament_id: Option<i64>,
}

impl Posting {
    pub fn new(
        user_id: UserId,
        amount: Decimal,
        transaction_type: TransactionType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            transaction_type,
            description: description.into(),
            external_ref: None,
            tournament_id: None,
        }
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn for_tournament(mut self, tournament_id: i64) -> Self {
        self.tournament_id = Some(tournament_id);
        self
    }
}

/// Withdrawal amounts computed before the hold is placed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    /// Amount held from the balance
    pub gross: Decimal,
    /// Amount paid to the destination
    pub net: Decimal,
    pub commission: Decimal,
    pub destination: String,
}

/// Result of applying a gateway confirmation to a pending deposit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DepositSettlement {
    /// Balance credited by this call
    Credited { transaction: Transaction },
    /// Duplicate delivery; the deposit had already been credited
    AlreadyApplied { transaction: Transaction },
}

impl DepositSettlement {
    pub fn transaction(&self) -> &Transaction {
        match self {
            DepositSettlement::Credited { transaction }
            | DepositSettlement::AlreadyApplied { transaction } => transaction,
        }
    }
}

/// Outcome reported by a payment gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

/// Asynchronous confirmation delivered by a payment gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub transaction_id: TransactionId,
    pub external_ref: String,
    pub outcome: PaymentOutcome,
}

/// Result of handling a [`PaymentConfirmation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationReceipt {
    pub transaction: Transaction,
    /// `false` when the confirmation was a redelivery and changed nothing
    pub applied: bool,
}

/// Balance recomputed from the transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub user_id: UserId,
    pub stored_balance: Decimal,
    pub ledger_balance: Decimal,
    pub transaction_count: usize,
}

impl LedgerAudit {
    /// Recompute the balance of `user` from its full transaction log
    pub fn compute(user: &User, log: &[Transaction]) -> Self {
        Self {
            user_id: user.id,
            stored_balance: user.balance,
            ledger_balance: log.iter().map(Transaction::balance_effect).sum(),
            transaction_count: log.len(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.ledger_balance
    }
}
