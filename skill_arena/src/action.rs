//! Normalized action envelope and the arena facade that dispatches it.
//!
//! Transports decode whatever they receive into an [`ActionEnvelope`] and
//! render the returned [`ActionOutcome`] or [`ArenaError`]; no user-facing
//! text is produced here.

use crate::config::ArenaConfig;
use crate::db::{ArenaStore, MemoryStore};
use crate::error::{ArenaError, ArenaResult};
use crate::scoring::Telemetry;
use crate::tournament::{
    Admission, CancellationReport, Departure, ScoreSubmission, SettlementReport, Tournament,
    TournamentDraft, TournamentError, TournamentId, TournamentManager,
};
use crate::wallet::{ConfirmationReceipt, PaymentConfirmation, Transaction, UserId, WalletManager};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One request from an identified actor
///
/// ```
/// use skill_arena::action::{Action, ActionEnvelope};
///
/// let envelope: ActionEnvelope =
///     serde_json::from_str(r#"{"actor_id": 7, "action": "join", "payload": {"tournament_id": 3}}"#)
///         .unwrap();
/// assert_eq!(envelope.action, Action::Join { tournament_id: 3 });
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub actor_id: UserId,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum Action {
    Join {
        tournament_id: TournamentId,
    },
    Leave {
        tournament_id: TournamentId,
    },
    SubmitScore {
        tournament_id: TournamentId,
        telemetry: Telemetry,
    },
    CreateTournament(TournamentDraft),
    /// Allowed for the creator only
    CancelTournament {
        tournament_id: TournamentId,
    },
    /// Resume a settlement that left payouts outstanding
    SettleTournament {
        tournament_id: TournamentId,
    },
    Deposit {
        amount: Decimal,
        payment_method: String,
    },
    Withdraw {
        amount: Decimal,
        destination: String,
    },
}

impl Action {
    /// Stable action name, used for logs and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            Action::Join { .. } => "join",
            Action::Leave { .. } => "leave",
            Action::SubmitScore { .. } => "submit_score",
            Action::CreateTournament(_) => "create_tournament",
            Action::CancelTournament { .. } => "cancel_tournament",
            Action::SettleTournament { .. } => "settle_tournament",
            Action::Deposit { .. } => "deposit",
            Action::Withdraw { .. } => "withdraw",
        }
    }
}

/// Successful result of an action with the updated entity snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Joined { admission: Admission },
    Left { departure: Departure },
    ScoreSubmitted { submission: ScoreSubmission },
    TournamentCreated { tournament: Tournament },
    TournamentCancelled { report: CancellationReport },
    TournamentSettled { report: SettlementReport },
    DepositPending { transaction: Transaction },
    WithdrawalPending { transaction: Transaction },
}

/// Wallet ledger and tournament lifecycle over one shared store
#[derive(Clone)]
pub struct Arena {
    wallets: WalletManager,
    tournaments: TournamentManager,
}

impl Arena {
    pub fn new(store: Arc<dyn ArenaStore>, config: ArenaConfig) -> Self {
        let config = Arc::new(config);
        Self {
            wallets: WalletManager::new(store.clone(), config.clone()),
            tournaments: TournamentManager::new(store, config),
        }
    }

    /// Arena backed by a fresh [`MemoryStore`]
    pub fn in_memory(config: ArenaConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub fn wallets(&self) -> &WalletManager {
        &self.wallets
    }

    pub fn tournaments(&self) -> &TournamentManager {
        &self.tournaments
    }

    /// Decode and dispatch a JSON envelope
    pub async fn dispatch_json(&self, body: &str) -> ArenaResult<ActionOutcome> {
        let envelope: ActionEnvelope = serde_json::from_str(body)?;
        self.dispatch(envelope).await
    }

    /// Execute one action on behalf of `envelope.actor_id`
    pub async fn dispatch(&self, envelope: ActionEnvelope) -> ArenaResult<ActionOutcome> {
        let actor = envelope.actor_id;
        let name = envelope.action.name();
        log::debug!("Dispatching {} for user {}", name, actor);

        let outcome = match envelope.action {
            Action::Join { tournament_id } => ActionOutcome::Joined {
                admission: self.tournaments.join(tournament_id, actor).await?,
            },
            Action::Leave { tournament_id } => ActionOutcome::Left {
                departure: self.tournaments.leave(tournament_id, actor).await?,
            },
            Action::SubmitScore {
                tournament_id,
                telemetry,
            } => ActionOutcome::ScoreSubmitted {
                submission: self
                    .tournaments
                    .submit_score(tournament_id, actor, &telemetry)
                    .await?,
            },
            Action::CreateTournament(draft) => ActionOutcome::TournamentCreated {
                tournament: self.tournaments.create(actor, draft).await?,
            },
            Action::CancelTournament { tournament_id } => {
                let tournament = self.tournaments.get(tournament_id).await?;
                if tournament.creator_id != actor {
                    return Err(TournamentError::NotCreator(actor).into());
                }
                ActionOutcome::TournamentCancelled {
                    report: self.tournaments.cancel(tournament_id).await?,
                }
            }
            Action::SettleTournament { tournament_id } => ActionOutcome::TournamentSettled {
                report: self.tournaments.settle(tournament_id).await?,
            },
            Action::Deposit {
                amount,
                payment_method,
            } => ActionOutcome::DepositPending {
                transaction: self
                    .wallets
                    .create_pending_deposit(actor, amount, &payment_method)
                    .await?,
            },
            Action::Withdraw {
                amount,
                destination,
            } => ActionOutcome::WithdrawalPending {
                transaction: self
                    .wallets
                    .create_withdrawal(actor, amount, &destination)
                    .await?,
            },
        };
        Ok(outcome)
    }

    /// Single entry point for payment gateway callbacks
    pub async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> ArenaResult<ConfirmationReceipt> {
        self.wallets
            .handle_payment_confirmation(confirmation)
            .await
            .map_err(ArenaError::from)
    }
}
