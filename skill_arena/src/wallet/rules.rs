//! Ledger checks shared by every storage backend.

use super::errors::{WalletError, WalletResult};
use super::models::{Posting, Transaction, TransactionStatus, TransactionType};
use crate::money::is_valid_amount;

/// What a gateway confirmation should do to a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStep {
    /// Transaction is pending; apply the transition
    Apply,
    /// Same confirmation was already applied; change nothing
    Redelivered,
}

/// Reject postings whose amount is not a positive cent value
pub fn check_posting(posting: &Posting) -> WalletResult<()> {
    if is_valid_amount(posting.amount) {
        Ok(())
    } else {
        Err(WalletError::InvalidAmount(posting.amount))
    }
}

/// Decide how to apply a confirmation moving `transaction` to `target`
///
/// A redelivery is recognised when the transaction already sits in `target`
/// with the same external reference (or none was supplied).
pub fn confirmation_step(
    transaction: &Transaction,
    expected_type: TransactionType,
    target: TransactionStatus,
    external_ref: Option<&str>,
) -> WalletResult<ConfirmationStep> {
    if transaction.transaction_type != expected_type {
        return Err(WalletError::WrongTransactionType(
            transaction.id,
            type_name(expected_type),
        ));
    }
    if transaction.status.can_transition_to(target) {
        return Ok(ConfirmationStep::Apply);
    }
    let same_ref = match external_ref {
        Some(reference) => transaction.external_ref.as_deref() == Some(reference),
        None => true,
    };
    if transaction.status == target && same_ref {
        Ok(ConfirmationStep::Redelivered)
    } else {
        Err(WalletError::AlreadyProcessed {
            id: transaction.id,
            status: transaction.status,
        })
    }
}

fn type_name(transaction_type: TransactionType) -> &'static str {
    match transaction_type {
        TransactionType::Deposit => "deposit",
        TransactionType::Withdrawal => "withdrawal",
        TransactionType::TournamentFee => "tournament fee",
        TransactionType::Prize => "prize",
        TransactionType::ReferralBonus => "referral bonus",
    }
}
