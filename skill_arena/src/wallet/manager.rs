//! Wallet manager: the ledger's public operations over a storage backend.

use super::{
    errors::{WalletError, WalletResult},
    models::{
        ConfirmationReceipt, DepositSettlement, LedgerAudit, NewUser, PaymentConfirmation,
        PaymentOutcome, Posting, ReferralBonus, Transaction, TransactionId, TransactionStatus,
        TransactionType, User, UserId, WithdrawalRequest,
    },
};
use crate::config::ArenaConfig;
use crate::db::ArenaStore;
use crate::money::{is_valid_amount, round_currency};
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Characters used in generated referral codes; no 0/O or 1/I
const REFERRAL_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated referral code
pub const REFERRAL_CODE_LEN: usize = 8;

/// Attempts at generating an unused referral code
const REFERRAL_CODE_ATTEMPTS: u32 = 5;

/// Wallet manager
#[derive(Clone)]
pub struct WalletManager {
    store: Arc<dyn ArenaStore>,
    config: Arc<ArenaConfig>,
}

impl WalletManager {
    /// Create a new wallet manager
    ///
    /// # Arguments
    ///
    /// * `store` - Storage backend
    /// * `config` - Commission, minimum and bonus settings
    pub fn new(store: Arc<dyn ArenaStore>, config: Arc<ArenaConfig>) -> Self {
        Self { store, config }
    }

    /// Open a zero-balance wallet for a chat identity
    ///
    /// With a valid `referral_code` the new user and the referrer both
    /// receive their bonus in the same atomic unit.
    ///
    /// # Errors
    ///
    /// * `UserExists` - The external id already has a wallet
    /// * `UnknownReferralCode` - The code does not belong to anyone
    pub async fn register_user(
        &self,
        external_id: i64,
        username: Option<String>,
        referral_code: Option<&str>,
    ) -> WalletResult<User> {
        let bonus = ReferralBonus {
            new_user: self.config.referral_bonus_new_user,
            referrer: self.config.referral_bonus_referrer,
        };
        let referred_by = referral_code.map(|code| code.trim().to_ascii_uppercase());

        let mut attempt = 0;
        loop {
            attempt += 1;
            let new_user = NewUser {
                external_id,
                username: username.clone(),
                referral_code: generate_referral_code(),
                referred_by: referred_by.clone(),
            };
            match self.store.create_user(&new_user, bonus).await {
                Err(WalletError::ReferralCodeTaken) if attempt < REFERRAL_CODE_ATTEMPTS => {
                    log::debug!("Referral code collision, regenerating");
                }
                Ok(user) => {
                    log::info!(
                        "Registered user {} (external {}){}",
                        user.id,
                        external_id,
                        if user.referrer_id.is_some() { " via referral" } else { "" }
                    );
                    return Ok(user);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_user(&self, user_id: UserId) -> WalletResult<User> {
        self.store.get_user(user_id).await
    }

    pub async fn find_user_by_external_id(&self, external_id: i64) -> WalletResult<Option<User>> {
        self.store.find_user_by_external_id(external_id).await
    }

    /// Credit a user's balance with a completed transaction
    ///
    /// # Errors
    ///
    /// * `InvalidAmount` - Amount not positive or finer than cents
    /// * `DuplicateExternalRef` - The reference is already recorded
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Decimal,
        transaction_type: TransactionType,
        description: impl Into<String>,
        external_ref: Option<String>,
    ) -> WalletResult<Transaction> {
        let mut posting = Posting::new(user_id, amount, transaction_type, description);
        posting.external_ref = external_ref;
        let transaction = self.store.credit(&posting).await?;
        log::info!(
            "Credited {} to user {} ({})",
            amount,
            user_id,
            transaction_type
        );
        Ok(transaction)
    }

    /// Debit a user's balance; the balance never goes negative
    ///
    /// # Errors
    ///
    /// * `InsufficientFunds` - Balance below `amount`; nothing is written
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Decimal,
        transaction_type: TransactionType,
        description: impl Into<String>,
    ) -> WalletResult<Transaction> {
        let posting = Posting::new(user_id, amount, transaction_type, description);
        let transaction = self.store.debit(&posting).await?;
        log::info!("Debited {} from user {} ({})", amount, user_id, transaction_type);
        Ok(transaction)
    }

    /// Start a deposit awaiting gateway confirmation
    ///
    /// Repeating the request while a deposit through the same method is still
    /// pending returns that deposit instead of creating another.
    pub async fn create_pending_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        payment_method: &str,
    ) -> WalletResult<Transaction> {
        if !is_valid_amount(amount) {
            return Err(WalletError::InvalidAmount(amount));
        }
        let deposit = self
            .store
            .create_pending_deposit(user_id, amount, payment_method)
            .await?;
        log::info!(
            "Pending deposit {} of {} for user {} via {}",
            deposit.id,
            deposit.amount,
            user_id,
            payment_method
        );
        Ok(deposit)
    }

    /// Credit a pending deposit confirmed by the gateway
    ///
    /// # Errors
    ///
    /// * `NotFound` - No such transaction
    /// * `AlreadyProcessed` - Already final with a different outcome or reference
    pub async fn settle_pending_deposit(
        &self,
        transaction_id: TransactionId,
        external_ref: &str,
    ) -> WalletResult<DepositSettlement> {
        let settlement = self.store.settle_deposit(transaction_id, external_ref).await?;
        match &settlement {
            DepositSettlement::Credited { transaction } => log::info!(
                "Deposit {} settled: credited {} to user {}",
                transaction.id,
                transaction.amount,
                transaction.user_id
            ),
            DepositSettlement::AlreadyApplied { transaction } => log::info!(
                "Deposit {} confirmation redelivered, ignoring",
                transaction.id
            ),
        }
        Ok(settlement)
    }

    /// Mark a pending deposit as failed; the balance is untouched
    pub async fn fail_pending_deposit(
        &self,
        transaction_id: TransactionId,
        external_ref: Option<&str>,
    ) -> WalletResult<ConfirmationReceipt> {
        let receipt = self.store.fail_deposit(transaction_id, external_ref).await?;
        if receipt.applied {
            log::warn!("Deposit {} failed at the gateway", transaction_id);
        }
        Ok(receipt)
    }

    /// Hold the gross amount and record a pending withdrawal of the net amount
    ///
    /// # Errors
    ///
    /// * `InvalidAmount` - Amount not positive or finer than cents
    /// * `BelowMinimum` - Amount under the configured minimum
    /// * `InsufficientFunds` - Balance below the gross amount
    pub async fn create_withdrawal(
        &self,
        user_id: UserId,
        amount: Decimal,
        destination: &str,
    ) -> WalletResult<Transaction> {
        if !is_valid_amount(amount) {
            return Err(WalletError::InvalidAmount(amount));
        }
        if amount < self.config.min_withdrawal {
            return Err(WalletError::BelowMinimum {
                amount,
                minimum: self.config.min_withdrawal,
            });
        }

        let commission = round_currency(amount * self.config.withdrawal_commission_rate);
        let request = WithdrawalRequest {
            user_id,
            gross: amount,
            net: amount - commission,
            commission,
            destination: destination.to_string(),
        };
        let withdrawal = self.store.create_withdrawal(&request).await?;
        log::info!(
            "Withdrawal {} for user {}: gross {}, commission {}, net {}",
            withdrawal.id,
            user_id,
            request.gross,
            request.commission,
            request.net
        );
        Ok(withdrawal)
    }

    /// Mark a pending withdrawal as paid out
    pub async fn complete_withdrawal(
        &self,
        transaction_id: TransactionId,
        external_ref: &str,
    ) -> WalletResult<ConfirmationReceipt> {
        let receipt = self
            .store
            .complete_withdrawal(transaction_id, external_ref)
            .await?;
        if receipt.applied {
            log::info!("Withdrawal {} completed", transaction_id);
        }
        Ok(receipt)
    }

    /// Fail a pending withdrawal and return the held amount
    pub async fn reject_withdrawal(
        &self,
        transaction_id: TransactionId,
        reason: &str,
    ) -> WalletResult<ConfirmationReceipt> {
        self.release_withdrawal(transaction_id, TransactionStatus::Failed, reason)
            .await
    }

    /// Cancel a pending withdrawal and return the held amount
    pub async fn cancel_withdrawal(
        &self,
        transaction_id: TransactionId,
        reason: &str,
    ) -> WalletResult<ConfirmationReceipt> {
        self.release_withdrawal(transaction_id, TransactionStatus::Cancelled, reason)
            .await
    }

    async fn release_withdrawal(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        reason: &str,
    ) -> WalletResult<ConfirmationReceipt> {
        let receipt = self
            .store
            .reject_withdrawal(transaction_id, status, reason)
            .await?;
        if receipt.applied {
            log::warn!(
                "Withdrawal {} {}: {}; released {} to user {}",
                transaction_id,
                status,
                reason,
                receipt.transaction.gross_amount(),
                receipt.transaction.user_id
            );
        }
        Ok(receipt)
    }

    /// Apply an asynchronous gateway callback
    ///
    /// Redelivery of an already applied confirmation is a no-op reported with
    /// `applied: false`.
    ///
    /// # Errors
    ///
    /// * `NotFound` - Unknown transaction id
    /// * `WrongTransactionType` - The transaction is neither a deposit nor a withdrawal
    /// * `AlreadyProcessed` - Contradicts an earlier confirmation
    pub async fn handle_payment_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> WalletResult<ConfirmationReceipt> {
        let id = confirmation.transaction_id;
        let reference = confirmation.external_ref.as_str();
        let transaction = self.store.get_transaction(id).await?;

        match (transaction.transaction_type, confirmation.outcome) {
            (TransactionType::Deposit, PaymentOutcome::Succeeded) => {
                let settlement = self.settle_pending_deposit(id, reference).await?;
                let applied = matches!(settlement, DepositSettlement::Credited { .. });
                Ok(ConfirmationReceipt {
                    transaction: settlement.transaction().clone(),
                    applied,
                })
            }
            (TransactionType::Deposit, PaymentOutcome::Failed) => {
                self.fail_pending_deposit(id, Some(reference)).await
            }
            (TransactionType::Withdrawal, PaymentOutcome::Succeeded) => {
                self.complete_withdrawal(id, reference).await
            }
            (TransactionType::Withdrawal, PaymentOutcome::Failed) => {
                self.reject_withdrawal(id, "payout failed at the gateway").await
            }
            _ => Err(WalletError::WrongTransactionType(id, "deposit or withdrawal")),
        }
    }

    pub async fn get_transaction(&self, transaction_id: TransactionId) -> WalletResult<Transaction> {
        self.store.get_transaction(transaction_id).await
    }

    /// Transaction history, newest first
    pub async fn transactions(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> WalletResult<Vec<Transaction>> {
        self.store.transactions(user_id, limit, offset).await
    }

    /// Withdrawals awaiting the gateway, oldest first
    pub async fn pending_withdrawals(&self, limit: i64) -> WalletResult<Vec<Transaction>> {
        self.store.pending_withdrawals(limit).await
    }

    /// Recompute a balance from the transaction log
    pub async fn audit(&self, user_id: UserId) -> WalletResult<LedgerAudit> {
        let audit = self.store.audit(user_id).await?;
        if !audit.is_consistent() {
            log::error!(
                "Ledger mismatch for user {}: stored {}, recomputed {}",
                user_id,
                audit.stored_balance,
                audit.ledger_balance
            );
        }
        Ok(audit)
    }
}

fn generate_referral_code() -> String {
    let mut rng = rand::rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| char::from(REFERRAL_ALPHABET[rng.random_range(0..REFERRAL_ALPHABET.len())]))
        .collect()
}
