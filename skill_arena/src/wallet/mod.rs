//! Wallet ledger: balances and an append-only transaction log.
//!
//! Every balance change is recorded as a [`Transaction`]. Completed credits
//! and debits apply immediately; deposits and withdrawals stay `pending`
//! until the payment gateway confirms them through
//! [`WalletManager::handle_payment_confirmation`].
//!
//! ## Example
//!
//! ```no_run
//! use skill_arena::config::ArenaConfig;
//! use skill_arena::db::MemoryStore;
//! use skill_arena::wallet::WalletManager;
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let wallets = WalletManager::new(Arc::new(MemoryStore::new()), Arc::new(ArenaConfig::default()));
//!
//!     let user = wallets.register_user(42, Some("alice".to_string()), None).await?;
//!     let deposit = wallets.create_pending_deposit(user.id, dec!(250.00), "card").await?;
//!     wallets.settle_pending_deposit(deposit.id, "gw-123").await?;
//!
//!     println!("Balance: {}", wallets.get_user(user.id).await?.balance);
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;
pub mod rules;

pub use errors::{WalletError, WalletResult};
pub use manager::WalletManager;
pub use models::{
    ConfirmationReceipt, DEFAULT_RATING, DepositSettlement, EntryDirection, LedgerAudit, NewUser,
    PaymentConfirmation, PaymentOutcome, Posting, ReferralBonus, Transaction, TransactionId,
    TransactionStatus, TransactionType, User, UserId, WithdrawalRequest,
};
