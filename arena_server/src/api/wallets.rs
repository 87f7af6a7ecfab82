//! Wallet read handler.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use skill_arena::wallet::{Transaction, User, UserId};

use super::AppState;
use super::error::ApiError;
use super::tournaments::page_limit;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub user: User,
    /// Newest first
    pub transactions: Vec<Transaction>,
}

/// Get a user's balance, counters and a page of transaction history.
///
/// # Errors
///
/// - `404 Not Found`: user doesn't exist
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<WalletView>, ApiError> {
    let wallets = state.arena.wallets();
    let user = wallets.get_user(user_id).await?;
    let transactions = wallets
        .transactions(user_id, page_limit(query.limit), query.offset.unwrap_or(0).max(0))
        .await?;
    Ok(Json(WalletView { user, transactions }))
}
