//! Payment gateway callback handler.
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/payments/confirm \
//!   -H "Content-Type: application/json" \
//!   -d '{"transaction_id": 42, "external_ref": "gw-8812", "outcome": "succeeded"}'
//! ```

use axum::{Json, extract::State};
use skill_arena::ArenaError;
use skill_arena::wallet::{ConfirmationReceipt, PaymentConfirmation};

use super::AppState;
use super::error::ApiError;
use super::request_id::RequestId;
use crate::{logging, metrics};

/// Apply a deposit or withdrawal confirmation.
///
/// Redelivering a confirmation that was already applied returns `200 OK`
/// with `"applied": false` and changes nothing.
///
/// # Errors
///
/// - `422 Unprocessable Entity`: malformed body
/// - `409 Conflict`: the transaction already reached a different final status
/// - `404 Not Found`: unknown transaction
pub async fn confirm(
    State(state): State<AppState>,
    request_id: RequestId,
    body: String,
) -> Result<Json<ConfirmationReceipt>, ApiError> {
    let confirmation: PaymentConfirmation =
        serde_json::from_str(&body).map_err(ArenaError::from)?;

    match state.arena.confirm_payment(&confirmation).await {
        Ok(receipt) => {
            metrics::payment_confirmations_total("ok", receipt.applied);
            logging::log_payment_confirmation(
                request_id.as_str(),
                confirmation.transaction_id,
                "ok",
                receipt.applied,
            );
            Ok(Json(receipt))
        }
        Err(e) => {
            metrics::payment_confirmations_total(e.code(), false);
            logging::log_payment_confirmation(
                request_id.as_str(),
                confirmation.transaction_id,
                e.code(),
                false,
            );
            Err(e.into())
        }
    }
}
