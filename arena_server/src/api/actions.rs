//! Action dispatch handler.
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/actions \
//!   -H "Content-Type: application/json" \
//!   -d '{"actor_id": 7, "action": "join", "payload": {"tournament_id": 3}}'
//! ```

use axum::{Json, extract::State};
use skill_arena::{ActionEnvelope, ActionOutcome, ArenaError};
use std::time::Instant;

use super::AppState;
use super::error::ApiError;
use super::request_id::RequestId;
use crate::{logging, metrics};

/// Dispatch one action envelope.
///
/// The body is decoded here rather than by the `Json` extractor so that a
/// malformed envelope is reported as a validation error with its own code.
///
/// # Response
///
/// Returns `200 OK` with the tagged outcome, e.g.
/// ```json
/// {"outcome": "joined", "admission": {"tournament": {...}, "participant": {...}, "started": false}}
/// ```
///
/// # Errors
///
/// - `422 Unprocessable Entity`: malformed envelope or invalid input
/// - `409 Conflict`: action not allowed in the current state
/// - `404 Not Found`: unknown user, tournament or transaction
/// - `503 Service Unavailable`: storage conflict or timeout, safe to retry
pub async fn dispatch(
    State(state): State<AppState>,
    request_id: RequestId,
    body: String,
) -> Result<Json<ActionOutcome>, ApiError> {
    let started = Instant::now();

    let envelope: ActionEnvelope = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            let err = ArenaError::from(e);
            metrics::actions_total("malformed", err.code());
            logging::log_dispatch(request_id.as_str(), "malformed", None, err.code(), started.elapsed());
            return Err(err.into());
        }
    };

    let action = envelope.action.name();
    let actor_id = envelope.actor_id;
    let result = state.arena.dispatch(envelope).await;

    let code = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    let elapsed = started.elapsed();
    metrics::actions_total(action, code);
    metrics::action_duration_ms(action, elapsed.as_secs_f64() * 1000.0);
    logging::log_dispatch(request_id.as_str(), action, Some(actor_id), code, elapsed);

    let outcome = result?;
    match &outcome {
        ActionOutcome::TournamentSettled { report } => metrics::settlement(report),
        ActionOutcome::ScoreSubmitted { submission } => {
            if let Some(report) = &submission.settlement {
                metrics::settlement(report);
            }
        }
        _ => {}
    }
    Ok(Json(outcome))
}
