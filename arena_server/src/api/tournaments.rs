//! Tournament read handlers.
//!
//! Mutations go through `POST /api/actions`; these endpoints only read.
//!
//! ```bash
//! curl "http://localhost:8080/api/tournaments?status=registration&limit=20"
//! ```

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use skill_arena::tournament::{Participant, Tournament, TournamentId, TournamentStatus};

use super::AppState;
use super::error::ApiError;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<TournamentStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TournamentDetails {
    pub tournament: Tournament,
    /// Every entry, including participants who left
    pub participants: Vec<Participant>,
}

/// Clamp a client-provided page size
pub(crate) fn page_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// List tournaments, newest first.
///
/// # Errors
///
/// - `400 Bad Request`: unknown status in the query string
pub async fn list_tournaments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Tournament>>, ApiError> {
    let tournaments = state
        .arena
        .tournaments()
        .list(query.status, page_limit(query.limit))
        .await?;
    Ok(Json(tournaments))
}

/// Get a tournament with its participant rows.
///
/// # Errors
///
/// - `404 Not Found`: tournament doesn't exist
pub async fn get_tournament(
    State(state): State<AppState>,
    Path(tournament_id): Path<TournamentId>,
) -> Result<Json<TournamentDetails>, ApiError> {
    let tournaments = state.arena.tournaments();
    let tournament = tournaments.get(tournament_id).await?;
    let participants = tournaments.participants(tournament_id).await?;
    Ok(Json(TournamentDetails {
        tournament,
        participants,
    }))
}
