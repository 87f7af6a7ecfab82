//! HTTP API for the skill arena.
//!
//! The router is a thin transport over [`skill_arena::Arena`]: request bodies
//! are decoded into the action envelope or a payment confirmation, and
//! [`skill_arena::ArenaError`] kinds are mapped to HTTP statuses.
//!
//! # Modules
//!
//! - [`actions`]: action envelope dispatch
//! - [`payments`]: payment gateway callbacks
//! - [`tournaments`]: tournament listing and details
//! - [`wallets`]: user balance and recent transactions
//! - [`error`]: error kind to status mapping
//! - [`request_id`]: request correlation middleware
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                         - Health check
//! POST /api/actions                    - Dispatch an action envelope
//! POST /api/payments/confirm           - Payment gateway callback
//! GET  /api/tournaments                - List tournaments (?status=&limit=)
//! GET  /api/tournaments/{id}           - Tournament with its participants
//! GET  /api/users/{id}/wallet          - Balance and recent transactions
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use arena_server::api::{create_router, AppState};
//! use skill_arena::{Arena, ArenaConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let state = AppState::new(Arena::in_memory(ArenaConfig::default()), None);
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # CORS
//!
//! CORS is configured permissively for development. In production, configure
//! appropriate origins, methods, and headers.

pub mod actions;
pub mod error;
pub mod payments;
pub mod request_id;
pub mod tournaments;
pub mod wallets;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use skill_arena::Arena;
use skill_arena::db::Database;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; the arena managers are reference counted.
#[derive(Clone)]
pub struct AppState {
    pub arena: Arena,
    /// Connection pool checked by `/health`; `None` for the memory backend
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(arena: Arena, database: Option<Database>) -> Self {
        Self { arena, database }
    }
}

/// Create the complete API router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/actions", post(actions::dispatch))
        .route("/payments/confirm", post(payments::confirm))
        .route("/tournaments", get(tournaments::list_tournaments))
        .route("/tournaments/{tournament_id}", get(tournaments::get_tournament))
        .route("/users/{user_id}/wallet", get(wallets::get_wallet));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(request_id::request_id_middleware))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when storage answers, `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","storage":"postgres","database":true,"timestamp":"..."}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (storage, db_healthy) = match &state.database {
        Some(db) => ("postgres", db.health_check().await.is_ok()),
        None => ("memory", true),
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage,
        "database": db_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
