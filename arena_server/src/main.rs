//! Skill arena HTTP server.
//!
//! Serves the action envelope, payment callbacks and read endpoints over a
//! PostgreSQL or in-memory store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use arena_server::api::{self, AppState};
use arena_server::config::{Overrides, ServerConfig, StorageBackend};
use arena_server::{logging, metrics};
use ctrlc::set_handler;
use pico_args::Arguments;
use skill_arena::Arena;
use skill_arena::db::{ArenaStore, Database, MemoryStore, PgStore};
use tokio::sync::oneshot;
use tracing::info;

const HELP: &str = "\
Run the skill arena tournament server

USAGE:
  arena_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     HTTP bind address           [default: env SERVER_BIND or 127.0.0.1:8080]
  --metrics    IP:PORT     Prometheus listener address [default: env METRICS_BIND or disabled]
  --storage    BACKEND     postgres or memory          [default: env STORAGE_BACKEND or postgres]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              HTTP bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  WITHDRAWAL_COMMISSION    Withdrawal commission rate
  MIN_WITHDRAWAL_AMOUNT    Smallest accepted withdrawal
  (See .env.example for all configuration options)
";

fn parse_overrides(pargs: &mut Arguments) -> Result<Overrides, Error> {
    Ok(Overrides {
        bind: pargs.opt_value_from_str::<_, SocketAddr>("--bind")?,
        metrics_bind: pargs.opt_value_from_str::<_, SocketAddr>("--metrics")?,
        storage: pargs.opt_value_from_str::<_, StorageBackend>("--storage")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        return Ok(());
    }

    let overrides = parse_overrides(&mut pargs)?;
    logging::init();

    let config = ServerConfig::from_env(overrides).context("Invalid configuration")?;
    info!("Starting skill arena server at {} ({} storage)", config.bind, config.storage);

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(anyhow::Error::msg)?;
        info!("Prometheus metrics on http://{}/metrics", addr);
    }

    let (store, database): (Arc<dyn ArenaStore>, Option<Database>) = match &config.database {
        Some(db_config) => {
            let db = Database::new(db_config)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to apply migrations")?;
            info!("Database connected and migrated");
            let store: Arc<dyn ArenaStore> =
                Arc::new(PgStore::new(db.pool().clone(), config.arena.conflict_retry));
            (store, Some(db))
        }
        None => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            let store: Arc<dyn ArenaStore> = Arc::new(MemoryStore::new());
            (store, None)
        }
    };

    let arena = Arena::new(store, config.arena.clone());
    let app = api::create_router(AppState::new(arena, database.clone()));

    // Catching signals for a graceful exit.
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut shutdown_tx = Some(shutdown_tx);
    set_handler(move || {
        if let Some(tx) = shutdown_tx.take() {
            let _ = tx.send(());
        }
    })?;

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .context("Server error")?;

    info!("Shutting down server...");
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}
