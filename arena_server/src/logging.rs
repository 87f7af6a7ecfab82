//! Structured logging configuration.
//!
//! Engine crates log through the `log` facade; the subscriber installed here
//! forwards those records into `tracing` together with request-scoped events.

use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Dispatches slower than this are logged at warn level
const SLOW_DISPATCH: Duration = Duration::from_millis(1000);

/// Initialize structured logging
///
/// Log levels are configurable via the `RUST_LOG` env var.
///
/// # Example
///
/// ```no_run
/// use arena_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log the result of one dispatched action
///
/// # Arguments
///
/// * `request_id` - Correlation id of the HTTP request
/// * `action` - Action name
/// * `actor_id` - Acting user, when the envelope could be decoded
/// * `code` - `"ok"` or the error code
/// * `elapsed` - Time spent dispatching
pub fn log_dispatch(
    request_id: &str,
    action: &str,
    actor_id: Option<i64>,
    code: &str,
    elapsed: Duration,
) {
    let duration_ms = elapsed.as_millis() as u64;
    if elapsed > SLOW_DISPATCH {
        tracing::warn!(
            request_id = request_id,
            action = action,
            actor_id = actor_id,
            code = code,
            duration_ms = duration_ms,
            "PERFORMANCE: Slow action"
        );
    } else {
        tracing::info!(
            request_id = request_id,
            action = action,
            actor_id = actor_id,
            code = code,
            duration_ms = duration_ms,
            "Action dispatched"
        );
    }
}

/// Log a payment gateway callback
pub fn log_payment_confirmation(request_id: &str, transaction_id: i64, code: &str, applied: bool) {
    tracing::info!(
        request_id = request_id,
        transaction_id = transaction_id,
        code = code,
        applied = applied,
        "Payment confirmation handled"
    );
}
