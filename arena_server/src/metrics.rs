//! Prometheus metrics for monitoring the arena server.
//!
//! Metrics are exposed in Prometheus text format on a separate listener.
//! Without an installed exporter every recording call is a no-op.
//!
//! # Metrics Categories
//!
//! - **Action Metrics**: dispatches by action and result code, latency
//! - **Payment Metrics**: gateway callbacks and redeliveries
//! - **Settlement Metrics**: settlement results and outstanding payouts
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use arena_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::actions_total("join", "ok");
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use skill_arena::tournament::SettlementReport;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// Action Metrics
// ============================================================================

/// Count one dispatched action with its result code (`ok` on success)
pub fn actions_total(action: &str, code: &str) {
    metrics::counter!("arena_actions_total",
        "action" => action.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}

/// Record dispatch latency in milliseconds.
pub fn action_duration_ms(action: &str, duration_ms: f64) {
    metrics::histogram!("arena_action_duration_ms",
        "action" => action.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Payment Metrics
// ============================================================================

/// Count one gateway callback; `applied` is false for redeliveries
pub fn payment_confirmations_total(code: &str, applied: bool) {
    metrics::counter!("arena_payment_confirmations_total",
        "code" => code.to_string(),
        "applied" => applied.to_string()
    )
    .increment(1);
}

// ============================================================================
// Settlement Metrics
// ============================================================================

/// Count a settlement result and any payouts it left outstanding
pub fn settlement(report: &SettlementReport) {
    let result = match report {
        SettlementReport::Completed { .. } => "completed",
        SettlementReport::PayoutsOutstanding { failed, .. } => {
            metrics::counter!("arena_payout_failures_total").increment(failed.len() as u64);
            "payouts_outstanding"
        }
        SettlementReport::InProgress { .. } => "in_progress",
        SettlementReport::AlreadySettled { .. } => "already_settled",
    };
    metrics::counter!("arena_settlements_total", "result" => result).increment(1);
}
