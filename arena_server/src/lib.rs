//! HTTP surface for the skill arena settlement engine.
//!
//! The binary in `main.rs` wires configuration, storage and logging; this
//! library exposes the router so it can be driven in tests.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
