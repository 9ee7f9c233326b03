//! Orchestrator: the master's public HTTP facade and process wiring.
//!
//! Lifecycle:
//! 1. Load config, capture the master's version fingerprint
//! 2. Load fleet / installation / human-request stores from the data dir
//! 3. Start the HTTP server and the health monitor
//! 4. On shutdown: cancel the monitor, drain requests with a deadline,
//!    persist the final snapshot
//!
//! All state is injected through [`state::AppState`]; nothing lives in
//! process globals, so tests can stand up isolated masters.

pub mod agent_routes;
pub mod auth;
pub mod cluster_routes;
pub mod error;
pub mod install_routes;
pub mod request_routes;
pub mod server;
pub mod slave_routes;
pub mod state;

pub use {
    server::{build_router, run},
    state::AppState,
};
