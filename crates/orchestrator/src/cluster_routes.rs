//! Aggregate views: stats, dashboard, liveness.

use axum::{
    extract::State,
    response::{IntoResponse, Json},
};

use crate::state::AppState;

/// `GET /api/cluster/stats`
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.fleet.cluster_stats().await;
    let overbooking = &state.fleet.config().overbooking;
    Json(serde_json::json!({
        "slaves": stats.slaves,
        "agents": stats.agents,
        "capacity": stats.capacity,
        "overbooking": {
            "single_board": overbooking.single_board,
            "desktop": overbooking.desktop,
            "server": overbooking.server,
        },
    }))
}

/// `GET /api/cluster/dashboard`
///
/// Always answers 200: a broken component is data, not a server error.
pub async fn dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.fleet.cluster_stats().await;
    let installs = state.installs.summary().await;
    let pending_requests = state.requests.pending_count().await;
    let overbooking = &state.fleet.config().overbooking;

    let fleet_health = if stats.slaves.total == 0 {
        "empty"
    } else if stats.slaves.online == 0 {
        "degraded"
    } else if stats.slaves.offline + stats.slaves.degraded + stats.slaves.version_mismatch > 0 {
        "partial"
    } else {
        "ok"
    };

    Json(serde_json::json!({
        "status": "ok",
        "master_version": state.fleet.master_version(),
        "uptime_secs": state.uptime_secs(),
        "components": {
            "registry": { "status": fleet_health, "slaves": stats.slaves },
            "pool": { "status": "ok", "agents": stats.agents, "capacity": stats.capacity },
            "installer": { "status": if installs.in_progress > 0 { "busy" } else { "idle" }, "runs": installs },
            "human_requests": { "status": if pending_requests > 0 { "attention" } else { "ok" }, "pending": pending_requests },
        },
        "overbooking": {
            "single_board": overbooking.single_board,
            "desktop": overbooking.desktop,
            "server": overbooking.server,
        },
    }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.fleet.cluster_stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.fleet.master_version(),
        "slaves_online": stats.slaves.online,
        "agents_active": stats.agents.active,
        "pending_requests": state.requests.pending_count().await,
    }))
}
