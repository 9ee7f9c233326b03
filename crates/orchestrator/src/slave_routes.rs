//! Slave lifecycle endpoints: register, heartbeat, command pull, unregister.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};

use drover_fleet::{HeartbeatRequest, RegisterRequest};

use crate::{error::fleet_error, state::AppState};

/// `POST /api/slaves/register`
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> impl IntoResponse {
    match state.fleet.register(body).await {
        Ok(outcome) => Json(serde_json::json!({
            "ok": true,
            "outcome": format!("{outcome:?}").to_lowercase(),
            "master_version": state.fleet.master_version(),
        }))
        .into_response(),
        Err(e) => fleet_error(&e),
    }
}

/// `POST /api/slaves/{id}/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(slave_id): Path<String>,
    Json(body): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    match state.fleet.heartbeat(&slave_id, body).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => fleet_error(&e),
    }
}

/// `GET /api/slaves/{id}/commands` — the slave's poll. Drains the queue.
pub async fn pull_commands(
    State(state): State<AppState>,
    Path(slave_id): Path<String>,
) -> impl IntoResponse {
    match state.fleet.drain_commands(&slave_id).await {
        Ok(commands) => Json(serde_json::json!({
            "count": commands.len(),
            "commands": commands,
        }))
        .into_response(),
        Err(e) => fleet_error(&e),
    }
}

/// `POST /api/slaves/{id}/unregister`
pub async fn unregister(
    State(state): State<AppState>,
    Path(slave_id): Path<String>,
) -> impl IntoResponse {
    match state.fleet.unregister(&slave_id).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => fleet_error(&e),
    }
}

/// `GET /api/slaves/list`
pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    let slaves = state.fleet.snapshot().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "count": slaves.len(),
            "slaves": slaves,
        })),
    )
}
