//! Installation-run callbacks and views.
//!
//! The remote installer (or the target itself, once its bootstrap is up)
//! drives `start` / `progress` / `complete`; reads serve operators.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};

use {
    chrono::Utc,
    drover_installer::{InstallLogEntry, InstallTarget},
    serde::Deserialize,
    uuid::Uuid,
};

use crate::{
    error::{bad_request, installer_error},
    state::AppState,
};

/// `POST /api/installation/start`
pub async fn start(
    State(state): State<AppState>,
    Json(target): Json<InstallTarget>,
) -> impl IntoResponse {
    match state.installs.start(target).await {
        Ok(run) => Json(serde_json::json!({ "run_id": run.run_id })).into_response(),
        Err(e) => installer_error(&e),
    }
}

#[derive(Deserialize)]
pub struct ProgressBody {
    run_id: Uuid,
    command: String,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    strategy: Option<drover_installer::StrategyKind>,
}

/// `POST /api/installation/progress`
pub async fn progress(
    State(state): State<AppState>,
    Json(body): Json<ProgressBody>,
) -> impl IntoResponse {
    let entry = InstallLogEntry {
        at: Utc::now(),
        strategy: body.strategy,
        command: body.command,
        stdout: body.stdout,
        stderr: body.stderr,
        exit_code: body.exit_code,
    };
    match state.installs.append_progress(body.run_id, entry).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => installer_error(&e),
    }
}

#[derive(Deserialize)]
pub struct CompleteBody {
    run_id: Uuid,
    slave_id: String,
}

/// `POST /api/installation/complete`
pub async fn complete(
    State(state): State<AppState>,
    Json(body): Json<CompleteBody>,
) -> impl IntoResponse {
    match state.installs.complete(body.run_id, body.slave_id).await {
        Ok(run) => Json(serde_json::json!({
            "ok": true,
            "run_id": run.run_id,
            "resulting_slave_id": run.resulting_slave_id,
        }))
        .into_response(),
        Err(e) => installer_error(&e),
    }
}

/// `GET /api/installation/status`
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.installs.summary().await;
    let runs: Vec<serde_json::Value> = state
        .installs
        .list()
        .await
        .into_iter()
        .map(|run| {
            serde_json::json!({
                "run_id": run.run_id,
                "host": run.target.host,
                "status": run.status,
                "started_at": run.started_at,
                "ended_at": run.ended_at,
            })
        })
        .collect();
    Json(serde_json::json!({ "summary": summary, "runs": runs }))
}

/// `GET /api/installation/{id}`
pub async fn detail(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    let Ok(run_id) = run_id.parse::<Uuid>() else {
        return bad_request("run id must be a UUID");
    };
    match state.installs.get(run_id).await {
        Some(run) => Json(run).into_response(),
        None => installer_error(&drover_installer::Error::NotFound(run_id)),
    }
}
