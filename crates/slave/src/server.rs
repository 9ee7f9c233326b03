//! The slave's HTTP surface.
//!
//! `/execute` makes this node its own bootstrap: the remote installer
//! drives provisioning through it under the shared bearer token. It runs
//! arbitrary shell, which is exactly why it is bearer-gated and the token
//! is pre-shared out of band.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    serde::Deserialize,
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use crate::runtime::SlaveRuntime;

/// Ceiling for a single `/execute` command.
const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

pub fn build_router(runtime: Arc<SlaveRuntime>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/execute", post(execute))
        .route("/commands", get(applied_commands))
        .layer(TraceLayer::new_for_http())
        .with_state(runtime)
}

async fn health(State(runtime): State<Arc<SlaveRuntime>>) -> impl IntoResponse {
    let agents: serde_json::Map<String, serde_json::Value> = runtime
        .host
        .report()
        .await
        .into_iter()
        .map(|(id, report)| {
            (
                id.to_string(),
                serde_json::json!({ "status": report.status }),
            )
        })
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "runtime_version": runtime.version.runtime_version,
        "git_commit": runtime.version.git_commit,
        "git_branch": runtime.version.git_branch,
        "available_strategies": runtime.available_strategies,
        "agents": agents,
    }))
}

async fn version(State(runtime): State<Arc<SlaveRuntime>>) -> impl IntoResponse {
    Json(runtime.version.clone())
}

/// Recently applied commands, for operators poking at a node.
async fn applied_commands(State(runtime): State<Arc<SlaveRuntime>>) -> impl IntoResponse {
    let applied = runtime.applied.lock().await;
    Json(serde_json::json!({
        "count": applied.len(),
        "commands": applied.iter().cloned().collect::<Vec<_>>(),
    }))
}

#[derive(Deserialize)]
struct ExecuteBody {
    command: String,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

async fn execute(
    State(runtime): State<Arc<SlaveRuntime>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ExecuteBody>,
) -> impl IntoResponse {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if !matches!(presented, Some(token) if runtime.token.matches(token)) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "missing or invalid bearer token",
                "kind": "auth",
            })),
        )
            .into_response();
    }

    if body.command.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "no command provided",
                "kind": "bad_request",
            })),
        )
            .into_response();
    }

    let timeout = body
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(MAX_COMMAND_TIMEOUT)
        .min(MAX_COMMAND_TIMEOUT);

    info!(command = %body.command, "executing remote command");
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(&body.command);
    if let Some(ref dir) = body.working_dir {
        cmd.current_dir(dir);
    }

    let output = tokio::time::timeout(timeout, cmd.output()).await;
    let result = match output {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(-1);
            serde_json::json!({
                "success": output.status.success(),
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
                "exit_code": exit_code,
            })
        },
        Ok(Err(e)) => {
            warn!(error = %e, "command spawn failed");
            serde_json::json!({
                "success": false,
                "stdout": "",
                "stderr": e.to_string(),
                "exit_code": -1,
            })
        },
        Err(_) => serde_json::json!({
            "success": false,
            "stdout": "",
            "stderr": format!("timed out after {}s", timeout.as_secs()),
            "exit_code": -1,
        }),
    };

    Json(result).into_response()
}
