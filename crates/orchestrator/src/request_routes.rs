//! Human-request approval endpoints.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
};

use serde::Deserialize;

use crate::{error::request_error, state::AppState};

/// `GET /api/requests/pending`
pub async fn pending(State(state): State<AppState>) -> impl IntoResponse {
    let requests = state.requests.list_pending().await;
    Json(serde_json::json!({
        "count": requests.len(),
        "requests": requests,
    }))
}

/// `POST /api/requests/{id}/approve`
pub async fn approve(
    State(state): State<AppState>,
    Path(request_id): Path<u64>,
) -> impl IntoResponse {
    match state.requests.approve(request_id).await {
        Ok(request) => Json(request).into_response(),
        Err(e) => request_error(&e),
    }
}

/// `POST /api/requests/{id}/reject`
pub async fn reject(
    State(state): State<AppState>,
    Path(request_id): Path<u64>,
) -> impl IntoResponse {
    match state.requests.reject(request_id).await {
        Ok(request) => Json(request).into_response(),
        Err(e) => request_error(&e),
    }
}

#[derive(Deserialize, Default)]
pub struct CompleteBody {
    #[serde(default)]
    actual_cost: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
}

/// `POST /api/requests/{id}/complete` — body optional.
pub async fn complete(
    State(state): State<AppState>,
    Path(request_id): Path<u64>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let body: CompleteBody = if body.is_empty() {
        CompleteBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(_) => return crate::error::bad_request("body must be JSON"),
        }
    };
    match state
        .requests
        .complete(request_id, body.actual_cost, body.notes)
        .await
    {
        Ok(request) => Json(request).into_response(),
        Err(e) => request_error(&e),
    }
}
