//! Bearer auth for write endpoints.
//!
//! Authorization is a single flat capability: callers either present the
//! shared secret or they do not. Read endpoints stay open for local use.

use axum::{
    extract::State,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

use crate::state::AppState;

/// Middleware guarding mutating routes with `Authorization: Bearer <token>`.
pub async fn require_auth(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if state.token.matches(token) => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "missing or invalid bearer token",
                "kind": "auth",
            })),
        )
            .into_response(),
    }
}
