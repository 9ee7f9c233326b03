//! Error → HTTP response mapping. Bodies are always `{error, kind}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

pub fn fleet_error(e: &drover_fleet::Error) -> Response {
    use drover_fleet::Error;
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) | Error::VersionMismatch { .. } => StatusCode::CONFLICT,
        Error::NoCapacity => StatusCode::SERVICE_UNAVAILABLE,
        Error::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    body(status, &e.to_string(), e.kind())
}

pub fn request_error(e: &drover_requests::Error) -> Response {
    use drover_requests::Error;
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        Error::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    body(status, &e.to_string(), e.kind())
}

pub fn installer_error(e: &drover_installer::Error) -> Response {
    use drover_installer::Error;
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    body(status, &e.to_string(), e.kind())
}

pub fn bad_request(message: &str) -> Response {
    body(StatusCode::BAD_REQUEST, message, "bad_request")
}

fn body(status: StatusCode, error: &str, kind: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": error, "kind": kind })),
    )
        .into_response()
}
