//! Agent lifecycle endpoints: deploy, destroy, update, placements.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};

use {drover_fleet::Genome, serde::Deserialize, uuid::Uuid};

use crate::{
    error::{bad_request, fleet_error},
    state::AppState,
};

#[derive(Deserialize)]
pub struct DeployBody {
    genome: serde_json::Value,
}

/// `POST /api/agents/deploy`
pub async fn deploy(
    State(state): State<AppState>,
    Json(body): Json<DeployBody>,
) -> impl IntoResponse {
    let genome = Genome::new(body.genome);
    match state.fleet.deploy(genome).await {
        Ok(agent_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "agent_id": agent_id })),
        )
            .into_response(),
        Err(e) => fleet_error(&e),
    }
}

/// `POST /api/agents/{id}/destroy`
pub async fn destroy(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    let Ok(agent_id) = agent_id.parse::<Uuid>() else {
        return bad_request("agent id must be a UUID");
    };
    match state.fleet.destroy_agent(agent_id).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => fleet_error(&e),
    }
}

#[derive(Deserialize)]
pub struct UpdateGenomeBody {
    genome: serde_json::Value,
}

/// `POST /api/agents/{id}/update_genome`
pub async fn update_genome(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<UpdateGenomeBody>,
) -> impl IntoResponse {
    let Ok(agent_id) = agent_id.parse::<Uuid>() else {
        return bad_request("agent id must be a UUID");
    };
    match state
        .fleet
        .update_genome(agent_id, Genome::new(body.genome))
        .await
    {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => fleet_error(&e),
    }
}

/// `GET /api/agents/placements`
pub async fn placements(State(state): State<AppState>) -> impl IntoResponse {
    let placements = state.fleet.placements().await;
    Json(serde_json::json!({ "placements": placements }))
}
