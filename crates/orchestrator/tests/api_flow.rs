//! End-to-end facade tests over a real listener.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use {
    drover_common::{VersionInfo, token::SharedToken},
    drover_config::FleetConfig,
    drover_fleet::Fleet,
    drover_installer::InstallStore,
    drover_orchestrator::{AppState, build_router},
    drover_requests::{HumanRequestStore, NewRequest, RequestKind},
    serde_json::{Value, json},
};

const TOKEN: &str = "test-token";
const MASTER_COMMIT: &str = "abc123";

async fn spawn_master() -> (String, AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let version = VersionInfo {
        git_branch: "main".into(),
        git_commit: MASTER_COMMIT.into(),
        runtime_version: "0.4.2".into(),
    };
    let cfg = FleetConfig {
        liveness_window_secs: 3600,
        ..FleetConfig::default()
    };
    let fleet = Arc::new(Fleet::load(cfg, dir.path(), version).await.unwrap());
    let installs = Arc::new(InstallStore::load(dir.path()).await.unwrap());
    let requests = Arc::new(HumanRequestStore::load(dir.path()).await.unwrap());
    let state = AppState::new(fleet, installs, requests, SharedToken::new(TOKEN));

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state, dir)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn register_slave(base: &str, slave_id: &str, commit: &str) -> reqwest::Response {
    client()
        .post(format!("{base}/api/slaves/register"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "slave_id": slave_id,
            "host": "192.168.1.20",
            "port": 7600,
            "device_type": "single_board",
            "resources": { "max_agents": 8 },
            "capabilities": { "llm_providers": ["groq"] },
            "version": { "git_commit": commit },
        }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn register_then_deploy_queues_one_command() {
    let (base, _state, _dir) = spawn_master().await;

    let resp = register_slave(&base, "raspi-001", MASTER_COMMIT).await;
    assert_eq!(resp.status(), 200);

    let resp = client()
        .post(format!("{base}/api/agents/deploy"))
        .bearer_auth(TOKEN)
        .json(&json!({ "genome": { "prompt": "x", "hash": "h1" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    let agent_id = body["agent_id"].as_str().unwrap().to_owned();

    let commands: Value = client()
        .get(format!("{base}/api/slaves/raspi-001/commands"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(commands["count"], 1);
    assert_eq!(commands["commands"][0]["kind"], "deploy_agent");
    assert_eq!(commands["commands"][0]["agent_id"], agent_id.as_str());
    assert_eq!(commands["commands"][0]["genome"]["hash"], "h1");

    // The queue is empty on a second drain.
    let commands: Value = client()
        .get(format!("{base}/api/slaves/raspi-001/commands"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(commands["count"], 0);
}

#[tokio::test]
async fn heartbeat_activates_agent_and_updates_placements() {
    let (base, _state, _dir) = spawn_master().await;
    register_slave(&base, "raspi-001", MASTER_COMMIT).await;

    let deploy: Value = client()
        .post(format!("{base}/api/agents/deploy"))
        .bearer_auth(TOKEN)
        .json(&json!({ "genome": { "prompt": "x", "hash": "h1" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let agent_id = deploy["agent_id"].as_str().unwrap().to_owned();

    let mut heartbeat = json!({
        "agents_status": {},
        "version": { "git_commit": MASTER_COMMIT },
    });
    heartbeat["agents_status"][agent_id.as_str()] = json!({ "status": "active" });
    let resp = client()
        .post(format!("{base}/api/slaves/raspi-001/heartbeat"))
        .bearer_auth(TOKEN)
        .json(&heartbeat)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let placements: Value = client()
        .get(format!("{base}/api/agents/placements"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        placements["placements"][agent_id.as_str()]["slave_id"],
        "raspi-001"
    );
}

#[tokio::test]
async fn version_mismatch_slave_yields_no_capacity() {
    let (base, _state, _dir) = spawn_master().await;
    register_slave(&base, "raspi-002", "def456").await;

    let resp = client()
        .post(format!("{base}/api/agents/deploy"))
        .bearer_auth(TOKEN)
        .json(&json!({ "genome": { "prompt": "x" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "no_capacity");
}

#[tokio::test]
async fn conflicting_registration_is_409() {
    let (base, _state, _dir) = spawn_master().await;
    register_slave(&base, "raspi-001", MASTER_COMMIT).await;

    let resp = client()
        .post(format!("{base}/api/slaves/register"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "slave_id": "raspi-001",
            "host": "192.168.1.99",
            "port": 7600,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn writes_require_bearer_token() {
    let (base, _state, _dir) = spawn_master().await;

    let resp = client()
        .post(format!("{base}/api/slaves/register"))
        .json(&json!({ "slave_id": "raspi-001", "host": "h" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "auth");

    let resp = client()
        .post(format!("{base}/api/slaves/register"))
        .bearer_auth("wrong-token")
        .json(&json!({ "slave_id": "raspi-001", "host": "h" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Reads stay open for local use.
    let resp = client()
        .get(format!("{base}/api/slaves/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn unregister_then_command_pull_is_404() {
    let (base, _state, _dir) = spawn_master().await;
    register_slave(&base, "raspi-001", MASTER_COMMIT).await;

    let resp = client()
        .post(format!("{base}/api/slaves/raspi-001/unregister"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client()
        .get(format!("{base}/api/slaves/raspi-001/commands"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn slave_death_orphans_agent_and_recovery_re_places_it() {
    let (base, state, _dir) = spawn_master().await;
    register_slave(&base, "raspi-001", MASTER_COMMIT).await;

    // Place the agent and pin it to its slave via a heartbeat.
    let deploy: Value = client()
        .post(format!("{base}/api/agents/deploy"))
        .bearer_auth(TOKEN)
        .json(&json!({ "genome": { "prompt": "x", "hash": "h1" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let agent_id = deploy["agent_id"].as_str().unwrap().to_owned();
    let hosting = state.fleet.placements().await.values().next().unwrap().slave_id.clone();
    assert_eq!(hosting, "raspi-001");

    client()
        .get(format!("{base}/api/slaves/raspi-001/commands"))
        .send()
        .await
        .unwrap();
    let mut heartbeat = json!({
        "agents_status": {},
        "version": { "git_commit": MASTER_COMMIT },
    });
    heartbeat["agents_status"][agent_id.as_str()] = json!({ "status": "active" });
    client()
        .post(format!("{base}/api/slaves/raspi-001/heartbeat"))
        .bearer_auth(TOKEN)
        .json(&heartbeat)
        .send()
        .await
        .unwrap();

    // A second healthy slave stands by.
    register_slave(&base, "raspi-002", MASTER_COMMIT).await;

    // raspi-001 stops heartbeating past the liveness window.
    state.fleet.mark_offline("raspi-001").await.unwrap();
    let recovered = state.fleet.recover_orphans().await.unwrap();
    assert_eq!(recovered, 1);

    // The survivor's queue now carries the same agent with the same genome.
    let commands: Value = client()
        .get(format!("{base}/api/slaves/raspi-002/commands"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(commands["count"], 1);
    assert_eq!(commands["commands"][0]["kind"], "deploy_agent");
    assert_eq!(commands["commands"][0]["agent_id"], agent_id.as_str());
    assert_eq!(commands["commands"][0]["genome"]["hash"], "h1");
}

#[tokio::test]
async fn human_request_lifecycle_over_http() {
    let (base, state, _dir) = spawn_master().await;

    let created = state
        .requests
        .create(NewRequest {
            kind: RequestKind::Payment,
            title: "Renew domain".into(),
            description: "expires soon".into(),
            estimated_cost: Some(15.0),
            priority: 8,
            created_by: "operator".into(),
        })
        .await
        .unwrap();

    let pending: Value = client()
        .get(format!("{base}/api/requests/pending"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending["count"], 1);

    let resp = client()
        .post(format!("{base}/api/requests/{}/approve", created.request_id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["state"], "approved");

    let resp = client()
        .post(format!("{base}/api/requests/{}/complete", created.request_id))
        .bearer_auth(TOKEN)
        .json(&json!({ "actual_cost": 14.88 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["state"], "completed");
    assert_eq!(body["actual_cost"], 14.88);
    assert_eq!(body["estimated_cost"], 15.0);
    assert!(body["completed_at"].is_string());

    // Rejecting a completed request is an illegal transition.
    let resp = client()
        .post(format!("{base}/api/requests/{}/reject", created.request_id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_state_transition");
}

#[tokio::test]
async fn installation_callbacks_round_trip() {
    let (base, _state, _dir) = spawn_master().await;

    let started: Value = client()
        .post(format!("{base}/api/installation/start"))
        .bearer_auth(TOKEN)
        .json(&json!({ "host": "192.168.1.50", "port": 7600 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let run_id = started["run_id"].as_str().unwrap().to_owned();

    let resp = client()
        .post(format!("{base}/api/installation/progress"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "run_id": run_id,
            "command": "git --version",
            "stdout": "git version 2.43.0",
            "exit_code": 0,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client()
        .post(format!("{base}/api/installation/complete"))
        .bearer_auth(TOKEN)
        .json(&json!({ "run_id": run_id, "slave_id": "slave-192-168-1-50" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let detail: Value = client()
        .get(format!("{base}/api/installation/{run_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["status"], "succeeded");
    assert_eq!(detail["resulting_slave_id"], "slave-192-168-1-50");
    assert_eq!(detail["log"].as_array().unwrap().len(), 1);

    let status: Value = client()
        .get(format!("{base}/api/installation/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["summary"]["succeeded"], 1);
}

#[tokio::test]
async fn dashboard_always_succeeds() {
    let (base, _state, _dir) = spawn_master().await;

    // Empty fleet: still 200.
    let resp = client()
        .get(format!("{base}/api/cluster/dashboard"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["components"]["registry"]["status"], "empty");

    // Mismatched-only fleet: reported as data, not an error.
    register_slave(&base, "raspi-002", "def456").await;
    let resp = client()
        .get(format!("{base}/api/cluster/dashboard"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["components"]["registry"]["status"], "degraded");
    assert_eq!(body["overbooking"]["server"], 2.0);

    let health: Value = client()
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
}
