//! Shared helpers for fleet unit tests.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use {tempfile::TempDir, uuid::Uuid};

use {drover_common::VersionInfo, drover_config::FleetConfig};

use crate::{
    Fleet,
    types::{Genome, HeartbeatRequest, RegisterRequest, Resources},
};

/// The commit every test master runs.
pub const MASTER_COMMIT: &str = "abc123";

pub fn master_version() -> VersionInfo {
    VersionInfo {
        git_branch: "main".into(),
        git_commit: MASTER_COMMIT.into(),
        runtime_version: "0.4.2".into(),
    }
}

/// A fleet with a long liveness window so only explicit transitions and the
/// redelivery grace (60 s) matter.
pub async fn fleet() -> (Fleet, TempDir) {
    let cfg = FleetConfig {
        liveness_window_secs: 3600,
        ..FleetConfig::default()
    };
    fleet_with(cfg).await
}

pub async fn fleet_with(cfg: FleetConfig) -> (Fleet, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let fleet = Fleet::load(cfg, dir.path(), master_version()).await.unwrap();
    (fleet, dir)
}

pub async fn register_slave(fleet: &Fleet, slave_id: &str, max_agents: u32) {
    register_slave_with_commit(fleet, slave_id, max_agents, MASTER_COMMIT).await;
}

pub async fn register_slave_with_commit(
    fleet: &Fleet,
    slave_id: &str,
    max_agents: u32,
    commit: &str,
) {
    fleet
        .register(RegisterRequest {
            slave_id: slave_id.to_owned(),
            host: "127.0.0.1".into(),
            port: 7600,
            device_type: Default::default(),
            resources: Resources {
                max_agents,
                ..Resources::default()
            },
            capabilities: Default::default(),
            version: VersionInfo {
                git_commit: commit.into(),
                ..master_version()
            },
            install_method: Default::default(),
            secret_ref: "tok-test".into(),
        })
        .await
        .unwrap();
}

/// Heartbeat reporting the given `(agent_id, status)` pairs at the master's
/// own commit.
pub async fn report_agents(fleet: &Fleet, slave_id: &str, agents: &[(Uuid, &str)]) {
    let request = HeartbeatRequest {
        agents_status: agents
            .iter()
            .map(|(id, status)| (*id, crate::types::AgentReport {
                status: (*status).to_owned(),
            }))
            .collect(),
        resources_usage: Default::default(),
        version: master_version(),
    };
    fleet.heartbeat(slave_id, request).await.unwrap();
}

pub async fn heartbeat_with_commit(fleet: &Fleet, slave_id: &str, commit: &str) {
    let request = HeartbeatRequest {
        version: VersionInfo {
            git_commit: commit.into(),
            ..master_version()
        },
        ..Default::default()
    };
    fleet.heartbeat(slave_id, request).await.unwrap();
}

pub fn genome(prompt: &str) -> Genome {
    Genome::new(serde_json::json!({ "prompt": prompt }))
}

pub async fn agent(fleet: &Fleet, agent_id: Uuid) -> crate::types::HostedAgent {
    fleet
        .agents()
        .await
        .into_iter()
        .find(|a| a.agent_id == agent_id)
        .expect("agent should exist")
}
