//! Wire and registry types shared by the master and its HTTP facade.

use std::collections::HashMap;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    uuid::Uuid,
};

use drover_common::VersionInfo;

// ── Slaves ───────────────────────────────────────────────────────────────────

/// Device class of a worker node; drives the overbooking factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    SingleBoard,
    Desktop,
    Server,
}

/// Master's view of a slave's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaveStatus {
    #[default]
    Unknown,
    Online,
    Degraded,
    VersionMismatch,
    Offline,
}

/// Physical resources a slave offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub cpu_cores: u32,
    pub memory_gb: f64,
    pub max_agents: u32,
    pub gpu_present: bool,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu_cores: 1,
            memory_gb: 1.0,
            max_agents: 1,
            gpu_present: false,
        }
    }
}

/// Software capabilities a slave offers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub llm_providers: Vec<String>,
}

/// How a slave was provisioned. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    Container,
    IsolatedRuntime,
    Native,
    #[default]
    Unknown,
}

/// Most recent load report from a slave.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Average latency the slave observed on recent master calls, used as a
    /// placement tie-breaker.
    pub avg_latency_ms: f64,
}

/// A registered worker node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slave {
    pub slave_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub version: VersionInfo,
    #[serde(default)]
    pub status: SlaveStatus,
    #[serde(default)]
    pub install_method: InstallMethod,
    /// Opaque token id; never the token value.
    #[serde(default)]
    pub secret_ref: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub went_offline_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage: ResourceUsage,
}

impl Slave {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Registration descriptor, as posted to `/api/slaves/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub slave_id: String,
    /// Defaults to loopback for co-located dev fleets.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_slave_port")]
    pub port: u16,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub version: VersionInfo,
    #[serde(default)]
    pub install_method: InstallMethod,
    #[serde(default)]
    pub secret_ref: String,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_slave_port() -> u16 {
    7600
}

/// Heartbeat body, as posted to `/api/slaves/{id}/heartbeat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatRequest {
    pub agents_status: HashMap<Uuid, AgentReport>,
    pub resources_usage: ResourceUsage,
    pub version: VersionInfo,
}

/// One hosted agent as the slave sees it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentReport {
    pub status: String,
}

// ── Agents ───────────────────────────────────────────────────────────────────

/// Opaque behavioral configuration plus its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    pub data: serde_json::Value,
    pub hash: String,
}

impl Genome {
    /// Wrap a raw genome document. An embedded `hash` field is honored;
    /// otherwise the hash is the SHA-256 of the serialized bytes.
    pub fn new(data: serde_json::Value) -> Self {
        let hash = data
            .get("hash")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| content_hash(&data));
        Self { data, hash }
    }
}

fn content_hash(data: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(data).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{digest:x}")
}

/// Master's view of a hosted agent's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    PendingDeploy,
    Active,
    PendingDestroy,
    PendingUpdate,
    Orphaned,
}

impl AgentStatus {
    /// Pending states wait on the owning slave to confirm a command.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            AgentStatus::PendingDeploy | AgentStatus::PendingDestroy | AgentStatus::PendingUpdate
        )
    }
}

/// A logical agent instance placed on exactly one slave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedAgent {
    pub agent_id: Uuid,
    pub genome: Genome,
    pub slave_id: String,
    pub placed_at: DateTime<Utc>,
    pub status: AgentStatus,
    pub status_changed_at: DateTime<Utc>,
}

/// Placement record, as returned by `/api/agents/placements`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub slave_id: String,
    pub placed_at: DateTime<Utc>,
}

// ── Commands ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    DeployAgent,
    DestroyAgent,
    UpdateGenome,
}

/// A directive queued for one slave, delivered at-least-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: Uuid,
    pub slave_id: String,
    pub kind: CommandKind,
    pub agent_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genome: Option<Genome>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deliveries: u32,
}

impl Command {
    pub fn new(slave_id: &str, kind: CommandKind, agent_id: Uuid, genome: Option<Genome>) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            slave_id: slave_id.to_owned(),
            kind,
            agent_id,
            genome,
            enqueued_at: Utc::now(),
            delivered_at: None,
            deliveries: 0,
        }
    }
}

// ── Aggregates ───────────────────────────────────────────────────────────────

/// Aggregate counts for `/api/cluster/stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterStats {
    pub slaves: SlaveCounts,
    pub agents: AgentCounts,
    pub capacity: CapacityStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlaveCounts {
    pub total: usize,
    pub online: usize,
    pub degraded: usize,
    pub version_mismatch: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCounts {
    pub total: usize,
    pub active: usize,
    pub pending: usize,
    pub orphaned: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapacityStats {
    /// Logical slots across online slaves, overbooking applied.
    pub total_slots: usize,
    pub used_slots: usize,
    pub utilization_percent: f64,
}
