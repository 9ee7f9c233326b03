use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// The host being provisioned. `credentials_ref` is an opaque pointer into
/// whatever secret store the operator uses; it is logged, never resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallTarget {
    pub host: String,
    #[serde(default = "default_bootstrap_port")]
    pub port: u16,
    #[serde(default)]
    pub credentials_ref: String,
}

fn default_bootstrap_port() -> u16 {
    7600
}

impl InstallTarget {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Provisioning strategies, in fixed preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Container,
    IsolatedRuntime,
    Native,
}

impl StrategyKind {
    pub const ORDER: [StrategyKind; 3] = [
        StrategyKind::Container,
        StrategyKind::IsolatedRuntime,
        StrategyKind::Native,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Succeeded,
    FailedConnectivity,
    FailedPrereq,
    FailedClone,
    FailedAllStrategies,
    Escalated,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        *self != RunStatus::InProgress
    }
}

/// Classified failure cause, kept alongside the terminal status so an
/// escalated run still says why it escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallFailure {
    Connectivity,
    Prereq,
    Clone,
    AllStrategiesExhausted,
}

/// One attempt of one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: StrategyKind,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// One remote command and what it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallLogEntry {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// One execution of the install pipeline against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationRun {
    pub run_id: Uuid,
    pub target: InstallTarget,
    pub status: RunStatus,
    #[serde(default)]
    pub failure: Option<InstallFailure>,
    #[serde(default)]
    pub strategy_attempts: Vec<StrategyAttempt>,
    #[serde(default)]
    pub log: Vec<InstallLogEntry>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resulting_slave_id: Option<String>,
    /// Set when the run escalated into the human-request queue.
    #[serde(default)]
    pub escalation_request_id: Option<u64>,
}

impl InstallationRun {
    pub fn new(target: InstallTarget) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target,
            status: RunStatus::InProgress,
            failure: None,
            strategy_attempts: Vec::new(),
            log: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            resulting_slave_id: None,
            escalation_request_id: None,
        }
    }
}
