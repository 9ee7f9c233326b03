use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// What kind of decision is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Payment,
    DesignDecision,
    ApiAccount,
    ContentApproval,
    StrategicDecision,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

/// A paused action awaiting an external decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanRequest {
    pub request_id: u64,
    pub kind: RequestKind,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    /// 1 (lowest) to 10 (highest).
    pub priority: u8,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_cost: Option<f64>,
    #[serde(default)]
    pub notes: String,
}

/// Input to [`HumanRequestStore::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequest {
    #[serde(default)]
    pub kind: RequestKind,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_created_by")]
    pub created_by: String,
}

fn default_priority() -> u8 {
    5
}

fn default_created_by() -> String {
    "orchestrator".into()
}

/// Which transitions the lifecycle permits.
pub(crate) fn transition_allowed(from: RequestState, to: RequestState) -> bool {
    use RequestState::*;
    matches!(
        (from, to),
        (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) | (Approved, Completed) | (Approved, Cancelled)
    )
}
