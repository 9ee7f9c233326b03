use std::sync::Arc;

use chrono::{DateTime, Utc};

use {
    drover_common::token::SharedToken,
    drover_fleet::Fleet,
    drover_installer::InstallStore,
    drover_requests::HumanRequestStore,
};

/// Shared handler state. Everything is behind `Arc`, so cloning per
/// request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<Fleet>,
    pub installs: Arc<InstallStore>,
    pub requests: Arc<HumanRequestStore>,
    pub token: Arc<SharedToken>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        fleet: Arc<Fleet>,
        installs: Arc<InstallStore>,
        requests: Arc<HumanRequestStore>,
        token: SharedToken,
    ) -> Self {
        Self {
            fleet,
            installs,
            requests,
            token: Arc::new(token),
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
