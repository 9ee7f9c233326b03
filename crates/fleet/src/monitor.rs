//! Health monitor: periodic fleet-wide probe sweep.

use std::sync::Arc;

use {
    chrono::Utc,
    serde::Deserialize,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    drover_common::VersionInfo,
    drover_transport::{RequestOpts, RobustClient},
};

use crate::{Fleet, registry::ProbeOutcome};

/// What a slave's `/health` endpoint answers.
#[derive(Debug, Deserialize)]
pub struct HealthPayload {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub git_commit: String,
    #[serde(default)]
    pub runtime_version: String,
}

impl HealthPayload {
    fn is_ok(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy")
    }

    fn version(&self) -> VersionInfo {
        VersionInfo {
            git_branch: self.git_branch.clone(),
            git_commit: self.git_commit.clone(),
            runtime_version: self.runtime_version.clone(),
        }
    }
}

/// Long-lived background task probing every known slave.
pub struct HealthMonitor;

impl HealthMonitor {
    /// Spawn the monitor loop. It stops promptly when `cancel` fires, even
    /// mid-sweep.
    pub fn spawn(
        fleet: Arc<Fleet>,
        client: Arc<RobustClient>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let interval = fleet.config().probe_interval();
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "health monitor started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {},
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = Self::tick(&fleet, &client) => {},
                }
            }
            info!("health monitor stopped");
        })
    }

    async fn tick(fleet: &Fleet, client: &RobustClient) {
        probe_fleet(fleet, client).await;
        match fleet.sweep(Utc::now()).await {
            Ok(report) => {
                if !report.marked_offline.is_empty() || report.recovered > 0 {
                    info!(
                        offline = report.marked_offline.len(),
                        recovered = report.recovered,
                        redelivered = report.redelivered,
                        "sweep completed"
                    );
                }
            },
            Err(e) => warn!(error = %e, "sweep failed"),
        }
    }
}

/// Probe every registered slave concurrently and fold the outcomes into
/// the registry. Transport errors never propagate; they only shape status.
pub async fn probe_fleet(fleet: &Fleet, client: &RobustClient) {
    let probe_timeout = fleet.config().probe_timeout();
    let slaves = fleet.snapshot().await;

    let probes = slaves.into_iter().map(|slave| async move {
        let url = format!("{}/health", slave.base_url());
        let opts = RequestOpts::default().with_timeout(probe_timeout);
        let outcome = match client.get_json::<HealthPayload>(&url, &opts).await {
            Ok(payload) if payload.is_ok() => ProbeOutcome::Healthy(payload.version()),
            Ok(_) => ProbeOutcome::Unhealthy,
            Err(e) => {
                debug!(slave_id = %slave.slave_id, error = %e, "health probe failed");
                ProbeOutcome::Unreachable
            },
        };
        (slave.slave_id, outcome)
    });

    for (slave_id, outcome) in futures::future::join_all(probes).await {
        if let Err(e) = fleet.apply_probe(&slave_id, outcome).await {
            // The slave may have been unregistered mid-probe.
            debug!(%slave_id, error = %e, "probe result dropped");
        }
    }
}
