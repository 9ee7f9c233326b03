//! Slave registry operations: register, heartbeat, offline handling, purge.

use {
    chrono::{DateTime, Utc},
    tracing::{info, warn},
};

use crate::{
    Error, Fleet, Result,
    state::{FleetInner, last_alive},
    types::{HeartbeatRequest, RegisterRequest, Slave, SlaveStatus},
};

/// What a registration attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    /// Identical identity re-registered; descriptor refreshed.
    Refreshed,
}

impl Fleet {
    /// Register a slave. Idempotent when `slave_id` maps to the same
    /// endpoint; a different endpoint under the same id is a conflict.
    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterOutcome> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let outcome = match inner.slaves.get_mut(&req.slave_id) {
            Some(existing) if existing.host == req.host && existing.port == req.port => {
                existing.device_type = req.device_type;
                existing.resources = req.resources.clone();
                existing.capabilities = req.capabilities.clone();
                existing.version = req.version.clone();
                existing.install_method = req.install_method;
                existing.last_seen_at = Some(now);
                existing.went_offline_at = None;
                existing.status = self.status_for_version(&req.version);
                RegisterOutcome::Refreshed
            },
            Some(existing) => {
                return Err(Error::Conflict(format!(
                    "slave {} already registered at {}:{}",
                    req.slave_id, existing.host, existing.port
                )));
            },
            None => {
                let status = self.status_for_version(&req.version);
                let slave = Slave {
                    slave_id: req.slave_id.clone(),
                    host: req.host,
                    port: req.port,
                    device_type: req.device_type,
                    resources: req.resources,
                    capabilities: req.capabilities,
                    version: req.version,
                    status,
                    install_method: req.install_method,
                    secret_ref: req.secret_ref,
                    registered_at: now,
                    last_seen_at: Some(now),
                    went_offline_at: None,
                    usage: Default::default(),
                };
                info!(slave_id = %slave.slave_id, host = %slave.host, port = slave.port,
                      status = ?slave.status, "slave registered");
                inner.slaves.insert(req.slave_id.clone(), slave);
                inner.queues.entry(req.slave_id).or_default();
                RegisterOutcome::Created
            },
        };

        self.persist_registry(&inner).await?;
        Ok(outcome)
    }

    /// Process a heartbeat: refresh liveness, reconcile the slave's version
    /// and its reported agents against expected state.
    pub async fn heartbeat(&self, slave_id: &str, report: HeartbeatRequest) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        {
            let slave = inner
                .slaves
                .get_mut(slave_id)
                .ok_or_else(|| Error::NotFound(format!("slave {slave_id}")))?;

            if slave.status == SlaveStatus::Offline {
                info!(slave_id, "offline slave resumed heartbeating");
            }
            slave.last_seen_at = Some(now);
            slave.went_offline_at = None;
            slave.usage = report.resources_usage.clone();
            slave.version = report.version.clone();
            let status = self.status_for_version(&report.version);
            if status != slave.status {
                info!(slave_id, from = ?slave.status, to = ?status, "slave status changed");
            }
            slave.status = status;
        }

        self.reconcile_agents(&mut inner, slave_id, &report.agents_status, now);

        self.persist_registry(&inner).await?;
        self.persist_queue(&inner, slave_id).await?;
        Ok(())
    }

    /// Force a slave offline, orphaning its placed agents.
    pub async fn mark_offline(&self, slave_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let slave = inner
            .slaves
            .get_mut(slave_id)
            .ok_or_else(|| Error::NotFound(format!("slave {slave_id}")))?;
        slave.status = SlaveStatus::Offline;
        slave.went_offline_at = Some(now);
        warn!(slave_id, "slave marked offline");

        self.orphan_slave_agents(&mut inner, slave_id, now);
        self.persist_registry(&inner).await?;
        Ok(())
    }

    /// Remove a slave entirely. Its queue is dropped and its agents become
    /// orphans awaiting recovery.
    pub async fn unregister(&self, slave_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        if inner.slaves.remove(slave_id).is_none() {
            return Err(Error::NotFound(format!("slave {slave_id}")));
        }
        inner.queues.remove(slave_id);
        self.orphan_slave_agents(&mut inner, slave_id, now);
        info!(slave_id, "slave unregistered");

        self.persist_registry(&inner).await?;
        self.persist_queue(&inner, slave_id).await?;
        Ok(())
    }

    /// Feed one health-probe outcome into the registry. Failures do not
    /// flip a slave offline on their own; the liveness window does.
    pub async fn apply_probe(&self, slave_id: &str, outcome: ProbeOutcome) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let slave = inner
            .slaves
            .get_mut(slave_id)
            .ok_or_else(|| Error::NotFound(format!("slave {slave_id}")))?;

        match outcome {
            ProbeOutcome::Healthy(version) => {
                slave.last_seen_at = Some(now);
                slave.went_offline_at = None;
                slave.version = version.clone();
                let status = self.status_for_version(&version);
                if status != slave.status {
                    info!(slave_id, from = ?slave.status, to = ?status, "probe changed slave status");
                }
                slave.status = status;
            },
            ProbeOutcome::Unhealthy => {
                // Reachable but self-reporting trouble.
                slave.last_seen_at = Some(now);
                if slave.status != SlaveStatus::Degraded {
                    warn!(slave_id, "slave degraded");
                }
                slave.status = SlaveStatus::Degraded;
            },
            ProbeOutcome::Unreachable => {
                if slave.status == SlaveStatus::Online {
                    warn!(slave_id, "probe failed, slave degraded until liveness window elapses");
                    slave.status = SlaveStatus::Degraded;
                }
            },
        }

        self.persist_registry(&inner).await?;
        Ok(())
    }

    /// Periodic maintenance: liveness, command redelivery, purge of
    /// long-offline slaves, orphan recovery. Driven by the health monitor.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        {
            let mut inner = self.inner.write().await;

            // Liveness: silent past the window means offline.
            let window = chrono::Duration::from_std(self.cfg.liveness_window())
                .unwrap_or_else(|_| chrono::Duration::seconds(90));
            let stale: Vec<String> = inner
                .slaves
                .values()
                .filter(|s| s.status != SlaveStatus::Offline && now - last_alive(s) > window)
                .map(|s| s.slave_id.clone())
                .collect();
            for slave_id in &stale {
                if let Some(slave) = inner.slaves.get_mut(slave_id) {
                    warn!(%slave_id, "liveness window elapsed, marking offline");
                    slave.status = SlaveStatus::Offline;
                    slave.went_offline_at = Some(now);
                }
                self.orphan_slave_agents(&mut inner, slave_id, now);
            }
            report.marked_offline = stale;

            // Command redelivery for every live queue.
            let slave_ids: Vec<String> = inner.queues.keys().cloned().collect();
            for slave_id in slave_ids {
                let (redelivered, failed) = self.redeliver_stale(&mut inner, &slave_id, now);
                report.redelivered += redelivered;
                report.failed_intents += failed;
            }

            // Purge slaves that stayed offline past the retention window.
            let retention = chrono::Duration::from_std(self.cfg.purge_after())
                .unwrap_or_else(|_| chrono::Duration::days(7));
            let purgeable: Vec<String> = inner
                .slaves
                .values()
                .filter(|s| {
                    s.status == SlaveStatus::Offline
                        && s.went_offline_at.is_some_and(|at| now - at > retention)
                })
                .map(|s| s.slave_id.clone())
                .collect();
            for slave_id in &purgeable {
                info!(%slave_id, "purging slave after prolonged offline");
                inner.slaves.remove(slave_id);
                inner.queues.remove(slave_id);
            }
            report.purged = purgeable;

            self.persist_registry(&inner).await?;
            for slave_id in inner.queues.keys().cloned().collect::<Vec<_>>() {
                self.persist_queue(&inner, &slave_id).await?;
            }
        }

        // Re-place orphans now that offline transitions are recorded.
        report.recovered = self.recover_orphans().await?;
        Ok(report)
    }

    pub(crate) fn status_for_version(&self, version: &drover_common::VersionInfo) -> SlaveStatus {
        if self.master_version.commit_matches(version) {
            SlaveStatus::Online
        } else {
            SlaveStatus::VersionMismatch
        }
    }

    pub(crate) fn orphan_slave_agents(
        &self,
        inner: &mut FleetInner,
        slave_id: &str,
        now: DateTime<Utc>,
    ) {
        for agent in inner.agents.values_mut() {
            if agent.slave_id == slave_id && agent.status != crate::AgentStatus::Orphaned {
                warn!(agent_id = %agent.agent_id, slave_id, "agent orphaned");
                agent.status = crate::AgentStatus::Orphaned;
                agent.status_changed_at = now;
            }
        }
    }
}

/// Result of a single health probe, as fed by the monitor.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Healthy(drover_common::VersionInfo),
    /// Answered, but self-reported a non-ok status.
    Unhealthy,
    Unreachable,
}

/// What one maintenance sweep did.
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub marked_offline: Vec<String>,
    pub purged: Vec<String>,
    pub redelivered: usize,
    pub failed_intents: usize,
    pub recovered: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration;

    use drover_config::FleetConfig;

    use super::*;
    use crate::{AgentStatus, Fleet, testutil, types::RegisterRequest};

    fn descriptor(slave_id: &str, host: &str) -> RegisterRequest {
        RegisterRequest {
            slave_id: slave_id.to_owned(),
            host: host.to_owned(),
            port: 7600,
            device_type: Default::default(),
            resources: Default::default(),
            capabilities: Default::default(),
            version: testutil::master_version(),
            install_method: Default::default(),
            secret_ref: "tok-test".into(),
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_for_identical_descriptor() {
        let (fleet, _dir) = testutil::fleet().await;

        let first = fleet.register(descriptor("raspi-001", "10.0.0.5")).await.unwrap();
        assert_eq!(first, RegisterOutcome::Created);

        let again = fleet.register(descriptor("raspi-001", "10.0.0.5")).await.unwrap();
        assert_eq!(again, RegisterOutcome::Refreshed);
        assert_eq!(fleet.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn register_conflicts_on_different_endpoint() {
        let (fleet, _dir) = testutil::fleet().await;
        fleet.register(descriptor("raspi-001", "10.0.0.5")).await.unwrap();

        let err = fleet
            .register(descriptor("raspi-001", "10.0.0.9"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn register_with_foreign_commit_flags_mismatch() {
        let (fleet, _dir) = testutil::fleet().await;
        testutil::register_slave_with_commit(&fleet, "raspi-002", 8, "def456").await;

        let slave = fleet.get_slave("raspi-002").await.unwrap();
        assert_eq!(slave.status, SlaveStatus::VersionMismatch);
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_slave_is_not_found() {
        let (fleet, _dir) = testutil::fleet().await;
        let err = fleet
            .heartbeat("ghost", Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn heartbeat_recovers_a_mismatched_slave() {
        let (fleet, _dir) = testutil::fleet().await;
        testutil::register_slave_with_commit(&fleet, "raspi-001", 8, "def456").await;

        testutil::heartbeat_with_commit(&fleet, "raspi-001", testutil::MASTER_COMMIT).await;
        let slave = fleet.get_slave("raspi-001").await.unwrap();
        assert_eq!(slave.status, SlaveStatus::Online);
    }

    #[tokio::test]
    async fn liveness_window_governs_offline_transition() {
        let cfg = FleetConfig {
            liveness_window_secs: 90,
            ..FleetConfig::default()
        };
        let (fleet, _dir) = testutil::fleet_with(cfg).await;
        testutil::register_slave(&fleet, "raspi-001", 8).await;
        let registered_at = Utc::now();

        // One missed 30 s heartbeat: still inside the window.
        fleet.sweep(registered_at + Duration::seconds(60)).await.unwrap();
        assert_eq!(
            fleet.get_slave("raspi-001").await.unwrap().status,
            SlaveStatus::Online
        );

        // Three missed heartbeats: window elapsed.
        let report = fleet.sweep(registered_at + Duration::seconds(95)).await.unwrap();
        assert_eq!(report.marked_offline, vec!["raspi-001".to_owned()]);
        let slave = fleet.get_slave("raspi-001").await.unwrap();
        assert_eq!(slave.status, SlaveStatus::Offline);
        assert!(slave.went_offline_at.is_some());
    }

    #[tokio::test]
    async fn offline_transition_orphans_placed_agents() {
        let cfg = FleetConfig {
            liveness_window_secs: 90,
            ..FleetConfig::default()
        };
        let (fleet, _dir) = testutil::fleet_with(cfg).await;
        testutil::register_slave(&fleet, "raspi-001", 8).await;
        let agent_id = fleet.deploy(testutil::genome("a")).await.unwrap();
        fleet.drain_commands("raspi-001").await.unwrap();
        testutil::report_agents(&fleet, "raspi-001", &[(agent_id, "active")]).await;

        fleet.sweep(Utc::now() + Duration::seconds(120)).await.unwrap();
        assert_eq!(
            testutil::agent(&fleet, agent_id).await.status,
            AgentStatus::Orphaned
        );
    }

    #[tokio::test]
    async fn prolonged_offline_slaves_are_purged() {
        let cfg = FleetConfig {
            liveness_window_secs: 90,
            purge_after_secs: 600,
            ..FleetConfig::default()
        };
        let (fleet, _dir) = testutil::fleet_with(cfg).await;
        testutil::register_slave(&fleet, "raspi-001", 8).await;

        fleet.mark_offline("raspi-001").await.unwrap();
        let report = fleet.sweep(Utc::now() + Duration::seconds(700)).await.unwrap();
        assert_eq!(report.purged, vec!["raspi-001".to_owned()]);
        assert!(fleet.get_slave("raspi-001").await.is_none());
    }

    #[tokio::test]
    async fn unregister_orphans_agents_and_drops_queue() {
        let (fleet, _dir) = testutil::fleet().await;
        testutil::register_slave(&fleet, "raspi-001", 8).await;
        let agent_id = fleet.deploy(testutil::genome("a")).await.unwrap();

        fleet.unregister("raspi-001").await.unwrap();
        assert_eq!(
            testutil::agent(&fleet, agent_id).await.status,
            AgentStatus::Orphaned
        );
        assert!(fleet.get_slave("raspi-001").await.is_none());
    }

    #[tokio::test]
    async fn snapshot_round_trips_bytewise() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FleetConfig {
            liveness_window_secs: 3600,
            ..FleetConfig::default()
        };
        let fleet = Fleet::load(cfg.clone(), dir.path(), testutil::master_version())
            .await
            .unwrap();
        testutil::register_slave(&fleet, "raspi-001", 8).await;
        testutil::register_slave(&fleet, "raspi-002", 4).await;
        fleet.deploy(testutil::genome("a")).await.unwrap();
        fleet.persist_all().await.unwrap();

        let path = dir.path().join("slaves").join("config.json");
        let before = std::fs::read(&path).unwrap();

        // A no-op start: load and persist again.
        let reloaded = Fleet::load(cfg, dir.path(), testutil::master_version())
            .await
            .unwrap();
        reloaded.persist_all().await.unwrap();
        let after = std::fs::read(&path).unwrap();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn stats_reflect_fleet_shape() {
        let (fleet, _dir) = testutil::fleet().await;
        testutil::register_slave(&fleet, "raspi-001", 8).await;
        testutil::register_slave_with_commit(&fleet, "raspi-002", 8, "def456").await;
        let agent_id = fleet.deploy(testutil::genome("a")).await.unwrap();
        fleet.drain_commands("raspi-001").await.unwrap();
        testutil::report_agents(&fleet, "raspi-001", &[(agent_id, "active")]).await;

        let stats = fleet.cluster_stats().await;
        assert_eq!(stats.slaves.total, 2);
        assert_eq!(stats.slaves.online, 1);
        assert_eq!(stats.slaves.version_mismatch, 1);
        assert_eq!(stats.agents.active, 1);
        assert_eq!(stats.capacity.total_slots, 8);
        assert_eq!(stats.capacity.used_slots, 1);
    }
}
