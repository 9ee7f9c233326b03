//! Agent pool: placement, lifecycle transitions, heartbeat reconciliation,
//! orphan recovery.

use std::collections::HashMap;

use {
    chrono::{DateTime, Utc},
    tracing::{info, warn},
    uuid::Uuid,
};

use crate::{
    Error, Fleet, Result,
    state::{FleetInner, slot_ceiling},
    types::{
        AgentReport, AgentStatus, Command, CommandKind, Genome, HostedAgent, SlaveStatus,
    },
};

impl Fleet {
    /// Place a new agent on the best eligible slave and queue its deploy
    /// command. Placement runs under the fleet lock, so concurrent deploys
    /// against N remaining slots admit at most N agents.
    pub async fn deploy(&self, genome: Genome) -> Result<Uuid> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let agent_id = Uuid::new_v4();

        let slave_id = self
            .choose_slave(&inner)
            .ok_or(Error::NoCapacity)?;

        info!(%agent_id, %slave_id, genome_hash = %genome.hash, "agent placed");
        inner.agents.insert(agent_id, HostedAgent {
            agent_id,
            genome: genome.clone(),
            slave_id: slave_id.clone(),
            placed_at: now,
            status: AgentStatus::PendingDeploy,
            status_changed_at: now,
        });
        self.enqueue_locked(
            &mut inner,
            Command::new(&slave_id, CommandKind::DeployAgent, agent_id, Some(genome)),
        );

        self.persist_registry(&inner).await?;
        self.persist_queue(&inner, &slave_id).await?;
        Ok(agent_id)
    }

    /// Request destruction of an agent. The registry entry stays until the
    /// owning slave confirms by no longer reporting the agent.
    pub async fn destroy_agent(&self, agent_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let agent = inner
            .agents
            .get(&agent_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;

        if agent.status == AgentStatus::Orphaned {
            // No live slave to command; the placement is already gone.
            inner.agents.remove(&agent_id);
            self.persist_registry(&inner).await?;
            return Ok(());
        }

        self.refuse_on_version_mismatch(&inner, &agent.slave_id)?;

        if let Some(stored) = inner.agents.get_mut(&agent_id) {
            stored.status = AgentStatus::PendingDestroy;
            stored.status_changed_at = now;
        }
        self.enqueue_locked(
            &mut inner,
            Command::new(&agent.slave_id, CommandKind::DestroyAgent, agent_id, None),
        );

        self.persist_registry(&inner).await?;
        self.persist_queue(&inner, &agent.slave_id).await?;
        Ok(())
    }

    /// Swap an agent's genome. The slave applies this as an atomic
    /// destroy-and-recreate; an orphaned agent just takes the new genome
    /// for its eventual recovery.
    pub async fn update_genome(&self, agent_id: Uuid, genome: Genome) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let agent = inner
            .agents
            .get(&agent_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;

        if agent.status == AgentStatus::Orphaned {
            if let Some(stored) = inner.agents.get_mut(&agent_id) {
                stored.genome = genome;
                stored.status_changed_at = now;
            }
            self.persist_registry(&inner).await?;
            return Ok(());
        }

        self.refuse_on_version_mismatch(&inner, &agent.slave_id)?;

        if let Some(stored) = inner.agents.get_mut(&agent_id) {
            stored.genome = genome.clone();
            stored.status = AgentStatus::PendingUpdate;
            stored.status_changed_at = now;
        }
        self.enqueue_locked(
            &mut inner,
            Command::new(
                &agent.slave_id,
                CommandKind::UpdateGenome,
                agent_id,
                Some(genome),
            ),
        );

        self.persist_registry(&inner).await?;
        self.persist_queue(&inner, &agent.slave_id).await?;
        Ok(())
    }

    /// Re-place orphaned agents onto eligible slaves, preserving their id
    /// and genome. Returns how many were recovered.
    pub async fn recover_orphans(&self) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let orphans: Vec<Uuid> = inner
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Orphaned)
            .map(|a| a.agent_id)
            .collect();

        let mut recovered = 0;
        let mut touched_queues = Vec::new();
        for agent_id in orphans {
            let Some(slave_id) = self.choose_slave(&inner) else {
                // Out of capacity; remaining orphans wait for the next sweep.
                break;
            };
            let Some(agent) = inner.agents.get_mut(&agent_id) else {
                continue;
            };
            info!(%agent_id, from = %agent.slave_id, to = %slave_id, "recovering orphaned agent");
            agent.slave_id = slave_id.clone();
            agent.placed_at = now;
            agent.status = AgentStatus::PendingDeploy;
            agent.status_changed_at = now;
            let genome = agent.genome.clone();
            self.enqueue_locked(
                &mut inner,
                Command::new(&slave_id, CommandKind::DeployAgent, agent_id, Some(genome)),
            );
            touched_queues.push(slave_id);
            recovered += 1;
        }

        if recovered > 0 {
            self.persist_registry(&inner).await?;
            for slave_id in touched_queues {
                self.persist_queue(&inner, &slave_id).await?;
            }
        }
        Ok(recovered)
    }

    /// Fold a slave's reported agent set into the expected state. Called
    /// from the heartbeat path with the lock held.
    pub(crate) fn reconcile_agents(
        &self,
        inner: &mut FleetInner,
        slave_id: &str,
        reports: &HashMap<Uuid, AgentReport>,
        now: DateTime<Utc>,
    ) {
        // What the slave reports and the master expects converge first.
        for (agent_id, report) in reports {
            match inner.agents.get_mut(agent_id) {
                Some(agent) if agent.slave_id == slave_id => {
                    match agent.status {
                        AgentStatus::PendingDeploy | AgentStatus::PendingUpdate => {
                            info!(%agent_id, slave_id, reported = %report.status, "agent confirmed");
                            agent.status = AgentStatus::Active;
                            agent.status_changed_at = now;
                            self.ack_commands(inner, slave_id, *agent_id, &[
                                CommandKind::DeployAgent,
                                CommandKind::UpdateGenome,
                            ]);
                        },
                        AgentStatus::Orphaned => {
                            // The slave came back still hosting the agent.
                            info!(%agent_id, slave_id, "orphaned agent re-adopted");
                            agent.status = AgentStatus::Active;
                            agent.status_changed_at = now;
                        },
                        AgentStatus::Active | AgentStatus::PendingDestroy => {},
                    }
                },
                _ => {
                    // Unknown here: either never placed or placed elsewhere
                    // since. Stale copy, instruct destruction.
                    warn!(%agent_id, slave_id, "stale agent reported, instructing destruction");
                    self.enqueue_locked(
                        inner,
                        Command::new(slave_id, CommandKind::DestroyAgent, *agent_id, None),
                    );
                },
            }
        }

        // Agents the master expects on this slave but the slave no longer
        // reports.
        let missing: Vec<Uuid> = inner
            .agents
            .values()
            .filter(|a| a.slave_id == slave_id && !reports.contains_key(&a.agent_id))
            .map(|a| a.agent_id)
            .collect();
        for agent_id in missing {
            let Some(agent) = inner.agents.get_mut(&agent_id) else {
                continue;
            };
            match agent.status {
                AgentStatus::PendingDestroy => {
                    info!(%agent_id, slave_id, "destruction confirmed");
                    inner.agents.remove(&agent_id);
                    self.ack_commands(inner, slave_id, agent_id, &[CommandKind::DestroyAgent]);
                },
                AgentStatus::Active => {
                    // Vanished from a live slave; treat like a lost
                    // placement so the next sweep can re-place it.
                    warn!(%agent_id, slave_id, "active agent missing from report, orphaned");
                    agent.status = AgentStatus::Orphaned;
                    agent.status_changed_at = now;
                },
                // Pending deploy/update commands are covered by the
                // redelivery grace window, not the report.
                AgentStatus::PendingDeploy
                | AgentStatus::PendingUpdate
                | AgentStatus::Orphaned => {},
            }
        }
    }

    /// Deterministic placement: eligible slaves ranked by remaining
    /// headroom, ties broken by lowest reported latency, then id.
    fn choose_slave(&self, inner: &FleetInner) -> Option<String> {
        let mut candidates: Vec<(usize, u64, &str)> = inner
            .slaves
            .values()
            .filter(|slave| {
                slave.status == SlaveStatus::Online
                    && self.master_version.commit_matches(&slave.version)
            })
            .filter_map(|slave| {
                let ceiling = slot_ceiling(slave, &self.cfg.overbooking);
                let placed = inner.placed_count(&slave.slave_id);
                (placed < ceiling).then(|| {
                    (
                        ceiling - placed,
                        slave.usage.avg_latency_ms.max(0.0) as u64,
                        slave.slave_id.as_str(),
                    )
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(b.2))
        });
        candidates.first().map(|(_, _, id)| (*id).to_owned())
    }

    fn refuse_on_version_mismatch(&self, inner: &FleetInner, slave_id: &str) -> Result<()> {
        let Some(slave) = inner.slaves.get(slave_id) else {
            return Err(Error::NotFound(format!("slave {slave_id}")));
        };
        if self.master_version.commit_matches(&slave.version) {
            Ok(())
        } else {
            Err(Error::VersionMismatch {
                slave_id: slave_id.to_owned(),
                master_commit: self.master_version.git_commit.clone(),
                slave_commit: slave.version.git_commit.clone(),
            })
        }
    }
}
