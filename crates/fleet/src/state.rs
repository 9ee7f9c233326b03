//! The `Fleet` aggregate: one lock over slaves, agents, and command queues.

use std::{
    collections::{BTreeMap, VecDeque},
    path::{Path, PathBuf},
};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::info,
    uuid::Uuid,
};

use {
    drover_common::{VersionInfo, fs as dfs},
    drover_config::{FleetConfig, OverbookingConfig},
};

use crate::{
    Result,
    types::{
        AgentCounts, AgentStatus, CapacityStats, ClusterStats, Command, DeviceType, HostedAgent,
        Placement, Slave, SlaveCounts, SlaveStatus,
    },
};

/// Current on-disk snapshot format.
const SNAPSHOT_VERSION: u32 = 1;

/// Everything the master knows, guarded by one lock (see crate docs).
pub(crate) struct FleetInner {
    pub slaves: BTreeMap<String, Slave>,
    pub agents: BTreeMap<Uuid, HostedAgent>,
    pub queues: BTreeMap<String, CommandQueue>,
}

/// Per-slave FIFO plus the delivered-but-unacknowledged set.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct CommandQueue {
    pub pending: VecDeque<Command>,
    pub awaiting: Vec<Command>,
}

#[derive(Serialize, Deserialize)]
struct RegistrySnapshot {
    version: u32,
    slaves: Vec<Slave>,
    agents: Vec<HostedAgent>,
}

/// Master-side fleet state with durable snapshots.
pub struct Fleet {
    pub(crate) cfg: FleetConfig,
    pub(crate) data_dir: PathBuf,
    pub(crate) master_version: VersionInfo,
    pub(crate) inner: RwLock<FleetInner>,
}

impl Fleet {
    /// Load fleet state from `data_dir`, starting empty when no snapshot
    /// exists yet.
    pub async fn load(
        cfg: FleetConfig,
        data_dir: impl Into<PathBuf>,
        master_version: VersionInfo,
    ) -> Result<Self> {
        let data_dir = data_dir.into();

        let mut slaves = BTreeMap::new();
        let mut agents = BTreeMap::new();
        if let Some(snapshot) =
            dfs::read_json::<RegistrySnapshot>(&registry_path(&data_dir)).await?
        {
            for slave in snapshot.slaves {
                slaves.insert(slave.slave_id.clone(), slave);
            }
            for agent in snapshot.agents {
                agents.insert(agent.agent_id, agent);
            }
        }

        let mut queues = BTreeMap::new();
        for slave_id in slaves.keys() {
            let path = queue_path(&data_dir, slave_id);
            if let Some(queue) = dfs::read_json::<CommandQueue>(&path).await? {
                queues.insert(slave_id.clone(), queue);
            }
        }

        info!(
            slaves = slaves.len(),
            agents = agents.len(),
            "fleet state loaded"
        );

        Ok(Self {
            cfg,
            data_dir,
            master_version,
            inner: RwLock::new(FleetInner {
                slaves,
                agents,
                queues,
            }),
        })
    }

    /// The commit the master itself runs; slaves are reconciled against it.
    pub fn master_version(&self) -> &VersionInfo {
        &self.master_version
    }

    pub fn config(&self) -> &FleetConfig {
        &self.cfg
    }

    /// Consistent copy of all registered slaves.
    pub async fn snapshot(&self) -> Vec<Slave> {
        self.inner.read().await.slaves.values().cloned().collect()
    }

    pub async fn get_slave(&self, slave_id: &str) -> Option<Slave> {
        self.inner.read().await.slaves.get(slave_id).cloned()
    }

    /// All known agents (including orphans).
    pub async fn agents(&self) -> Vec<HostedAgent> {
        self.inner.read().await.agents.values().cloned().collect()
    }

    /// `agent_id → {slave_id, placed_at}` for every placed agent.
    pub async fn placements(&self) -> BTreeMap<Uuid, Placement> {
        self.inner
            .read()
            .await
            .agents
            .values()
            .map(|a| {
                (a.agent_id, Placement {
                    slave_id: a.slave_id.clone(),
                    placed_at: a.placed_at,
                })
            })
            .collect()
    }

    /// Aggregate counts for the stats and dashboard endpoints.
    pub async fn cluster_stats(&self) -> ClusterStats {
        let inner = self.inner.read().await;

        let mut slaves = SlaveCounts {
            total: inner.slaves.len(),
            ..SlaveCounts::default()
        };
        for slave in inner.slaves.values() {
            match slave.status {
                SlaveStatus::Online => slaves.online += 1,
                SlaveStatus::Degraded => slaves.degraded += 1,
                SlaveStatus::VersionMismatch => slaves.version_mismatch += 1,
                SlaveStatus::Offline => slaves.offline += 1,
                SlaveStatus::Unknown => {},
            }
        }

        let mut agents = AgentCounts {
            total: inner.agents.len(),
            ..AgentCounts::default()
        };
        for agent in inner.agents.values() {
            match agent.status {
                AgentStatus::Active => agents.active += 1,
                AgentStatus::Orphaned => agents.orphaned += 1,
                _ => agents.pending += 1,
            }
        }

        let mut total_slots = 0usize;
        let mut used_slots = 0usize;
        for slave in inner.slaves.values() {
            if slave.status == SlaveStatus::Online {
                total_slots += slot_ceiling(slave, &self.cfg.overbooking);
                used_slots += inner.placed_count(&slave.slave_id);
            }
        }
        let utilization_percent = if total_slots == 0 {
            0.0
        } else {
            (used_slots as f64 / total_slots as f64) * 100.0
        };

        ClusterStats {
            slaves,
            agents,
            capacity: CapacityStats {
                total_slots,
                used_slots,
                utilization_percent,
            },
        }
    }

    /// Write the registry snapshot and every queue file. Used by the
    /// shutdown path; routine mutations persist incrementally.
    pub async fn persist_all(&self) -> Result<()> {
        let inner = self.inner.read().await;
        self.persist_registry(&inner).await?;
        for slave_id in inner.queues.keys() {
            self.persist_queue(&inner, slave_id).await?;
        }
        Ok(())
    }

    pub(crate) async fn persist_registry(&self, inner: &FleetInner) -> Result<()> {
        let snapshot = RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            slaves: inner.slaves.values().cloned().collect(),
            agents: inner.agents.values().cloned().collect(),
        };
        dfs::atomic_write_json(&registry_path(&self.data_dir), &snapshot).await?;
        Ok(())
    }

    pub(crate) async fn persist_queue(&self, inner: &FleetInner, slave_id: &str) -> Result<()> {
        let path = queue_path(&self.data_dir, slave_id);
        match inner.queues.get(slave_id) {
            Some(queue) => dfs::atomic_write_json(&path, queue).await?,
            None => {
                let _ = tokio::fs::remove_file(&path).await;
            },
        }
        Ok(())
    }
}

impl FleetInner {
    /// Agents currently occupying a slot on `slave_id` (orphans do not).
    pub fn placed_count(&self, slave_id: &str) -> usize {
        self.agents
            .values()
            .filter(|a| a.slave_id == slave_id && a.status != AgentStatus::Orphaned)
            .count()
    }
}

/// Hard placement ceiling: `max_agents × overbooking_factor(device_type)`.
pub(crate) fn slot_ceiling(slave: &Slave, overbooking: &OverbookingConfig) -> usize {
    let factor = match slave.device_type {
        DeviceType::SingleBoard => overbooking.single_board,
        DeviceType::Desktop => overbooking.desktop,
        DeviceType::Server => overbooking.server,
    };
    (f64::from(slave.resources.max_agents) * factor).floor() as usize
}

/// Timestamp a slave was last known alive: heartbeat/probe, else registration.
pub(crate) fn last_alive(slave: &Slave) -> DateTime<Utc> {
    slave.last_seen_at.unwrap_or(slave.registered_at)
}

fn registry_path(data_dir: &Path) -> PathBuf {
    data_dir.join("slaves").join("config.json")
}

fn queue_path(data_dir: &Path, slave_id: &str) -> PathBuf {
    data_dir.join("commands").join(format!("{slave_id}.json"))
}
