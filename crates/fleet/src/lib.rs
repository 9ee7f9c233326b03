//! Master-side fleet state: slave registry, per-slave command queues, agent
//! pool, and the health monitor.
//!
//! All mutable state lives in one [`Fleet`] behind a single `RwLock`; every
//! mutation — registration, heartbeat reconciliation, placement, queue
//! drain — runs under that lock, so concurrent deploys always see an
//! up-to-date view and capacity checks cannot race. Durable snapshots go to
//! `<data_dir>/slaves/config.json` and `<data_dir>/commands/<slave_id>.json`
//! via temp-file-plus-rename after each mutation.

pub mod commands;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod registry;
pub mod state;
#[cfg(test)]
pub(crate) mod testutil;
pub mod types;

pub use {
    error::{Error, Result},
    monitor::{HealthMonitor, probe_fleet},
    registry::{ProbeOutcome, RegisterOutcome, SweepReport},
    state::Fleet,
    types::{
        AgentReport, AgentStatus, Capabilities, ClusterStats, Command, CommandKind, DeviceType,
        Genome, HeartbeatRequest, HostedAgent, InstallMethod, Placement, RegisterRequest,
        ResourceUsage, Resources, Slave, SlaveStatus,
    },
};
