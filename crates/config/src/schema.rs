//! Config schema types (master, slave, fleet, transport, installer).

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    pub master: MasterConfig,
    pub slave: SlaveConfig,
    pub fleet: FleetConfig,
    pub transport: TransportConfig,
    pub installer: InstallerConfig,
    /// Root of all durable control-plane state. Defaults to
    /// `~/.local/share/drover` (or `./drover-data` when no home exists).
    pub data_dir: Option<PathBuf>,
}

/// Orchestrator process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub bind: String,
    pub port: u16,
    /// Seconds allowed for in-flight requests to drain on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7601,
            shutdown_grace_secs: 10,
        }
    }
}

/// Slave runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaveConfig {
    pub bind: String,
    pub port: u16,
    /// Base URL of the master, e.g. `http://192.168.1.10:7601`.
    pub master_url: String,
    /// Stable identity; generated from the hostname when unset.
    pub slave_id: Option<String>,
    pub heartbeat_interval_secs: u64,
    /// Device class advertised to the master: `single_board`, `desktop`,
    /// or `server`.
    pub device_type: String,
    /// Advertised agent capacity; derived from core count when unset.
    pub max_agents: Option<u32>,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7600,
            master_url: "http://127.0.0.1:7601".into(),
            slave_id: None,
            heartbeat_interval_secs: 30,
            device_type: "single_board".into(),
            max_agents: None,
        }
    }
}

impl SlaveConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Registry / pool / health-monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    /// A slave silent for longer than this is marked offline.
    pub liveness_window_secs: u64,
    /// Delivered-but-unacknowledged commands are re-enqueued after this.
    pub redeliver_after_secs: u64,
    pub max_redeliveries: u32,
    /// Slaves offline for longer than this are purged from the registry.
    pub purge_after_secs: u64,
    pub overbooking: OverbookingConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            probe_timeout_secs: 10,
            liveness_window_secs: 90,
            redeliver_after_secs: 60,
            max_redeliveries: 3,
            purge_after_secs: 7 * 24 * 3600,
            overbooking: OverbookingConfig::default(),
        }
    }
}

impl FleetConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }

    pub fn redeliver_after(&self) -> Duration {
        Duration::from_secs(self.redeliver_after_secs)
    }

    pub fn purge_after(&self) -> Duration {
        Duration::from_secs(self.purge_after_secs)
    }
}

/// Per-device-class placement multipliers. Hosted agents are I/O-bound, so
/// larger machines take more logical agents than physical cores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverbookingConfig {
    pub single_board: f64,
    pub desktop: f64,
    pub server: f64,
}

impl Default for OverbookingConfig {
    fn default() -> Self {
        Self {
            single_board: 1.0,
            desktop: 1.5,
            server: 2.0,
        }
    }
}

/// Robust HTTP client tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1,
            max_delay_secs: 60,
            failure_threshold: 5,
            cooldown_secs: 60,
            timeout_secs: 30,
        }
    }
}

/// Remote installation pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Attempts per strategy before moving to the next one.
    pub strategy_retries: u32,
    /// Seconds between attempts of the same strategy.
    pub strategy_retry_delay_secs: u64,
    /// Seconds to wait for a freshly started slave to answer `/health`.
    pub startup_window_secs: u64,
    /// Repository cloned onto new nodes.
    pub repo_url: String,
    pub branch: String,
    /// Seconds allowed per remote command.
    pub command_timeout_secs: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            strategy_retries: 3,
            strategy_retry_delay_secs: 5,
            startup_window_secs: 30,
            repo_url: "https://github.com/drover-org/drover.git".into(),
            branch: "main".into(),
            command_timeout_secs: 300,
        }
    }
}

impl InstallerConfig {
    pub fn startup_window(&self) -> Duration {
        Duration::from_secs(self.startup_window_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_tuning() {
        let cfg = DroverConfig::default();
        assert_eq!(cfg.master.port, 7601);
        assert_eq!(cfg.slave.port, 7600);
        assert_eq!(cfg.fleet.liveness_window_secs, 90);
        assert_eq!(cfg.fleet.max_redeliveries, 3);
        assert_eq!(cfg.transport.failure_threshold, 5);
        assert!((cfg.fleet.overbooking.server - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: DroverConfig = toml::from_str(
            r#"
            [master]
            port = 9000

            [fleet.overbooking]
            desktop = 1.25
            "#,
        )
        .unwrap();
        assert_eq!(cfg.master.port, 9000);
        assert_eq!(cfg.master.bind, "0.0.0.0");
        assert!((cfg.fleet.overbooking.desktop - 1.25).abs() < f64::EPSILON);
        assert!((cfg.fleet.overbooking.single_board - 1.0).abs() < f64::EPSILON);
    }
}
