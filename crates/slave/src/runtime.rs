//! Registration and heartbeat loop.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::Instant,
};

use {
    tokio::sync::Mutex,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {
    drover_common::{VersionInfo, token::SharedToken},
    drover_config::{DroverConfig, SlaveConfig},
    drover_fleet::{
        Capabilities, Command, CommandKind, DeviceType, HeartbeatRequest, RegisterRequest,
        ResourceUsage, Resources,
    },
    drover_transport::{RequestOpts, RobustClient, TransportOptions},
};

use crate::{
    agent_host::AgentHost,
    llm::{LlmInvoker, NoopInvoker},
    server,
};

/// How many recent poll latencies feed the reported average.
const LATENCY_WINDOW: usize = 20;

/// Everything the slave process shares between its HTTP surface and its
/// heartbeat loop.
pub struct SlaveRuntime {
    pub slave_id: String,
    pub cfg: SlaveConfig,
    pub version: VersionInfo,
    pub token: SharedToken,
    pub host: Arc<AgentHost>,
    pub client: RobustClient,
    pub available_strategies: Vec<String>,
    /// Recently applied commands, newest last. Diagnostic only.
    pub applied: Mutex<VecDeque<Command>>,
    latencies: Mutex<VecDeque<f64>>,
}

impl SlaveRuntime {
    pub fn new(
        cfg: SlaveConfig,
        transport: TransportOptions,
        token: SharedToken,
        invoker: Arc<dyn LlmInvoker>,
    ) -> Self {
        let slave_id = cfg.slave_id.clone().unwrap_or_else(default_slave_id);
        let version = VersionInfo::capture(env!("CARGO_PKG_VERSION"));
        Self {
            slave_id,
            cfg,
            version,
            token,
            host: Arc::new(AgentHost::new(invoker)),
            client: RobustClient::new(transport),
            available_strategies: detect_strategies(),
            applied: Mutex::new(VecDeque::new()),
            latencies: Mutex::new(VecDeque::new()),
        }
    }

    /// Register with the master, retrying until it answers.
    pub async fn register(&self, cancel: &CancellationToken) -> bool {
        let url = format!("{}/api/slaves/register", self.cfg.master_url);
        let body = self.register_request();
        let opts = RequestOpts::bearer(self.token.expose());

        loop {
            match self
                .client
                .post_json::<_, serde_json::Value>(&url, &body, &opts)
                .await
            {
                Ok(_) => {
                    info!(slave_id = %self.slave_id, master = %self.cfg.master_url, "registered with master");
                    return true;
                },
                Err(e) => {
                    warn!(error = %e, "registration failed, retrying");
                },
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.cfg.heartbeat_interval()) => {},
            }
        }
    }

    /// Heartbeat until cancelled: report state, pull commands, apply them
    /// in order.
    pub async fn heartbeat_loop(&self, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.cfg.heartbeat_interval()) => {},
            }
            self.heartbeat_once().await;
        }
        info!("heartbeat loop stopped");
    }

    /// One heartbeat cycle. Failures are logged and retried next interval;
    /// the master's liveness window tolerates a missed beat.
    pub async fn heartbeat_once(&self) {
        let opts = RequestOpts::bearer(self.token.expose());

        let heartbeat = HeartbeatRequest {
            agents_status: self.host.report().await,
            resources_usage: self.resource_usage().await,
            version: self.version.clone(),
        };
        let url = format!(
            "{}/api/slaves/{}/heartbeat",
            self.cfg.master_url, self.slave_id
        );
        if let Err(e) = self
            .client
            .post_json::<_, serde_json::Value>(&url, &heartbeat, &opts)
            .await
        {
            warn!(error = %e, "heartbeat failed");
            return;
        }

        // Pull and apply pending commands.
        let url = format!(
            "{}/api/slaves/{}/commands",
            self.cfg.master_url, self.slave_id
        );
        let started = Instant::now();
        let pulled = self
            .client
            .get_json::<CommandEnvelope>(&url, &RequestOpts::default())
            .await;
        self.record_latency(started.elapsed().as_secs_f64() * 1000.0)
            .await;

        match pulled {
            Ok(envelope) => {
                for command in envelope.commands {
                    self.apply(command).await;
                }
            },
            Err(e) => warn!(error = %e, "command poll failed"),
        }
    }

    /// Apply one command. Idempotent by design: the master may deliver the
    /// same `command_id` more than once.
    pub async fn apply(&self, command: Command) {
        info!(command_id = %command.command_id, kind = ?command.kind, agent_id = %command.agent_id, "applying command");
        match command.kind {
            CommandKind::DeployAgent => {
                if let Some(genome) = command.genome.clone() {
                    self.host.deploy(command.agent_id, genome).await;
                } else {
                    warn!(command_id = %command.command_id, "deploy without genome, ignoring");
                }
            },
            CommandKind::DestroyAgent => {
                self.host.destroy(command.agent_id).await;
            },
            CommandKind::UpdateGenome => {
                if let Some(genome) = command.genome.clone() {
                    self.host.update_genome(command.agent_id, genome).await;
                } else {
                    warn!(command_id = %command.command_id, "update without genome, ignoring");
                }
            },
        }

        let mut applied = self.applied.lock().await;
        applied.push_back(command);
        while applied.len() > 50 {
            applied.pop_front();
        }
    }

    fn register_request(&self) -> RegisterRequest {
        let sys = sysinfo::System::new_all();
        let cpu_cores = sys.cpus().len() as u32;
        let memory_gb = sys.total_memory() as f64 / 1e9;
        let max_agents = self.cfg.max_agents.unwrap_or_else(|| (cpu_cores * 2).max(4));

        RegisterRequest {
            slave_id: self.slave_id.clone(),
            host: advertised_host(),
            port: self.cfg.port,
            device_type: parse_device_type(&self.cfg.device_type),
            resources: Resources {
                cpu_cores,
                memory_gb,
                max_agents,
                gpu_present: std::env::var("DROVER_GPU").is_ok_and(|v| v == "1"),
            },
            capabilities: Capabilities {
                llm_providers: std::env::var("DROVER_LLM_PROVIDERS")
                    .map(|v| {
                        v.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            version: self.version.clone(),
            install_method: Default::default(),
            secret_ref: self.token.secret_ref().to_owned(),
        }
    }

    async fn resource_usage(&self) -> ResourceUsage {
        let mut sys = sysinfo::System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        let memory_percent = if sys.total_memory() == 0 {
            0.0
        } else {
            sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
        };
        ResourceUsage {
            cpu_percent: f64::from(sys.global_cpu_usage()),
            memory_percent,
            avg_latency_ms: self.average_latency().await,
        }
    }

    async fn record_latency(&self, latency_ms: f64) {
        let mut latencies = self.latencies.lock().await;
        latencies.push_back(latency_ms);
        while latencies.len() > LATENCY_WINDOW {
            latencies.pop_front();
        }
    }

    async fn average_latency(&self) -> f64 {
        let latencies = self.latencies.lock().await;
        if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        }
    }
}

#[derive(serde::Deserialize)]
struct CommandEnvelope {
    #[serde(default)]
    commands: Vec<Command>,
}

fn default_slave_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "node".into());
    format!("slave-{host}")
}

fn advertised_host() -> String {
    std::env::var("DROVER_ADVERTISED_HOST").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "127.0.0.1".into())
    })
}

fn parse_device_type(value: &str) -> DeviceType {
    match value {
        "desktop" => DeviceType::Desktop,
        "server" => DeviceType::Server,
        _ => DeviceType::SingleBoard,
    }
}

/// Which provisioning strategies this node could serve, advertised in
/// `/health` for the installer's benefit.
fn detect_strategies() -> Vec<String> {
    let mut strategies = Vec::new();
    if which::which("docker").is_ok() {
        strategies.push("container".to_owned());
    }
    if which::which("systemd-run").is_ok() {
        strategies.push("isolated_runtime".to_owned());
    }
    strategies.push("native".to_owned());
    strategies
}

/// Run a slave process: HTTP surface plus registration and heartbeats.
pub async fn run(cfg: DroverConfig) -> anyhow::Result<()> {
    let token = SharedToken::from_env()
        .ok_or_else(|| anyhow::anyhow!("SLAVE_TOKEN is not set; refusing to start"))?;

    let runtime = Arc::new(SlaveRuntime::new(
        cfg.slave.clone(),
        TransportOptions::from(&cfg.transport),
        token,
        Arc::new(NoopInvoker),
    ));
    info!(
        slave_id = %runtime.slave_id,
        commit = %runtime.version.git_commit,
        strategies = ?runtime.available_strategies,
        "slave starting"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let addr = format!("{}:{}", cfg.slave.bind, cfg.slave.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "slave listening");

    let app = server::build_router(runtime.clone());
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await;
    });

    if runtime.register(&cancel).await {
        runtime.heartbeat_loop(&cancel).await;
    }

    let _ = server_task.await;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn device_type_parsing_defaults_to_single_board() {
        assert_eq!(parse_device_type("desktop"), DeviceType::Desktop);
        assert_eq!(parse_device_type("server"), DeviceType::Server);
        assert_eq!(parse_device_type("toaster"), DeviceType::SingleBoard);
    }

    #[test]
    fn native_strategy_is_always_available() {
        assert!(detect_strategies().contains(&"native".to_owned()));
    }

    #[tokio::test]
    async fn latency_average_uses_a_bounded_window() {
        let runtime = SlaveRuntime::new(
            SlaveConfig::default(),
            TransportOptions::default(),
            SharedToken::new("t"),
            Arc::new(NoopInvoker),
        );
        for i in 0..40 {
            runtime.record_latency(f64::from(i)).await;
        }
        // Only the last 20 samples (20..39) count.
        let avg = runtime.average_latency().await;
        assert!((avg - 29.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn duplicate_command_application_is_idempotent() {
        let runtime = SlaveRuntime::new(
            SlaveConfig::default(),
            TransportOptions::default(),
            SharedToken::new("t"),
            Arc::new(NoopInvoker),
        );
        let genome = drover_fleet::Genome::new(serde_json::json!({"prompt": "x"}));
        let command = Command::new("s", CommandKind::DeployAgent, uuid::Uuid::new_v4(), Some(genome));

        runtime.apply(command.clone()).await;
        runtime.apply(command).await;
        assert_eq!(runtime.host.count().await, 1);
    }
}
