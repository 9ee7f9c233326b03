use std::{path::PathBuf, process::ExitCode, sync::Arc};

use {
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{error, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    drover_common::token::SharedToken,
    drover_config::DroverConfig,
    drover_installer::{HttpExecutor, InstallStore, InstallTarget, Installer, RunStatus},
    drover_requests::{HumanRequestStore, TracingListener},
    drover_transport::{RequestOpts, RobustClient, TransportOptions},
};

#[derive(Parser)]
#[command(name = "drover", about = "Drover — distributed agent control plane")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Explicit config file (overrides discovery).
    #[arg(long, global = true, env = "DROVER_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (overrides config value).
    #[arg(long, global = true, env = "DROVER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the master: HTTP facade, health monitor, durable fleet state.
    Orchestrator,
    /// Run a slave runtime on this node.
    Slave {
        /// Master base URL (overrides config).
        #[arg(long)]
        master: Option<String>,
    },
    /// Show the fleet as the master sees it.
    SlavesMenu {
        /// Master base URL (overrides config).
        #[arg(long)]
        master: Option<String>,
    },
    /// Provision a new slave through its bootstrap endpoint.
    Install {
        /// Target host.
        host: String,
        /// Account on the target; recorded as the credentials reference.
        user: String,
        /// Bootstrap port on the target.
        #[arg(long, default_value_t = 7600)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let mut cfg = match cli.config {
        Some(ref path) => match drover_config::load_config(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not load config");
                return ExitCode::from(1);
            },
        },
        None => drover_config::discover_and_load(),
    };
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = Some(dir);
    }

    let result = match cli.command {
        Commands::Orchestrator => run_orchestrator(cfg).await,
        Commands::Slave { master } => run_slave(cfg, master).await,
        Commands::SlavesMenu { master } => run_slaves_menu(cfg, master).await,
        Commands::Install { host, user, port } => return run_install(cfg, host, user, port).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::from(1)
        },
    }
}

fn init_tracing(log_level: &str, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn run_orchestrator(cfg: DroverConfig) -> anyhow::Result<()> {
    drover_orchestrator::run(cfg).await
}

async fn run_slave(mut cfg: DroverConfig, master: Option<String>) -> anyhow::Result<()> {
    if let Some(master) = master {
        cfg.slave.master_url = master;
    }
    drover_slave::run(cfg).await
}

async fn run_slaves_menu(cfg: DroverConfig, master: Option<String>) -> anyhow::Result<()> {
    let master_url = master.unwrap_or_else(|| cfg.slave.master_url.clone());
    let client = RobustClient::new(TransportOptions::from(&cfg.transport));

    let body: serde_json::Value = client
        .get_json(
            &format!("{master_url}/api/slaves/list"),
            &RequestOpts::default(),
        )
        .await?;
    let slaves = body["slaves"].as_array().cloned().unwrap_or_default();

    println!("Fleet at {master_url} — {} slave(s)", slaves.len());
    println!(
        "{:<20} {:<22} {:<17} {:<10} {:<18} commit",
        "ID", "ENDPOINT", "STATUS", "AGENTS", "LAST SEEN"
    );
    let placements: serde_json::Value = client
        .get_json(
            &format!("{master_url}/api/agents/placements"),
            &RequestOpts::default(),
        )
        .await
        .unwrap_or_else(|_| serde_json::json!({ "placements": {} }));

    for slave in &slaves {
        let id = slave["slave_id"].as_str().unwrap_or("?");
        let endpoint = format!(
            "{}:{}",
            slave["host"].as_str().unwrap_or("?"),
            slave["port"].as_u64().unwrap_or(0)
        );
        let status = slave["status"].as_str().unwrap_or("unknown");
        let agents = placements["placements"]
            .as_object()
            .map(|map| {
                map.values()
                    .filter(|p| p["slave_id"].as_str() == Some(id))
                    .count()
            })
            .unwrap_or(0);
        let last_seen = slave["last_seen_at"].as_str().unwrap_or("never");
        let commit = slave["version"]["git_commit"].as_str().unwrap_or("unknown");
        println!("{id:<20} {endpoint:<22} {status:<17} {agents:<10} {last_seen:<18} {commit}");
    }
    Ok(())
}

/// Exit codes: 0 installed, 1 recoverable failure, 2 escalated to a human.
async fn run_install(cfg: DroverConfig, host: String, user: String, port: u16) -> ExitCode {
    let Some(token) = SharedToken::from_env() else {
        error!("SLAVE_TOKEN is not set; the installer cannot talk to the bootstrap endpoint");
        return ExitCode::from(1);
    };

    let data_dir = drover_config::data_dir(&cfg);
    let (installs, requests) = match load_stores(&data_dir).await {
        Ok(stores) => stores,
        Err(e) => {
            error!(error = %e, "could not open install stores");
            return ExitCode::from(1);
        },
    };
    requests.add_listener(Arc::new(TracingListener)).await;

    let target = InstallTarget {
        host: host.clone(),
        port,
        credentials_ref: format!("{user}@{host}"),
    };
    let executor = HttpExecutor::new(
        RobustClient::new(TransportOptions::from(&cfg.transport)),
        target.base_url(),
        token.expose(),
        cfg.installer.command_timeout(),
    );
    let installer = Installer::new(
        cfg.installer.clone(),
        installs,
        requests,
        cfg.slave.master_url.clone(),
    );

    match installer
        .run(target, &executor, &CancellationToken::new())
        .await
    {
        Ok(run) => {
            info!(run_id = %run.run_id, status = ?run.status, "installation finished");
            match run.status {
                RunStatus::Succeeded => {
                    println!(
                        "installed: {}",
                        run.resulting_slave_id.as_deref().unwrap_or("(unnamed)")
                    );
                    ExitCode::SUCCESS
                },
                RunStatus::Escalated => {
                    println!(
                        "escalated: human request #{} — see run {}",
                        run.escalation_request_id.unwrap_or_default(),
                        run.run_id
                    );
                    ExitCode::from(2)
                },
                _ => {
                    println!("failed: {:?} — see run {}", run.status, run.run_id);
                    ExitCode::from(1)
                },
            }
        },
        Err(e) => {
            error!(error = %e, "installation run could not be recorded");
            ExitCode::from(1)
        },
    }
}

async fn load_stores(
    data_dir: &std::path::Path,
) -> anyhow::Result<(Arc<InstallStore>, Arc<HumanRequestStore>)> {
    let installs = Arc::new(InstallStore::load(data_dir).await?);
    let requests = Arc::new(HumanRequestStore::load(data_dir).await?);
    Ok((installs, requests))
}
