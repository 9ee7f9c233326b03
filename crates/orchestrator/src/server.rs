use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router, middleware,
        routing::{get, post},
    },
    tokio_util::sync::CancellationToken,
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use {
    drover_common::{VersionInfo, token::SharedToken},
    drover_config::DroverConfig,
    drover_fleet::{Fleet, HealthMonitor},
    drover_installer::InstallStore,
    drover_requests::{HumanRequestStore, TracingListener},
    drover_transport::{RobustClient, TransportOptions},
};

use crate::{
    agent_routes, auth::require_auth, cluster_routes, install_routes, request_routes,
    slave_routes, state::AppState,
};

/// Assemble the full facade router. Mutating routes sit behind bearer
/// auth; reads are open.
pub fn build_router(state: AppState) -> Router {
    let writes = Router::new()
        .route("/api/slaves/register", post(slave_routes::register))
        .route("/api/slaves/{id}/heartbeat", post(slave_routes::heartbeat))
        .route("/api/slaves/{id}/unregister", post(slave_routes::unregister))
        .route("/api/agents/deploy", post(agent_routes::deploy))
        .route("/api/agents/{id}/destroy", post(agent_routes::destroy))
        .route("/api/agents/{id}/update_genome", post(agent_routes::update_genome))
        .route("/api/installation/start", post(install_routes::start))
        .route("/api/installation/progress", post(install_routes::progress))
        .route("/api/installation/complete", post(install_routes::complete))
        .route("/api/requests/{id}/approve", post(request_routes::approve))
        .route("/api/requests/{id}/reject", post(request_routes::reject))
        .route("/api/requests/{id}/complete", post(request_routes::complete))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let reads = Router::new()
        .route("/api/slaves/{id}/commands", get(slave_routes::pull_commands))
        .route("/api/slaves/list", get(slave_routes::list))
        .route("/api/agents/placements", get(agent_routes::placements))
        .route("/api/cluster/stats", get(cluster_routes::stats))
        .route("/api/cluster/dashboard", get(cluster_routes::dashboard))
        .route("/api/installation/status", get(install_routes::status))
        .route("/api/installation/{id}", get(install_routes::detail))
        .route("/api/requests/pending", get(request_routes::pending))
        .route("/health", get(cluster_routes::health));

    writes
        .merge(reads)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the master: load stores, start the monitor, serve until ctrl-c,
/// then persist the final snapshot.
///
/// A missing `SLAVE_TOKEN` is fatal — the master refuses to serve without
/// the shared secret.
pub async fn run(cfg: DroverConfig) -> anyhow::Result<()> {
    let token = SharedToken::from_env()
        .ok_or_else(|| anyhow::anyhow!("SLAVE_TOKEN is not set; refusing to serve"))?;

    let data_dir = drover_config::data_dir(&cfg);
    let master_version = VersionInfo::capture(env!("CARGO_PKG_VERSION"));
    info!(
        commit = %master_version.git_commit,
        branch = %master_version.git_branch,
        data_dir = %data_dir.display(),
        "master starting"
    );

    let fleet = Arc::new(Fleet::load(cfg.fleet.clone(), &data_dir, master_version).await?);
    let installs = Arc::new(InstallStore::load(&data_dir).await?);
    let requests = Arc::new(HumanRequestStore::load(&data_dir).await?);
    requests.add_listener(Arc::new(TracingListener)).await;

    let state = AppState::new(fleet.clone(), installs, requests, token);
    let app = build_router(state);

    let cancel = CancellationToken::new();
    let client = Arc::new(RobustClient::new(TransportOptions::from(&cfg.transport)));
    let monitor = HealthMonitor::spawn(fleet.clone(), client, cancel.child_token());

    // ctrl-c starts the shutdown sequence: monitor first, then the server.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let addr: SocketAddr = format!("{}:{}", cfg.master.bind, cfg.master.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "orchestrator listening");

    let shutdown = cancel.clone();
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    };

    let grace = Duration::from_secs(cfg.master.shutdown_grace_secs);
    let drain_deadline = async {
        cancel.cancelled().await;
        tokio::time::sleep(grace).await;
    };
    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            warn!(grace_secs = grace.as_secs(), "drain deadline elapsed, closing");
        },
    }

    // The monitor holds the only background reference; wait for it so the
    // final snapshot is written after its last sweep. (The token is already
    // cancelled on the ctrl-c path; this covers a server-side exit.)
    cancel.cancel();
    let _ = monitor.await;
    fleet.persist_all().await?;
    info!("final snapshot persisted, goodbye");
    Ok(())
}
