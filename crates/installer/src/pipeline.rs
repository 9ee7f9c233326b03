//! The guarded installation sequence.
//!
//! ```text
//! connectivity → prereqs → clone/update → container → isolated_runtime → native
//!                   │           │                 all exhausted │
//!                   └───────────┴──────────── escalate ─────────┘
//! ```

use std::{sync::Arc, time::Duration};

use {
    chrono::Utc,
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

use {
    drover_config::InstallerConfig,
    drover_requests::{HumanRequestStore, NewRequest, RequestKind},
};

use crate::{
    Result,
    exec::{ExecResult, RemoteExecutor},
    store::InstallStore,
    types::{
        AttemptOutcome, InstallFailure, InstallLogEntry, InstallTarget, InstallationRun,
        RunStatus, StrategyAttempt, StrategyKind,
    },
};

/// Escalations about broken infrastructure outrank routine requests.
const ESCALATION_PRIORITY: u8 = 8;

/// Runs installation pipelines and records every step.
pub struct Installer {
    cfg: InstallerConfig,
    store: Arc<InstallStore>,
    requests: Arc<HumanRequestStore>,
    /// Master base URL written into the new slave's config.
    master_url: String,
}

impl Installer {
    pub fn new(
        cfg: InstallerConfig,
        store: Arc<InstallStore>,
        requests: Arc<HumanRequestStore>,
        master_url: impl Into<String>,
    ) -> Self {
        Self {
            cfg,
            store,
            requests,
            master_url: master_url.into(),
        }
    }

    /// Execute the full pipeline against one target. Install failures are
    /// encoded in the returned run, not as `Err`; `Err` means the run
    /// itself could not be recorded.
    pub async fn run(
        &self,
        target: InstallTarget,
        executor: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<InstallationRun> {
        let mut run = self.store.start(target).await?;
        info!(run_id = %run.run_id, host = %run.target.host, "installation started");

        // 1. Connectivity: without a bootstrap endpoint there is nothing to
        // drive. Terminal, no escalation.
        if !executor.health().await {
            warn!(run_id = %run.run_id, "bootstrap endpoint unreachable");
            return self
                .finish(run, RunStatus::FailedConnectivity, Some(InstallFailure::Connectivity))
                .await;
        }

        // 2. Prerequisites.
        if !self.ensure_prereqs(&mut run, executor).await {
            run = self
                .finish(run, RunStatus::FailedPrereq, Some(InstallFailure::Prereq))
                .await?;
            return self.escalate(run).await;
        }
        self.store.save(run.clone()).await?;

        // 3. Repository.
        if !self.clone_or_update_repo(&mut run, executor).await {
            run = self
                .finish(run, RunStatus::FailedClone, Some(InstallFailure::Clone))
                .await?;
            return self.escalate(run).await;
        }
        self.store.save(run.clone()).await?;

        // 4. Strategy loop.
        for strategy in StrategyKind::ORDER {
            if cancel.is_cancelled() {
                info!(run_id = %run.run_id, "installation cancelled between strategies");
                run.strategy_attempts.push(StrategyAttempt {
                    strategy,
                    attempt_number: 0,
                    outcome: AttemptOutcome::Cancelled,
                    message: "cancelled before attempt".into(),
                    duration_ms: 0,
                });
                return self
                    .finish(run, RunStatus::Cancelled, None)
                    .await;
            }

            if self.try_strategy(&mut run, strategy, executor).await {
                let slave_id = slave_id_for_host(&run.target.host);
                run.status = RunStatus::Succeeded;
                run.resulting_slave_id = Some(slave_id.clone());
                run.ended_at = Some(Utc::now());
                self.store.save(run.clone()).await?;
                info!(run_id = %run.run_id, %slave_id, strategy = ?strategy, "installation succeeded");
                return Ok(run);
            }
        }

        // 5. Everything failed: hand the decision to a human.
        error!(run_id = %run.run_id, host = %run.target.host, "all strategies exhausted");
        run = self
            .finish(
                run,
                RunStatus::FailedAllStrategies,
                Some(InstallFailure::AllStrategiesExhausted),
            )
            .await?;
        self.escalate(run).await
    }

    /// Verify python3 and git, attempting an OS-appropriate install of
    /// whatever is missing.
    async fn ensure_prereqs(&self, run: &mut InstallationRun, executor: &dyn RemoteExecutor) -> bool {
        const PROBES: [(&str, &str); 2] =
            [("python3", "python3 --version"), ("git", "git --version")];

        let mut missing = Vec::new();
        for (name, probe) in PROBES {
            let result = self.exec_logged(run, None, executor, probe).await;
            if !result.success {
                missing.push(name);
            }
        }
        if missing.is_empty() {
            return true;
        }

        info!(run_id = %run.run_id, ?missing, "installing prerequisites");
        let os_probe = self
            .exec_logged(run, None, executor, "cat /etc/os-release || uname -s")
            .await;
        let os_info = os_probe.stdout.to_lowercase();

        let install = if ["debian", "ubuntu", "raspbian"].iter().any(|o| os_info.contains(o)) {
            let packages = expand_packages(&missing, "python3 python3-pip python3-venv");
            format!("sudo apt-get update && sudo apt-get install -y {packages}")
        } else if ["fedora", "centos", "rhel"].iter().any(|o| os_info.contains(o)) {
            let packages = expand_packages(&missing, "python3 python3-pip");
            format!("sudo dnf install -y {packages}")
        } else {
            warn!(run_id = %run.run_id, "unsupported OS for prerequisite install");
            return false;
        };

        if !self.exec_logged(run, None, executor, &install).await.success {
            return false;
        }
        for (_, probe) in PROBES {
            if !self.exec_logged(run, None, executor, probe).await.success {
                return false;
            }
        }
        true
    }

    /// Fetch the repository, updating in place when a checkout exists.
    async fn clone_or_update_repo(
        &self,
        run: &mut InstallationRun,
        executor: &dyn RemoteExecutor,
    ) -> bool {
        let branch = &self.cfg.branch;
        let check = self
            .exec_logged(
                run,
                None,
                executor,
                "[ -d $HOME/drover/.git ] && echo exists || echo absent",
            )
            .await;

        if check.stdout.contains("exists") {
            let update = format!(
                "cd $HOME/drover && git fetch origin && git checkout {branch} && git pull origin {branch}"
            );
            if self.exec_logged(run, None, executor, &update).await.success {
                return true;
            }
            // A wedged checkout gets replaced wholesale.
            warn!(run_id = %run.run_id, "update failed, recloning");
            self.exec_logged(run, None, executor, "rm -rf $HOME/drover").await;
        }

        let clone = format!(
            "git clone --branch {branch} {} $HOME/drover",
            self.cfg.repo_url
        );
        self.exec_logged(run, None, executor, &clone).await.success
    }

    /// One strategy with bounded retries. Succeeds only when the freshly
    /// started slave answers `/health` inside the startup window.
    async fn try_strategy(
        &self,
        run: &mut InstallationRun,
        strategy: StrategyKind,
        executor: &dyn RemoteExecutor,
    ) -> bool {
        for attempt_number in 1..=self.cfg.strategy_retries {
            let started = std::time::Instant::now();
            let outcome = self.attempt_strategy(run, strategy, executor).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => {
                    run.strategy_attempts.push(StrategyAttempt {
                        strategy,
                        attempt_number,
                        outcome: AttemptOutcome::Succeeded,
                        message: "slave healthy".into(),
                        duration_ms,
                    });
                    return true;
                },
                Err(message) => {
                    warn!(run_id = %run.run_id, ?strategy, attempt_number, %message, "strategy attempt failed");
                    run.strategy_attempts.push(StrategyAttempt {
                        strategy,
                        attempt_number,
                        outcome: AttemptOutcome::Failed,
                        message,
                        duration_ms,
                    });
                    if attempt_number < self.cfg.strategy_retries {
                        tokio::time::sleep(Duration::from_secs(self.cfg.strategy_retry_delay_secs))
                            .await;
                    }
                },
            }
        }
        false
    }

    async fn attempt_strategy(
        &self,
        run: &mut InstallationRun,
        strategy: StrategyKind,
        executor: &dyn RemoteExecutor,
    ) -> std::result::Result<(), String> {
        match strategy {
            StrategyKind::Container => self.provision_container(run, executor).await?,
            StrategyKind::IsolatedRuntime => self.provision_isolated(run, executor).await?,
            StrategyKind::Native => self.provision_native(run, executor).await?,
        }

        if self.await_healthy(executor).await {
            Ok(())
        } else {
            Err("slave did not become healthy within the startup window".into())
        }
    }

    async fn provision_container(
        &self,
        run: &mut InstallationRun,
        executor: &dyn RemoteExecutor,
    ) -> std::result::Result<(), String> {
        let strategy = Some(StrategyKind::Container);
        if !self
            .exec_logged(run, strategy, executor, "docker --version")
            .await
            .success
        {
            let install = self
                .exec_logged(run, strategy, executor, "curl -fsSL https://get.docker.com | sh")
                .await;
            if !install.success {
                return Err("docker runtime could not be installed".into());
            }
            self.exec_logged(run, strategy, executor, "sudo usermod -aG docker $USER")
                .await;
        }

        self.write_slave_config(run, strategy, executor).await?;

        let up = self
            .exec_logged(
                run,
                strategy,
                executor,
                "cd $HOME/drover && docker compose up -d --build slave",
            )
            .await;
        if up.success {
            Ok(())
        } else {
            Err(format!("docker compose failed: {}", up.stderr))
        }
    }

    async fn provision_isolated(
        &self,
        run: &mut InstallationRun,
        executor: &dyn RemoteExecutor,
    ) -> std::result::Result<(), String> {
        let strategy = Some(StrategyKind::IsolatedRuntime);
        self.build_release(run, strategy, executor).await?;
        self.write_slave_config(run, strategy, executor).await?;

        // Clear any previous unit before starting a fresh one.
        self.exec_logged(run, strategy, executor, "systemctl --user stop drover-slave 2>/dev/null || true")
            .await;
        let start = self
            .exec_logged(
                run,
                strategy,
                executor,
                "systemd-run --user --collect --unit drover-slave $HOME/drover/target/release/drover slave",
            )
            .await;
        if start.success {
            Ok(())
        } else {
            Err(format!("systemd-run failed: {}", start.stderr))
        }
    }

    async fn provision_native(
        &self,
        run: &mut InstallationRun,
        executor: &dyn RemoteExecutor,
    ) -> std::result::Result<(), String> {
        let strategy = Some(StrategyKind::Native);
        self.build_release(run, strategy, executor).await?;
        self.write_slave_config(run, strategy, executor).await?;

        let start = self
            .exec_logged(
                run,
                strategy,
                executor,
                "cd $HOME/drover && nohup ./target/release/drover slave > slave.log 2>&1 &",
            )
            .await;
        if !start.success {
            return Err(format!("could not start slave process: {}", start.stderr));
        }

        let check = self
            .exec_logged(run, strategy, executor, "pgrep -f 'drover slave'")
            .await;
        if check.success {
            Ok(())
        } else {
            Err("slave process not running after start".into())
        }
    }

    async fn build_release(
        &self,
        run: &mut InstallationRun,
        strategy: Option<StrategyKind>,
        executor: &dyn RemoteExecutor,
    ) -> std::result::Result<(), String> {
        let toolchain = self
            .exec_logged(
                run,
                strategy,
                executor,
                "command -v cargo || curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y",
            )
            .await;
        if !toolchain.success {
            return Err("rust toolchain unavailable".into());
        }

        let build = self
            .exec_logged(
                run,
                strategy,
                executor,
                "cd $HOME/drover && $HOME/.cargo/bin/cargo build --release --bin drover 2>&1 | tail -n 20",
            )
            .await;
        if build.success {
            Ok(())
        } else {
            Err(format!("release build failed: {}", build.stderr))
        }
    }

    /// Lay down the slave's listen address, port, and master URL. The shared
    /// secret is never written; it is pre-shared out of band.
    async fn write_slave_config(
        &self,
        run: &mut InstallationRun,
        strategy: Option<StrategyKind>,
        executor: &dyn RemoteExecutor,
    ) -> std::result::Result<(), String> {
        let config = format!(
            "cat > $HOME/drover/drover.toml <<'EOF'\n[slave]\nbind = \"0.0.0.0\"\nport = {}\nmaster_url = \"{}\"\nEOF",
            run.target.port, self.master_url
        );
        let result = self.exec_logged(run, strategy, executor, &config).await;
        if result.success {
            Ok(())
        } else {
            Err("could not write slave config".into())
        }
    }

    async fn await_healthy(&self, executor: &dyn RemoteExecutor) -> bool {
        let deadline = std::time::Instant::now() + self.cfg.startup_window();
        loop {
            if executor.health().await {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(2).min(deadline - now)).await;
        }
    }

    async fn exec_logged(
        &self,
        run: &mut InstallationRun,
        strategy: Option<StrategyKind>,
        executor: &dyn RemoteExecutor,
        command: &str,
    ) -> ExecResult {
        let result = executor.execute(command, None).await;
        run.log.push(InstallLogEntry {
            at: Utc::now(),
            strategy,
            command: command.to_owned(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            exit_code: result.exit_code,
        });
        result
    }

    async fn finish(
        &self,
        mut run: InstallationRun,
        status: RunStatus,
        failure: Option<InstallFailure>,
    ) -> Result<InstallationRun> {
        run.status = status;
        run.failure = failure;
        run.ended_at = Some(Utc::now());
        self.store.save(run.clone()).await?;
        Ok(run)
    }

    /// Park the failure in the human-request queue. Never blocks on the
    /// decision; resolution is asynchronous.
    async fn escalate(&self, mut run: InstallationRun) -> Result<InstallationRun> {
        let strategies_tried: Vec<String> = run
            .strategy_attempts
            .iter()
            .map(|a| format!("{:?} #{} → {:?}", a.strategy, a.attempt_number, a.outcome))
            .collect();
        let log_path = self.store.run_path(run.run_id);

        let request = self
            .requests
            .create(NewRequest {
                kind: RequestKind::Other,
                title: format!("Slave installation failed: {}", run.target.host),
                description: format!(
                    "Installation run {} against {}:{} failed ({:?}).\n\n\
                     Strategies tried:\n{}\n\n\
                     Full command log: {}\n\n\
                     Decide whether to fix the host manually, retry with \
                     different credentials, or drop the node.",
                    run.run_id,
                    run.target.host,
                    run.target.port,
                    run.failure,
                    if strategies_tried.is_empty() {
                        "  (none reached)".to_owned()
                    } else {
                        strategies_tried.join("\n")
                    },
                    log_path.display(),
                ),
                estimated_cost: None,
                priority: ESCALATION_PRIORITY,
                created_by: "installer".into(),
            })
            .await?;

        run.status = RunStatus::Escalated;
        run.escalation_request_id = Some(request.request_id);
        self.store.save(run.clone()).await?;
        info!(run_id = %run.run_id, request_id = request.request_id, "installation escalated");
        Ok(run)
    }
}

fn slave_id_for_host(host: &str) -> String {
    format!("slave-{}", host.replace(['.', ':'], "-"))
}

/// Package list for the missing prereqs; python3 pulls its tooling along.
fn expand_packages(missing: &[&str], python_packages: &str) -> String {
    missing
        .iter()
        .map(|tool| match *tool {
            "python3" => python_packages,
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}
