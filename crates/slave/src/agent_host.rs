//! In-process registry of hosted agents.
//!
//! The control plane sees agents as opaque: an id, a genome, and a status.
//! Each deployed agent gets its own background task; a panicking or
//! erroring agent flips to `failed` locally and is reported as such on the
//! next heartbeat, while the runtime itself keeps going.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    tokio::{sync::Mutex, task::JoinHandle},
    tracing::{info, warn},
    uuid::Uuid,
};

use drover_fleet::{AgentReport, Genome};

use crate::llm::LlmInvoker;

/// How often an agent's background behavior ticks.
const BEHAVIOR_TICK: Duration = Duration::from_secs(60);

struct HostedAgent {
    genome: Genome,
    task: JoinHandle<()>,
}

/// Owns every agent on this node.
pub struct AgentHost {
    invoker: Arc<dyn LlmInvoker>,
    agents: Mutex<HashMap<Uuid, HostedAgent>>,
}

impl AgentHost {
    pub fn new(invoker: Arc<dyn LlmInvoker>) -> Self {
        Self {
            invoker,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Instantiate an agent from its genome and start its declared
    /// behavior. Idempotent: re-deploying a live agent with the same
    /// genome is a no-op, a different genome is treated as an update.
    pub async fn deploy(&self, agent_id: Uuid, genome: Genome) {
        let mut agents = self.agents.lock().await;
        if let Some(existing) = agents.get(&agent_id) {
            if existing.genome.hash == genome.hash {
                return;
            }
            // Same id, new genome: swap.
            info!(%agent_id, "re-deploy with new genome, recreating");
        }
        if let Some(old) = agents.remove(&agent_id) {
            old.task.abort();
        }
        let task = self.spawn_behavior(agent_id, genome.clone());
        agents.insert(agent_id, HostedAgent { genome, task });
        info!(%agent_id, "agent deployed");
    }

    /// Stop and remove an agent. Unknown ids are a no-op.
    pub async fn destroy(&self, agent_id: Uuid) {
        let mut agents = self.agents.lock().await;
        match agents.remove(&agent_id) {
            Some(agent) => {
                agent.task.abort();
                info!(%agent_id, "agent destroyed");
            },
            None => {
                warn!(%agent_id, "destroy for unknown agent, ignoring");
            },
        }
    }

    /// Atomic genome replacement, implemented as destroy-and-recreate:
    /// the old behavior task is stopped before the new one starts, so the
    /// agent is quiescent in between.
    pub async fn update_genome(&self, agent_id: Uuid, genome: Genome) {
        let mut agents = self.agents.lock().await;
        if let Some(old) = agents.remove(&agent_id) {
            old.task.abort();
        }
        let task = self.spawn_behavior(agent_id, genome.clone());
        agents.insert(agent_id, HostedAgent { genome, task });
        info!(%agent_id, "genome updated");
    }

    /// Status of every hosted agent, as sent in heartbeats. A finished
    /// behavior task means the agent died on its own.
    pub async fn report(&self) -> HashMap<Uuid, AgentReport> {
        let agents = self.agents.lock().await;
        agents
            .iter()
            .map(|(id, agent)| {
                let status = if agent.task.is_finished() {
                    "failed"
                } else {
                    "active"
                };
                (*id, AgentReport {
                    status: status.to_owned(),
                })
            })
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.agents.lock().await.len()
    }

    pub async fn genome_hash(&self, agent_id: Uuid) -> Option<String> {
        self.agents
            .lock()
            .await
            .get(&agent_id)
            .map(|a| a.genome.hash.clone())
    }

    fn spawn_behavior(&self, agent_id: Uuid, genome: Genome) -> JoinHandle<()> {
        let invoker = self.invoker.clone();
        tokio::spawn(async move {
            let prompt = genome
                .data
                .get("prompt")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned();
            loop {
                tokio::time::sleep(BEHAVIOR_TICK).await;
                if prompt.is_empty() {
                    continue;
                }
                // An agent that fails its own action reports through its
                // channel; the runtime stays up either way.
                if let Err(e) = invoker.invoke(&prompt).await {
                    warn!(%agent_id, error = %e, "agent action failed");
                }
            }
        })
    }
}
