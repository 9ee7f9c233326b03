//! Per-slave command queues: FIFO delivery, acknowledgement, redelivery.

use {
    chrono::{DateTime, Utc},
    tracing::{debug, error, info},
    uuid::Uuid,
};

use crate::{
    Error, Fleet, Result,
    state::FleetInner,
    types::{Command, CommandKind},
};

impl Fleet {
    /// Queue a command for a slave. Internal callers already hold the lock.
    pub(crate) fn enqueue_locked(&self, inner: &mut FleetInner, command: Command) {
        debug!(slave_id = %command.slave_id, kind = ?command.kind,
               agent_id = %command.agent_id, "command enqueued");
        inner
            .queues
            .entry(command.slave_id.clone())
            .or_default()
            .pending
            .push_back(command);
    }

    /// Return and remove everything currently queued for `slave_id`, in
    /// FIFO order. Delivered commands move to the awaiting-ack set until a
    /// heartbeat shows their effect.
    pub async fn drain_commands(&self, slave_id: &str) -> Result<Vec<Command>> {
        let mut inner = self.inner.write().await;
        if !inner.slaves.contains_key(slave_id) {
            return Err(Error::NotFound(format!("slave {slave_id}")));
        }
        let now = Utc::now();

        let queue = inner.queues.entry(slave_id.to_owned()).or_default();
        let mut delivered = Vec::with_capacity(queue.pending.len());
        while let Some(mut command) = queue.pending.pop_front() {
            command.delivered_at = Some(now);
            command.deliveries += 1;
            queue.awaiting.push(command.clone());
            delivered.push(command);
        }

        if !delivered.is_empty() {
            info!(slave_id, count = delivered.len(), "commands drained");
            self.persist_queue(&inner, slave_id).await?;
        }
        Ok(delivered)
    }

    /// Drop awaiting commands for `agent_id` whose effect has been observed.
    pub(crate) fn ack_commands(
        &self,
        inner: &mut FleetInner,
        slave_id: &str,
        agent_id: Uuid,
        kinds: &[CommandKind],
    ) {
        if let Some(queue) = inner.queues.get_mut(slave_id) {
            queue
                .awaiting
                .retain(|c| c.agent_id != agent_id || !kinds.contains(&c.kind));
        }
    }

    /// Re-enqueue delivered-but-unacknowledged commands past the grace
    /// window. A command out of redeliveries fails its hosting intent.
    /// Returns `(redelivered, failed_intents)`.
    pub(crate) fn redeliver_stale(
        &self,
        inner: &mut FleetInner,
        slave_id: &str,
        now: DateTime<Utc>,
    ) -> (usize, usize) {
        let grace = chrono::Duration::from_std(self.cfg.redeliver_after())
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let max_deliveries = 1 + self.cfg.max_redeliveries;

        let Some(queue) = inner.queues.get_mut(slave_id) else {
            return (0, 0);
        };

        let mut redeliver = Vec::new();
        let mut failed = Vec::new();
        queue.awaiting.retain(|command| {
            let stale = command
                .delivered_at
                .is_some_and(|delivered| now - delivered > grace);
            if !stale {
                return true;
            }
            if command.deliveries >= max_deliveries {
                failed.push(command.clone());
            } else {
                redeliver.push(command.clone());
            }
            false
        });

        let redelivered = redeliver.len();
        for command in redeliver {
            debug!(slave_id, command_id = %command.command_id, deliveries = command.deliveries,
                   "redelivering unacknowledged command");
            queue.pending.push_back(command);
        }

        let failed_count = failed.len();
        for command in failed {
            error!(slave_id, command_id = %command.command_id, kind = ?command.kind,
                   agent_id = %command.agent_id, "command out of redeliveries, failing intent");
            // The slave is alive but never acknowledged this agent's
            // command; the hosting intent is abandoned rather than left
            // pending forever. (Orphaned is reserved for offline slaves.)
            if let Some(agent) = inner.agents.get(&command.agent_id)
                && agent.status.is_pending()
            {
                inner.agents.remove(&command.agent_id);
            }
        }

        (redelivered, failed_count)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testutil;

    #[tokio::test]
    async fn drain_is_fifo_and_empties_the_queue() {
        let (fleet, _dir) = testutil::fleet().await;
        testutil::register_slave(&fleet, "raspi-001", 8).await;

        let first = fleet.deploy(testutil::genome("a")).await.unwrap();
        let second = fleet.deploy(testutil::genome("b")).await.unwrap();

        let drained = fleet.drain_commands("raspi-001").await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].agent_id, first);
        assert_eq!(drained[1].agent_id, second);
        assert!(drained.iter().all(|c| c.delivered_at.is_some()));

        assert!(fleet.drain_commands("raspi-001").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_after_unregister_is_not_found() {
        let (fleet, _dir) = testutil::fleet().await;
        testutil::register_slave(&fleet, "raspi-001", 8).await;
        fleet.deploy(testutil::genome("a")).await.unwrap();

        fleet.unregister("raspi-001").await.unwrap();
        assert!(matches!(
            fleet.drain_commands("raspi-001").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unacknowledged_commands_are_redelivered_up_to_the_limit() {
        let (fleet, _dir) = testutil::fleet().await;
        testutil::register_slave(&fleet, "raspi-001", 8).await;
        let agent_id = fleet.deploy(testutil::genome("a")).await.unwrap();

        // Initial delivery plus three redeliveries, never acknowledged.
        for round in 0u32..4 {
            let drained = fleet.drain_commands("raspi-001").await.unwrap();
            assert_eq!(drained.len(), 1, "delivery round {round}");
            assert_eq!(drained[0].deliveries, round + 1);

            let later = Utc::now() + chrono::Duration::seconds(120);
            fleet.sweep(later).await.unwrap();
        }

        // Out of redeliveries: intent failed, nothing left to drain, and the
        // abandoned agent is gone from the pool.
        assert!(fleet.drain_commands("raspi-001").await.unwrap().is_empty());
        assert!(
            !fleet
                .agents()
                .await
                .iter()
                .any(|a| a.agent_id == agent_id)
        );
    }

    #[tokio::test]
    async fn acknowledged_commands_are_not_redelivered() {
        let (fleet, _dir) = testutil::fleet().await;
        testutil::register_slave(&fleet, "raspi-001", 8).await;
        let agent_id = fleet.deploy(testutil::genome("a")).await.unwrap();

        fleet.drain_commands("raspi-001").await.unwrap();
        testutil::report_agents(&fleet, "raspi-001", &[(agent_id, "active")]).await;

        let later = Utc::now() + chrono::Duration::seconds(120);
        let report = fleet.sweep(later).await.unwrap();
        assert_eq!(report.redelivered, 0);
    }
}
