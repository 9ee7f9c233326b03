//! Durable store of installation runs, keyed by run id.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    chrono::Utc,
    serde::Serialize,
    tokio::sync::Mutex,
    uuid::Uuid,
};

use drover_common::fs as dfs;

use crate::{
    Error, Result,
    types::{InstallLogEntry, InstallTarget, InstallationRun, RunStatus},
};

/// Counts by terminal state, for `/api/installation/status`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct InstallSummary {
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub escalated: usize,
}

/// In-memory run map with one JSON file per run on disk.
pub struct InstallStore {
    dir: PathBuf,
    runs: Mutex<BTreeMap<Uuid, InstallationRun>>,
}

impl InstallStore {
    /// Load all persisted runs from `<data_dir>/installations/`.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("installations");
        let mut runs = BTreeMap::new();

        if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json")
                    && let Ok(Some(run)) = dfs::read_json::<InstallationRun>(&path).await
                {
                    runs.insert(run.run_id, run);
                }
            }
        }

        Ok(Self {
            dir,
            runs: Mutex::new(runs),
        })
    }

    /// Open a new run in `in_progress`.
    pub async fn start(&self, target: InstallTarget) -> Result<InstallationRun> {
        let run = InstallationRun::new(target);
        self.save(run.clone()).await?;
        Ok(run)
    }

    /// Persist the current shape of a run (pipeline checkpoints).
    pub async fn save(&self, run: InstallationRun) -> Result<()> {
        dfs::atomic_write_json(&self.run_path(run.run_id), &run).await?;
        self.runs.lock().await.insert(run.run_id, run);
        Ok(())
    }

    /// Append a progress entry reported over HTTP by the target itself.
    pub async fn append_progress(&self, run_id: Uuid, entry: InstallLogEntry) -> Result<()> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(&run_id).ok_or(Error::NotFound(run_id))?;
        run.log.push(entry);
        let snapshot = run.clone();
        drop(runs);
        dfs::atomic_write_json(&self.run_path(run_id), &snapshot).await?;
        Ok(())
    }

    /// Mark a run succeeded with the slave that came out of it.
    pub async fn complete(&self, run_id: Uuid, resulting_slave_id: String) -> Result<InstallationRun> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(&run_id).ok_or(Error::NotFound(run_id))?;
        run.status = RunStatus::Succeeded;
        run.resulting_slave_id = Some(resulting_slave_id);
        run.ended_at = Some(Utc::now());
        let snapshot = run.clone();
        drop(runs);
        dfs::atomic_write_json(&self.run_path(run_id), &snapshot).await?;
        Ok(snapshot)
    }

    pub async fn get(&self, run_id: Uuid) -> Option<InstallationRun> {
        self.runs.lock().await.get(&run_id).cloned()
    }

    pub async fn list(&self) -> Vec<InstallationRun> {
        self.runs.lock().await.values().cloned().collect()
    }

    pub async fn summary(&self) -> InstallSummary {
        let runs = self.runs.lock().await;
        let mut summary = InstallSummary::default();
        for run in runs.values() {
            match run.status {
                RunStatus::InProgress => summary.in_progress += 1,
                RunStatus::Succeeded => summary.succeeded += 1,
                RunStatus::Escalated => summary.escalated += 1,
                _ => summary.failed += 1,
            }
        }
        summary
    }

    /// Where a run's log lives on disk; referenced in escalations.
    pub fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn target() -> InstallTarget {
        InstallTarget {
            host: "192.168.1.50".into(),
            port: 7600,
            credentials_ref: "cred-test".into(),
        }
    }

    #[tokio::test]
    async fn runs_survive_reload() {
        let dir = tempfile::tempdir().unwrap();

        let run_id = {
            let store = InstallStore::load(dir.path()).await.unwrap();
            store.start(target()).await.unwrap().run_id
        };

        let store = InstallStore::load(dir.path()).await.unwrap();
        let run = store.get(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert_eq!(run.target.host, "192.168.1.50");
    }

    #[tokio::test]
    async fn progress_appends_and_complete_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstallStore::load(dir.path()).await.unwrap();
        let run = store.start(target()).await.unwrap();

        store
            .append_progress(run.run_id, InstallLogEntry {
                at: Utc::now(),
                strategy: None,
                command: "git --version".into(),
                stdout: "git version 2.43.0".into(),
                stderr: String::new(),
                exit_code: 0,
            })
            .await
            .unwrap();

        let done = store
            .complete(run.run_id, "slave-192-168-1-50".into())
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(done.log.len(), 1);
        assert!(done.ended_at.is_some());

        let summary = store.summary().await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.in_progress, 0);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstallStore::load(dir.path()).await.unwrap();
        assert!(matches!(
            store.complete(Uuid::new_v4(), "slave-x".into()).await,
            Err(Error::NotFound(_))
        ));
    }
}
