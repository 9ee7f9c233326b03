//! Remote installer: turns an unprovisioned host with a bootstrap endpoint
//! into a registered slave.
//!
//! The pipeline is connectivity → prerequisites → clone → strategy loop
//! (container, isolated runtime, native). Every remote command and its
//! output lands in the run's structured log; irrecoverable failures
//! escalate into the human-request queue instead of blocking.

mod exec;
mod pipeline;
mod store;
mod types;

pub use {
    exec::{ExecResult, HttpExecutor, RemoteExecutor},
    pipeline::Installer,
    store::{InstallStore, InstallSummary},
    types::{
        InstallFailure, InstallLogEntry, InstallTarget, InstallationRun, RunStatus,
        StrategyAttempt, StrategyKind,
    },
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown installation run: {0}")]
    NotFound(uuid::Uuid),

    #[error(transparent)]
    Persistence(#[from] drover_common::Error),

    #[error("human request escalation failed: {0}")]
    Escalation(#[from] drover_requests::Error),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Persistence(_) => "persistence",
            Error::Escalation(_) => "escalation",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
