//! Durable queue of control-plane actions paused for a human decision.
//!
//! The store is single-writer: every typed transition (`create`, `approve`,
//! `reject`, `complete`, `cancel`) runs under one mutex and lands atomically
//! on disk before it returns. Listeners get best-effort notifications on
//! create; a missing or failing listener never fails the operation.

mod store;
mod types;

pub use {
    store::{HumanRequestStore, RequestListener, TracingListener},
    types::{HumanRequest, NewRequest, RequestKind, RequestState},
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown request: {0}")]
    NotFound(u64),

    #[error("invalid state transition for request {request_id}: {from:?} → {to:?}")]
    InvalidStateTransition {
        request_id: u64,
        from: RequestState,
        to: RequestState,
    },

    #[error(transparent)]
    Persistence(#[from] drover_common::Error),
}

impl Error {
    /// Stable kind string for `{error, kind}` HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidStateTransition { .. } => "invalid_state_transition",
            Error::Persistence(_) => "persistence",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
