//! Robust HTTP client used for every master↔slave call.
//!
//! Wraps `reqwest` with bounded retries, exponential backoff, per-call
//! timeouts, and a per-target circuit breaker. A remote installation or
//! command poll that loses the network must neither block indefinitely nor
//! stampede a recovering peer.

mod breaker;
mod client;

pub use {
    breaker::{BreakerSnapshot, CircuitBreaker},
    client::{RequestOpts, RobustClient, TransportOptions},
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The breaker for this target is open; the network was not touched.
    #[error("circuit open for {target}")]
    CircuitOpen { target: String },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    /// Non-2xx response. 4xx responses land here without any retry.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response body: {0}")]
    Decode(String),

    /// All retry attempts were spent on transient failures.
    #[error("request failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

impl Error {
    /// Transient failures are worth retrying; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Connect(_) => true,
            Error::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
