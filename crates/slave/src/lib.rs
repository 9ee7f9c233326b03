//! Slave agent runtime: the per-node process.
//!
//! On start it registers with the master, then heartbeats on an interval,
//! reporting hosted agents and pulling queued commands. Hosted agents are
//! opaque genome-driven behaviors; each runs in its own task, so one
//! misbehaving agent cannot take the runtime down. The HTTP surface
//! (`/health`, `/version`, `/execute`, `/commands`) doubles as the
//! bootstrap endpoint the remote installer drives.

pub mod agent_host;
pub mod llm;
pub mod runtime;
pub mod server;

pub use {
    agent_host::AgentHost,
    llm::{LlmInvoker, NoopInvoker},
    runtime::{SlaveRuntime, run},
};
