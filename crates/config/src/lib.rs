//! Configuration loading for masters and slaves.
//!
//! Config file: `drover.toml`, searched in `./` then `~/.config/drover/`.
//! Every section is optional; defaults match the values the control plane
//! ships with. The shared bearer secret is intentionally NOT part of the
//! config file — it only ever comes from the `SLAVE_TOKEN` environment
//! variable.

pub mod loader;
pub mod schema;

pub use {
    loader::{data_dir, discover_and_load, load_config},
    schema::{
        DroverConfig, FleetConfig, InstallerConfig, MasterConfig, OverbookingConfig, SlaveConfig,
        TransportConfig,
    },
};
