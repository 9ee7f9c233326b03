//! Shared types, error definitions, and utilities used across all drover crates.

pub mod error;
pub mod fs;
pub mod token;
pub mod version;

pub use {
    error::{Error, Result},
    version::VersionInfo,
};
