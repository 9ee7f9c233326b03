use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::DroverConfig;

/// Standard config file name.
const CONFIG_FILENAME: &str = "drover.toml";

/// Load config from an explicit path.
pub fn load_config(path: &Path) -> anyhow::Result<DroverConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    Ok(toml::from_str(&raw)?)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./drover.toml` (project-local)
/// 2. `~/.config/drover/drover.toml` (user-global)
///
/// Returns `DroverConfig::default()` if no config file is found, then
/// applies environment overrides in both cases.
pub fn discover_and_load() -> DroverConfig {
    let mut cfg = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    DroverConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            DroverConfig::default()
        },
    };
    apply_env_overrides(&mut cfg);
    cfg
}

/// Environment overrides for the settings operators set most often.
fn apply_env_overrides(cfg: &mut DroverConfig) {
    if let Ok(dir) = std::env::var("DROVER_DATA_DIR") {
        cfg.data_dir = Some(PathBuf::from(dir));
    }
    if let Ok(port) = std::env::var("DROVER_PORT")
        && let Ok(port) = port.parse()
    {
        cfg.master.port = port;
    }
    if let Ok(port) = std::env::var("DROVER_SLAVE_PORT")
        && let Ok(port) = port.parse()
    {
        cfg.slave.port = port;
    }
    if let Ok(url) = std::env::var("DROVER_MASTER_URL") {
        cfg.slave.master_url = url;
    }
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    let global = dirs_next::config_dir()?.join("drover").join(CONFIG_FILENAME);
    if global.exists() {
        return Some(global);
    }
    None
}

/// Resolve the durable-state directory for this process.
pub fn data_dir(cfg: &DroverConfig) -> PathBuf {
    if let Some(ref dir) = cfg.data_dir {
        return dir.clone();
    }
    dirs_next::data_dir()
        .map(|d| d.join("drover"))
        .unwrap_or_else(|| PathBuf::from("drover-data"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn explicit_data_dir_wins() {
        let cfg = DroverConfig {
            data_dir: Some(PathBuf::from("/var/lib/drover")),
            ..Default::default()
        };
        assert_eq!(data_dir(&cfg), PathBuf::from("/var/lib/drover"));
    }

    #[test]
    fn load_config_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drover.toml");
        std::fs::write(&path, "[slave]\nport = 7700\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.slave.port, 7700);
    }
}
