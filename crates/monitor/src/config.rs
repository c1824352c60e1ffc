//! Monitor configuration loading
//!
//! An optional file named by `MONITOR_CONFIG` is layered under environment
//! variables prefixed with `MONITOR_` (e.g. `MONITOR_FLAP_THRESHOLD=5`).

use anyhow::{Context, Result};
use monitor_lib::MonitorSettings;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "MONITOR_CONFIG";

pub fn load() -> Result<MonitorSettings> {
    let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    load_from(path.as_deref())
}

pub fn load_from(path: Option<&Path>) -> Result<MonitorSettings> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(config::Environment::with_prefix("MONITOR").try_parsing(true))
        .build()
        .context("Failed to read monitor configuration")?;

    settings
        .try_deserialize()
        .context("Invalid monitor configuration")
}
