pub mod run;
pub mod schema;
pub mod validate;

use anyhow::Context;
use retasc_core::config::{Config, CONFIG_ENV};
use std::path::Path;

/// Loads the configuration and logs its warnings.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = path.with_context(|| {
        format!("no configuration file given; use --config or set {CONFIG_ENV}")
    })?;
    let config = Config::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    for warning in config.validate() {
        tracing::warn!("{}", warning.message);
    }
    Ok(config)
}
