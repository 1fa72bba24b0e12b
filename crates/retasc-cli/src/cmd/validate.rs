use retasc_core::parse_rules::parse_rules;
use std::path::{Path, PathBuf};

use super::load_config;

pub fn run(config_path: Option<&Path>, rule_paths: &[PathBuf]) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    match parse_rules(rule_paths, &config) {
        Ok(_) => {
            println!("Validation succeeded: The rule files are valid");
            Ok(())
        }
        Err(e) => anyhow::bail!("Validation failed: {e}"),
    }
}
