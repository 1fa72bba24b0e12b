use anyhow::Context;
use retasc_core::io::atomic_write;
use retasc_core::run::{run as run_rules, RunOptions};
use std::path::{Path, PathBuf};
use tracing::info;

use super::load_config;

pub fn run(
    config_path: Option<&Path>,
    rule_paths: Vec<PathBuf>,
    report_path: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let options = RunOptions {
        rule_paths,
        dry_run,
    };
    let report = run_rules(config, &options).context("failed to evaluate rules")?;

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        atomic_write(path, json.as_bytes())
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    let errors = report.errors();
    if !errors.is_empty() {
        for error in errors {
            eprintln!("{error}");
        }
        anyhow::bail!("{} error(s) found while evaluating rules", errors.len());
    }
    Ok(())
}
