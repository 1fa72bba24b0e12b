use anyhow::Context;
use retasc_core::io::atomic_write;
use retasc_core::schema::{config_schema, rules_schema};
use std::path::Path;

use crate::output::{print_json, print_yaml};

pub fn run(output: Option<&Path>, json: bool, config: bool) -> anyhow::Result<()> {
    let schema = if config {
        config_schema()
    } else {
        rules_schema()
    };

    let Some(path) = output else {
        return if json {
            print_json(&schema)
        } else {
            print_yaml(&schema)
        };
    };

    let text = if json {
        serde_json::to_string_pretty(&schema)? + "\n"
    } else {
        serde_yaml::to_string(&schema)?
    };
    atomic_write(path, text.as_bytes())
        .with_context(|| format!("failed to write schema to {}", path.display()))?;
    Ok(())
}
