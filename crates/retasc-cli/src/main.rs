mod cmd;
mod output;

use clap::{Parser, Subcommand};
use retasc_core::config::CONFIG_ENV;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "retasc",
    about = "Release Task Scheduler: evaluate release rules and manage Jira issues",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Log progress at info level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate rules and apply changes
    Run {
        /// Write the JSON report to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// Rule files or directories (default: rules_path from the config)
        #[arg(value_name = "RULE_FILE")]
        rule_files: Vec<PathBuf>,
    },

    /// Evaluate rules without changing Jira issues or PipelineRuns
    DryRun {
        /// Write the JSON report to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// Rule files or directories (default: rules_path from the config)
        #[arg(value_name = "RULE_FILE")]
        rule_files: Vec<PathBuf>,
    },

    /// Validate rule files
    ValidateRules {
        /// Rule files or directories
        #[arg(value_name = "RULE_FILE", required = true)]
        rule_files: Vec<PathBuf>,
    },

    /// Print or write the JSON Schema of rule files
    GenerateSchema {
        /// Output file (default: stdout)
        #[arg(value_name = "SCHEMA_FILE")]
        schema_file: Option<PathBuf>,

        /// Output JSON instead of YAML
        #[arg(long, short = 'j')]
        json: bool,

        /// Schema of the configuration file instead of rule files
        #[arg(long = "config", short = 'c')]
        config_schema: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run { report, rule_files } => {
            cmd::run::run(config, rule_files, report.as_deref(), false)
        }
        Commands::DryRun { report, rule_files } => {
            cmd::run::run(config, rule_files, report.as_deref(), true)
        }
        Commands::ValidateRules { rule_files } => cmd::validate::run(config, &rule_files),
        Commands::GenerateSchema {
            schema_file,
            json,
            config_schema,
        } => cmd::schema::run(schema_file.as_deref(), json, config_schema),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
