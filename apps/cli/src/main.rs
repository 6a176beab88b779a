mod error;
mod output;
mod settings;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use checkup::plugins::HickoryQuerier;
use checkup::{CheckDescriptor, CheckRunner, PluginConfig, PluginRegistry, RunSummary, builtin_registry};
use clap::{Parser, Subcommand};
use logger::{LevelFilter, LogFormat};
use tracing::{debug, info};

use crate::error::AppError;
use crate::settings::EngineSettings;

#[derive(Debug, Parser)]
#[command(name = "checkup", version, about = "Run network health checks")]
struct Cli {
    /// Settings file (defaults to $XDG_CONFIG_HOME/checkup/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overriding the settings file
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered plugins and their configuration keys
    Plugins {
        #[arg(long)]
        json: bool,
    },

    /// Run a single check
    Check {
        /// Plugin name, e.g. website_status
        plugin: String,

        /// Plugin configuration as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        #[arg(long)]
        json: bool,

        /// Include raw data in the output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run every check of a JSON descriptor file
    Batch {
        file: PathBuf,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        max_workers: Option<usize>,

        /// Deadline per batch, in seconds
        #[arg(long)]
        timeout: Option<f64>,

        #[arg(long)]
        json: bool,
    },

    /// Inspect the engine settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Load (creating if missing) and print the settings
    Show {
        /// Settings file to show instead of the global one
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, AppError> {
    let cli = Cli::parse();

    let settings_path = match &cli.command {
        Command::Config { action: ConfigAction::Show { path: Some(path) } } => Some(path.clone()),
        _ => cli.config.clone(),
    };
    let (settings, settings_path) = EngineSettings::load(settings_path)?;

    let level = match cli.log_level {
        Some(level) => level,
        None => settings
            .logging
            .level
            .parse::<LevelFilter>()
            .map_err(|e| AppError::InvalidLogSetting(format!("level '{}': {e}", settings.logging.level)))?,
    };
    let format = settings
        .logging
        .format
        .as_deref()
        .map(str::parse::<LogFormat>)
        .transpose()
        .map_err(AppError::InvalidLogSetting)?;
    logger::init_with(level, format);
    debug!(path = %settings_path.display(), "Loaded settings");

    let registry = builtin_registry(Arc::new(HickoryQuerier::new(settings.dns.max_in_flight_queries)))?;

    match cli.command {
        Command::Plugins { json } => list_plugins(&registry, json),
        Command::Check { plugin, params, json, verbose } => run_one(&registry, &plugin, &params, json, verbose).await,
        Command::Batch { file, batch_size, max_workers, timeout, json } => {
            let runner = CheckRunner::new(Arc::new(registry)).with_default_workers(settings.runner.max_workers);
            let batch_size = batch_size.unwrap_or(settings.runner.batch_size);
            let timeout = timeout.or(settings.runner.timeout_secs);
            run_batch(&runner, &file, batch_size, max_workers, timeout, json).await
        }
        Command::Config { action: ConfigAction::Show { .. } } => {
            println!("Settings file: {}", settings_path.display());
            print!("{settings}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn list_plugins(registry: &PluginRegistry, json: bool) -> Result<ExitCode, AppError> {
    let plugins = registry.describe_all();
    if json {
        println!("{}", serde_json::to_string_pretty(&plugins)?);
    } else {
        print!("{}", output::render_plugins(&plugins));
    }
    Ok(ExitCode::SUCCESS)
}

fn parse_params(params: &str) -> Result<PluginConfig, AppError> {
    let value: serde_json::Value =
        serde_json::from_str(params).map_err(|e| AppError::InvalidParams(e.to_string()))?;
    PluginConfig::from_value(value).ok_or_else(|| AppError::InvalidParams("expected a JSON object".into()))
}

async fn run_one(
    registry: &PluginRegistry,
    plugin: &str,
    params: &str,
    json: bool,
    verbose: bool,
) -> Result<ExitCode, AppError> {
    let config = parse_params(params)?;
    let result = checkup::run_check(registry, plugin, config).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result.to_value())?);
    } else {
        println!("{}", checkup::format::format_result(&result, verbose));
    }
    Ok(output::exit_code(result.status()))
}

fn read_descriptors(path: &Path) -> Result<Vec<CheckDescriptor>, AppError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::BatchFile { path: path.to_path_buf(), reason: e.to_string() })?;
    serde_json::from_str(&raw).map_err(|e| AppError::BatchFile { path: path.to_path_buf(), reason: e.to_string() })
}

async fn run_batch(
    runner: &CheckRunner,
    file: &Path,
    batch_size: usize,
    max_workers: Option<usize>,
    timeout: Option<f64>,
    json: bool,
) -> Result<ExitCode, AppError> {
    let descriptors = read_descriptors(file)?;
    let timeout = match timeout {
        Some(secs) => Some(
            Duration::try_from_secs_f64(secs)
                .map_err(|e| AppError::InvalidParams(format!("timeout {secs}: {e}")))?,
        ),
        None => None,
    };
    info!(file = %file.display(), checks = descriptors.len(), "Running batch file");

    let outcomes = runner.run_check_batch(descriptors, batch_size, max_workers, timeout).await;
    let summary = RunSummary::from_outcomes(&outcomes);

    if json {
        let report = serde_json::json!({ "results": outcomes, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for outcome in &outcomes {
            println!("{}", output::render_outcome(outcome));
        }
        println!("{}", output::render_summary(&summary));
    }
    Ok(output::exit_code(summary.worst()))
}
