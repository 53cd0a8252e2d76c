//! audit-chat - send pending audit prompts to one model
//!
//! Selects up to `--n-max` prompts of an experiment that have no outcome yet
//! for the chosen model, dispatches them under the model's rate budgets and
//! records one outcome row per prompt.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use audit_core::{resolve_model, short_names};
use audit_runtime::{
    create_adapter, Dispatcher, PromptSource, RateBudgets, RuntimeConfig, SqliteStore,
};

/// Dispatch interview-audit prompts to an LLM and record the responses
#[derive(Parser, Debug)]
#[command(name = "audit-chat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level or filter directive (e.g. "debug", "audit_runtime=trace")
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Log file, appended to; "-" logs to stderr
    #[arg(long = "log-file", default_value = "chat.log")]
    log_file: String,

    /// Maximum number of prompts to dispatch
    #[arg(long = "n-max", default_value_t = 100)]
    n_max: usize,

    /// YAML runtime configuration
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// SQLite database, overriding the configured path
    #[arg(long = "database")]
    database: Option<PathBuf>,

    /// List known model short names and exit
    #[arg(long = "list-models")]
    list_models: bool,

    /// Model short name
    #[arg(required_unless_present = "list_models")]
    model: Option<String>,

    /// Experiment tag of the prompts to send
    #[arg(required_unless_present = "list_models")]
    experiment: Option<String>,
}

fn init_logging(level: &str, log_file: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid log level '{}'", level))?;

    if log_file == "-" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("Failed to open log file {}", log_file))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

fn print_available_models() {
    eprintln!("Available models:");
    for name in short_names() {
        eprintln!("  {}", name);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_models {
        for name in short_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let (Some(model_name), Some(experiment)) = (cli.model.as_deref(), cli.experiment.as_deref())
    else {
        anyhow::bail!("MODEL and EXPERIMENT are required");
    };

    let model = match resolve_model(model_name) {
        Ok(model) => model,
        Err(_) => {
            eprintln!("Unknown model: {}", model_name);
            print_available_models();
            std::process::exit(1);
        }
    };

    init_logging(&cli.log_level, &cli.log_file)?;

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(database) = cli.database {
        config.database = database;
    }

    info!(
        model = %model.short_name,
        identifier = %model.identifier,
        experiment,
        n_max = cli.n_max,
        "Starting audit run"
    );

    let store = Arc::new(
        SqliteStore::open(&config.database)
            .with_context(|| format!("Failed to open database {}", config.database.display()))?,
    );
    let prompts = store
        .pending_prompts(experiment, &model.identifier, cli.n_max)
        .await
        .context("Failed to select pending prompts")?;

    if prompts.is_empty() {
        info!("No pending prompts");
        println!("No pending prompts for {} in experiment '{}'", model.short_name, experiment);
        return Ok(());
    }

    let budgets = Arc::new(RateBudgets::from_catalog(config.max_connections));
    let adapter = create_adapter(&model, &config)
        .await
        .with_context(|| format!("Failed to configure provider for {}", model.short_name))?;

    let dispatcher = Dispatcher::builder()
        .model(model.clone())
        .adapter(adapter)
        .budgets(budgets.clone())
        .sink(store)
        .retry_policy(config.retry.clone())
        .build()?;

    let report = dispatcher.dispatch(prompts).await;

    if let Some(usage) = budgets.usage(&model.identifier) {
        info!(
            requests = usage.requests,
            tokens = usage.tokens,
            "Rate budget consumed"
        );
    }

    if report.unrecorded > 0 {
        warn!(unrecorded = report.unrecorded, "Some outcomes were not recorded; rerun to retry them");
    }
    println!(
        "{}: {} prompts, {} succeeded, {} failed, {} unrecorded",
        model.short_name, report.total, report.succeeded, report.failed, report.unrecorded
    );

    Ok(())
}
