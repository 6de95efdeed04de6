mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use meno_engine::{
    BackendClient, FileKeyValueStore, KeyValueStore, MutationOutbox, RemoteCollection,
};
use meno_logging::LogDestination;

use crate::commands::{CookbookCmd, GenerateArgs};
use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "meno", version, about = "Recipe generation and offline cookbook")]
struct Cli {
    /// RON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
    /// Keep the cookbook local; never contact the backend for it
    #[arg(long)]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a run of recipes and hydrate it
    Generate(GenerateArgs),
    /// Saved recipes
    Cookbook {
        #[command(subcommand)]
        cmd: CookbookCmd,
    },
    /// Push queued cookbook changes now, ignoring backoff
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let destination = match cli.log_file.clone() {
        Some(path) => LogDestination::Both(path),
        None => LogDestination::Terminal,
    };
    meno_logging::initialize(destination, level);

    let mut config = config::load(&cli.config)?;
    config::apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    match cli.command {
        Commands::Generate(args) => {
            let outbox = open_outbox(&config, cli.offline)?;
            commands::run_generate(&config, &outbox, &args).await
        }
        Commands::Cookbook { cmd } => {
            let outbox = open_outbox(&config, cli.offline)?;
            commands::run_cookbook(&outbox, cmd).await
        }
        Commands::Sync => {
            let outbox = open_outbox(&config, cli.offline)?;
            commands::run_sync(&outbox).await
        }
    }
}

fn open_outbox(config: &AppConfig, offline: bool) -> Result<MutationOutbox> {
    let store: Arc<dyn KeyValueStore> =
        Arc::new(FileKeyValueStore::new(config.engine.data_dir.clone()));
    let remote: Option<Arc<dyn RemoteCollection>> = match &config.engine.backend {
        Some(settings) if !offline => Some(Arc::new(
            BackendClient::new(settings.clone()).context("invalid backend settings")?,
        )),
        _ => None,
    };
    MutationOutbox::open(
        store,
        remote,
        config.engine.outbox.clone(),
        meno_engine::system_clock(),
    )
    .with_context(|| format!("failed to open cookbook in {:?}", config.engine.data_dir))
}
