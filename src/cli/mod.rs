//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::config::Config;
use crate::store::SqlInstructionStore;
use crate::sync::SyncEngine;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "oxsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "status", about = "Show instruction store status")]
    Status(StatusArgs),

    #[command(name = "pending", about = "List instruction batches after an id")]
    Pending(PendingArgs),

    #[command(name = "prune", about = "Delete expired instruction batches")]
    Prune(PruneArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    #[arg(short, long, global = true, help = "Path to a TOML config file")]
    pub config: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        help = "Database connection string (overrides the config file)"
    )]
    pub database: Option<String>,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[arg(short, long, help = "Last synced id of a node to evaluate")]
    pub last_id: Option<i64>,
}

#[derive(Parser, Debug)]
pub struct PendingArgs {
    #[arg(short, long, default_value_t = 0, help = "Only list batches after this id")]
    pub after: i64,

    #[arg(short, long, default_value_t = 20, help = "Maximum number of batches")]
    pub limit: u64,

    #[arg(long, help = "Decode and print each instruction")]
    pub decode: bool,
}

#[derive(Parser, Debug)]
pub struct PruneArgs {
    #[arg(long, help = "Days to retain (defaults to the configured value)")]
    pub days: Option<u32>,

    #[arg(long, help = "Ask for confirmation before deleting")]
    pub confirm: bool,
}

mod pending;
mod prune;
mod status;

/// 根据命令行参数加载配置
pub fn load_config(args: &ConnectionArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(database) = &args.database {
        config.database.connection_string = SecretString::new(database.clone().into());
    }

    Ok(config)
}

async fn open_engine(config: &Config) -> Result<SyncEngine> {
    let store = SqlInstructionStore::connect(&config.database)
        .await
        .context("Failed to open instruction store")?;
    Ok(SyncEngine::new(Arc::new(store)).with_fetch_limit(config.messenger.fetch_limit))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing("oxsync", "warn");

    let config = load_config(&cli.connection)?;
    let engine = open_engine(&config).await?;

    match &cli.command {
        Commands::Status(args) => status::execute(&engine, &config, args).await,
        Commands::Pending(args) => pending::execute(&engine, args).await,
        Commands::Prune(args) => prune::execute(&engine, &config, args).await,
    }
}
