//! Sentinel daemon entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sentinel::domain::models::ConnectorConfig;
use sentinel::domain::ports::{ConnectorFilter, Store};
use sentinel::infrastructure::config::ConfigLoader;
use sentinel::infrastructure::database::{DatabaseConnection, SqliteStore};
use sentinel::{bootstrap, infrastructure};

#[derive(Parser)]
#[command(name = "sentinel", about = "Security event ingestion core", version)]
struct Cli {
    /// Path to a configuration file (defaults to sentinel.yaml + SENTINEL_* env)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion daemon (default)
    Run,
    /// Validate the service configuration and every stored connector row
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _log_guard = infrastructure::logging::init(&config.logging);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => bootstrap::run(config).await,
        Commands::CheckConfig => check_config(config).await,
    }
}

async fn check_config(config: sentinel::Config) -> Result<()> {
    let database_url = format!("sqlite:{}", config.database.path);
    let db =
        DatabaseConnection::with_max_connections(&database_url, config.database.max_connections)
            .await
            .context("store unreachable")?;
    db.migrate().await.context("store migration failed")?;
    let store = SqliteStore::new(db.pool().clone());

    let records = store
        .list_connectors(ConnectorFilter::default())
        .await
        .context("failed to list connectors")?;

    let mut invalid = 0usize;
    for record in &records {
        match ConnectorConfig::from_record(record) {
            Ok(_) => println!(
                "connector {} ({}, {}) ok",
                record.id, record.name, record.connector_type
            ),
            Err(err) => {
                invalid += 1;
                eprintln!("connector {} ({}) invalid: {err}", record.id, record.name);
            }
        }
    }

    println!("{} connectors checked, {} invalid", records.len(), invalid);
    if invalid > 0 {
        anyhow::bail!("{invalid} connectors failed validation");
    }
    Ok(())
}
