//! # Silo Admin CLI
//!
//! Administrative entrypoint for a Silo deployment: schema migration,
//! full flush, cascade cleanup and backend health checks.

use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use silo_bin::initialization;
use silo_config::{load_or_default, validation};
use silo_observe::{init_logging, LogConfig, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "silo")]
#[command(about = "Silo record storage and permission engine", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "silo.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the backend schemas (tables, indices). Idempotent.
    Migrate,
    /// Remove every record, tombstone and permission entry.
    Flush {
        /// Skip the interactive confirmation.
        #[arg(long)]
        yes: bool,
    },
    /// Tombstone an object, cascade to its descendants, drop the
    /// affected ACLs and purge the resulting tombstones.
    Cleanup {
        /// Object URI, e.g. /buckets/blog/collections/articles
        object_uri: String,
    },
    /// Probe both backends and report their health.
    Heartbeat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_or_default(&args.config);
    if let Err(e) = validation::validate(&config) {
        eprintln!("Configuration validation error: {e}");
        std::process::exit(1);
    }

    init_logging(LogConfig {
        format: LogFormat::from_str(&config.observability.log_format)?,
        filter: Some(config.observability.log_level.clone()),
        ..LogConfig::default()
    })?;

    match args.command {
        Command::Migrate => {
            let engine = initialization::build_engine(&config).await?;
            engine.store().initialize_schema().await?;
            engine.permissions().initialize_schema().await?;
            tracing::info!("schemas initialized");
        }
        Command::Flush { yes } => {
            if !yes {
                eprintln!("Refusing to flush without --yes; this removes ALL data.");
                std::process::exit(1);
            }
            let engine = initialization::build_engine(&config).await?;
            engine.store().flush().await?;
            engine.permissions().flush().await?;
            tracing::info!("all records and permissions flushed");
        }
        Command::Cleanup { object_uri } => {
            let engine = initialization::build_engine(&config).await?;
            let tombstone = engine.delete_object(&object_uri).await?;
            let purged = engine
                .store()
                .purge_tombstones("record", &object_uri, None)
                .await?;
            tracing::info!(
                object = %object_uri,
                version = %tombstone.last_modified().unwrap_or_default(),
                purged_tombstones = purged,
                "cleanup complete"
            );
        }
        Command::Heartbeat => {
            let engine = initialization::build_engine(&config).await?;
            let storage_ok = silo_store::heartbeat(engine.store()).await;
            let permission_ok = silo_permission::heartbeat(engine.permissions()).await;
            println!("storage: {}", if storage_ok { "ok" } else { "unhealthy" });
            println!(
                "permission: {}",
                if permission_ok { "ok" } else { "unhealthy" }
            );
            if !(storage_ok && permission_ok) {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
