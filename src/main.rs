// ABOUTME: Entry point for the quizlog binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs operator commands against the store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quizlog_store::{Store, StoreConfig};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "quizlog", version, about = "Inspect and maintain the trivia bot's durable datasets")]
struct Cli {
    /// Data directory (overrides QUIZLOG_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a dataset, or one key of it
    Get {
        dataset: String,
        key: Option<String>,
        /// Print YAML instead of JSON
        #[arg(long)]
        yaml: bool,
    },
    /// Set a key to a JSON value
    Set {
        dataset: String,
        key: String,
        value: String,
    },
    /// Delete a key
    Delete { dataset: String, key: String },
    /// Print the raw log entries of a dataset
    Entries { dataset: String },
    /// Compact a dataset's log into a single checkpoint
    Compact { dataset: String },
    /// List a dataset's log backups, newest first
    Backups { dataset: String },
    /// List datasets present on disk
    Datasets,
    /// Run background compaction over the configured datasets until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quizlog=info,quizlog_store=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = StoreConfig::from_env().context("failed to load configuration")?;
    if let Some(home) = cli.home {
        config.home = home;
    }
    let store = config
        .open_store()
        .with_context(|| format!("failed to open store at {}", config.home.display()))?;

    match cli.command {
        Command::Get { dataset, key, yaml } => {
            let value = match key {
                Some(key) => store
                    .get::<Value>(&dataset, &key)
                    .await?
                    .unwrap_or(Value::Null),
                None => serde_json::to_value(store.state(&dataset).await?)?,
            };
            if yaml {
                print!("{}", serde_yaml::to_string(&value)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
        }

        Command::Set {
            dataset,
            key,
            value,
        } => {
            let value: Value = serde_json::from_str(&value)
                .with_context(|| format!("value for {} is not valid JSON", key))?;
            let entry = store.upsert(&dataset, &key, &value).await?;
            println!("saved {} in {} at {}", key, dataset, entry.timestamp);
        }

        Command::Delete { dataset, key } => {
            let entry = store.delete(&dataset, &key).await?;
            println!("deleted {} from {} at {}", key, dataset, entry.timestamp);
        }

        Command::Entries { dataset } => {
            for entry in store.read_entries(&dataset).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }

        Command::Compact { dataset } => {
            let report = store.force_compact(&dataset).await?;
            println!(
                "compacted {}: {} entries ({} bytes) -> {} keys ({} bytes)",
                report.dataset,
                report.entries_before,
                report.bytes_before,
                report.keys_after,
                report.bytes_after
            );
            if let Some(backup) = report.backup {
                println!("backup: {}", backup.display());
            }
        }

        Command::Backups { dataset } => {
            for backup in store.list_backups(&dataset).await? {
                println!("{}", backup.display());
            }
        }

        Command::Datasets => {
            for dataset in store.list_datasets()? {
                let size = store.log_size(dataset.as_str()).await?;
                println!("{}\t{} bytes", dataset, size);
            }
        }

        Command::Watch => watch(&store, &config).await?,
    }

    Ok(())
}

async fn watch(store: &Store, config: &StoreConfig) -> Result<()> {
    let names: Vec<&str> = config.datasets.iter().map(|d| d.as_str()).collect();
    store
        .start_background_compaction(&names, config.compact_interval, config.compact_threshold_bytes)
        .await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutting down");

    store.stop_background_compaction().await;
    Ok(())
}
