//! `scanvault` maintenance binary.
//!
//! Reads `scanvault.toml` (or the path given with `--config`) layered with
//! `SCANVAULT_*` environment variables, opens the store, runs one command
//! and closes the store again.

mod settings;

use std::path::PathBuf;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use scanvault_core::store::RecordStore;
use scanvault_store_sqlite::SqliteStore;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::{CliConfig, expand_tilde};

#[derive(Parser)]
#[command(author, version, about = "scanvault record store maintenance")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "scanvault.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Print record counts, estimated size and age range.
  Stats,
  /// Delete records older than the retention window.
  Cleanup {
    /// Override the configured retention window.
    #[arg(long)]
    retention_days: Option<u32>,
  },
  /// Check the encryption engine against the store's key.
  SelfTest,
  /// Print the schema version and applied migrations.
  Migrations,
  /// Report how many records are past the retention window.
  Retention,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = CliConfig::load(&cli.config)?;
  let key = cfg.key_source()?;

  let store_path = expand_tilde(&cfg.store_path);
  if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {parent:?}"))?;
  }

  let store = SqliteStore::open(&store_path, cfg.store.clone(), key)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let outcome = run(&store, cli.command).await;
  store.dispose().await.context("failed to close store")?;
  outcome
}

async fn run(store: &SqliteStore, command: Command) -> anyhow::Result<()> {
  match command {
    Command::Stats => print_json(&store.stats().await?)?,

    Command::Cleanup { retention_days } => {
      let days = retention_days.unwrap_or(store.config().retention_days);
      let removed = store.run_cleanup(days).await.context("cleanup failed")?;
      println!("removed {removed} records older than {days} days");
    }

    Command::SelfTest => {
      if !store.self_test()? {
        bail!("encryption self-test failed");
      }
      println!("encryption self-test passed");
    }

    Command::Migrations => {
      println!("schema version {}", store.schema_version().await?);
      for record in store.migration_history().await? {
        let applied = chrono::DateTime::from_timestamp_millis(record.applied_at)
          .map(|t| t.to_rfc3339())
          .unwrap_or_else(|| record.applied_at.to_string());
        println!("{:>4}  {applied}  {}", record.version, record.description);
      }
    }

    Command::Retention => {
      let status = store.retention_status().await?;
      print_json(&status)?;
      if !status.is_compliant() {
        tracing::warn!(
          expired = status.expired_records,
          "records past retention; run `scanvault cleanup`"
        );
      }
    }
  }
  Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
