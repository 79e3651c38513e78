//! DocVault maintenance binary.
//!
//! Runs the out-of-band checks against a store on disk and prints the result
//! as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Report drift for every owner
//! docvault-admin --config docvault.json scan
//!
//! # Delete orphans and dangling references
//! docvault-admin repair --grace-secs 600
//!
//! # Remove partial uploads older than the configured TTL
//! docvault-admin sweep
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use docvault_core::logging::init_tracing;
use docvault_core::{DocVaultConfig, DocumentLifecycle, OwnerId};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "docvault-admin", version, about = "DocVault store maintenance")]
struct Cli {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(long, short, global = true, env = "DOCVAULT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare blobs on disk with the catalog
    Scan {
        /// Only scan this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Delete orphan blobs, drop dangling references and stale records
    Repair {
        /// Records younger than this are left alone
        #[arg(long, default_value_t = 600)]
        grace_secs: u64,
    },
    /// Remove leftovers of interrupted uploads
    Sweep {
        /// Defaults to `partial_upload_ttl_secs` from the configuration
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Bytes and files stored for one owner
    Usage {
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing("docvault_core=info");

    let config = match &cli.config {
        Some(path) => DocVaultConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => DocVaultConfig::default(),
    };

    let lifecycle = DocumentLifecycle::open(&config).context("opening document store")?;
    let reconciler = lifecycle.reconciler();

    match cli.command {
        Command::Scan { owner: Some(owner) } => {
            let owner = OwnerId::parse(&owner)?;
            print_json(&reconciler.scan_owner(&owner).await?)
        }
        Command::Scan { owner: None } => print_json(&reconciler.scan_all().await?),
        Command::Repair { grace_secs } => {
            print_json(&reconciler.repair(Duration::from_secs(grace_secs)).await?)
        }
        Command::Sweep { ttl_secs } => {
            let ttl = ttl_secs.unwrap_or(config.partial_upload_ttl_secs);
            print_json(&reconciler.sweep_partials(Duration::from_secs(ttl)).await?)
        }
        Command::Usage { owner } => {
            let owner = OwnerId::parse(&owner)?;
            print_json(&lifecycle.accountant().snapshot(&owner).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
