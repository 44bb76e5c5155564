//! # KBOB Cache CLI (`kbob`)
//!
//! ## Usage
//!
//! ```bash
//! kbob --config ./config/kbob.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbob serve` | Start the HTTP API with scheduled ingestion |
//! | `kbob sync` | Run one ingestion and print the outcome |
//! | `kbob sync --dry-run` | Fetch and normalize only; show rejected rows |
//! | `kbob check-link <url>` | Check a URL the way `/api/kbob/test-link` does |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use kbob_cache::{config, server, sync};

#[derive(Parser)]
#[command(
    name = "kbob",
    about = "KBOB cache: an in-memory, periodically refreshed cache of the KBOB material LCA dataset",
    version
)]
struct Cli {
    #[arg(long, global = true, default_value = "./config/kbob.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and refresh on the configured interval.
    Serve,

    /// Run one ingestion now.
    Sync {
        /// Fetch and normalize without publishing or persisting.
        #[arg(long)]
        dry_run: bool,
    },

    /// Report whether a URL is reachable.
    CheckLink { url: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Sync { dry_run } => {
            sync::run_sync(&cfg, dry_run).await?;
        }
        Commands::CheckLink { url } => {
            if !sync::run_check_link(&cfg, &url).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
