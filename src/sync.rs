//! One-shot ingestion from the command line (`kbob sync`).

use anyhow::{bail, Result};
use std::sync::Arc;

use kbob_core::snapshot::SnapshotStore;
use kbob_core::source::SourceFetcher;

use crate::config::Config;
use crate::fetcher::HttpFetcher;
use crate::ingest::{IngestionCoordinator, IngestionSettings};
use crate::links::LinkValidator;

/// Rejected rows printed by `--dry-run`.
const DRY_RUN_REJECTED_SHOWN: usize = 25;

pub async fn run_sync(config: &Config, dry_run: bool) -> Result<()> {
    let fetcher: Arc<dyn SourceFetcher> = Arc::new(HttpFetcher::new(&config.source)?);
    let coordinator = IngestionCoordinator::new(
        fetcher,
        config.source.normalizer()?,
        Arc::new(SnapshotStore::new()),
        IngestionSettings::from_config(config),
    );

    if dry_run {
        let normalized = coordinator.preview().await?;
        println!("Dry run against {}", config.source.dataset_url);
        println!("  accepted: {}", normalized.accepted.len());
        println!("  rejected: {}", normalized.rejected.len());
        for (reason, count) in normalized.rejected_by_reason() {
            println!("    {:<14} {}", reason, count);
        }
        for r in normalized.rejected.iter().take(DRY_RUN_REJECTED_SHOWN) {
            let field = r.field.map(|f| f.key()).unwrap_or("-");
            println!("  row {:>5}  {:<14} {}", r.row.position, r.reason.code(), field);
        }
        if normalized.rejected.len() > DRY_RUN_REJECTED_SHOWN {
            println!(
                "  ... {} more",
                normalized.rejected.len() - DRY_RUN_REJECTED_SHOWN
            );
        }
        return Ok(());
    }

    let outcome = coordinator.run_ingestion().await?;
    if let Some(failure) = &outcome.failure {
        bail!("ingestion failed ({}): {}", failure.kind, failure.message);
    }

    println!(
        "Published {} materials ({} rejected) in {} ms",
        outcome.record_count,
        outcome.rejected_count,
        (outcome.finished_at - outcome.started_at).num_milliseconds()
    );
    for (reason, count) in &outcome.rejected_by_reason {
        println!("  {:<14} {}", reason, count);
    }
    match &config.ingestion.persist_path {
        Some(path) => println!("Snapshot written to {}", path.display()),
        None => println!("No persist_path configured; snapshot not saved."),
    }
    Ok(())
}

/// Prints the verdict and returns whether `url` is reachable.
pub async fn run_check_link(config: &Config, url: &str) -> Result<bool> {
    let fetcher: Arc<dyn SourceFetcher> = Arc::new(HttpFetcher::new(&config.source)?);
    let validator = LinkValidator::new(fetcher, config.source.link_timeout());
    let reachable = validator.test_link(url).await?;
    println!(
        "{} {}",
        url,
        if reachable { "reachable" } else { "unreachable" }
    );
    Ok(reachable)
}
