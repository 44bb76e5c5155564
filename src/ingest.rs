//! Ingestion Coordinator: fetch → normalize → publish, one run at a time.
//!
//! # Run lifecycle
//!
//! ```text
//! Idle → Fetching → Normalizing → Publishing → Idle      (success)
//! Idle → Fetching | Normalizing → Failed → Idle          (failure)
//! ```
//!
//! A failed run never touches the published snapshot, so readers keep the
//! last good data. A run that accepts zero records counts as failed.
//!
//! # Overlap
//!
//! Runs are serialized by an async mutex owned by the coordinator. With
//! [`OverlapPolicy::Reject`] a second caller gets
//! [`IngestionError::InProgress`] immediately; with [`OverlapPolicy::Wait`]
//! it waits and receives the outcome of the run that finished meanwhile
//! instead of fetching again.

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use kbob_core::normalize::{Normalized, Normalizer, RejectReason};
use kbob_core::snapshot::{Snapshot, SnapshotStore};
use kbob_core::source::{SourceError, SourceFetcher};

use crate::config::{Config, OverlapPolicy};
use crate::persist;

/// Upper bound on rejected rows echoed back in an outcome.
const REJECTED_SAMPLE_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestionState {
    Idle,
    Fetching,
    Normalizing,
    Publishing,
    Failed,
}

/// Returned instead of an outcome when the run could not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestionError {
    #[error("an ingestion run is already in progress")]
    InProgress,
}

impl IngestionError {
    pub fn code(&self) -> &'static str {
        match self {
            IngestionError::InProgress => "IngestionInProgress",
        }
    }
}

/// Why a run that did start ended without publishing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestionFailure {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("no valid records after normalization ({rejected} rows rejected)")]
    EmptyResult { rejected: usize },
}

impl IngestionFailure {
    pub fn code(&self) -> &'static str {
        match self {
            IngestionFailure::Source(e) => e.code(),
            IngestionFailure::EmptyResult { .. } => "EmptyIngestionResult",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureInfo {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedSample {
    pub position: usize,
    pub reason: RejectReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Record of one completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionOutcome {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    /// Version of the snapshot this run published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_version: Option<u64>,
    pub record_count: usize,
    pub rejected_count: usize,
    pub rejected_by_reason: BTreeMap<String, usize>,
    pub rejected_sample: Vec<RejectedSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub overlap: OverlapPolicy,
    pub fetch_timeout: Duration,
    pub persist_path: Option<PathBuf>,
}

impl IngestionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            overlap: config.ingestion.overlap,
            fetch_timeout: config.source.timeout(),
            persist_path: config.ingestion.persist_path.clone(),
        }
    }
}

pub struct IngestionCoordinator {
    fetcher: Arc<dyn SourceFetcher>,
    normalizer: Normalizer,
    store: Arc<SnapshotStore>,
    settings: IngestionSettings,
    run_lock: tokio::sync::Mutex<()>,
    state: Mutex<IngestionState>,
    last_outcome: Mutex<Option<IngestionOutcome>>,
    completed_runs: AtomicU64,
}

/// Puts the coordinator back to `Idle` however a run ends, including
/// when its future is dropped mid-fetch.
struct ResetToIdle<'a>(&'a Mutex<IngestionState>);

impl Drop for ResetToIdle<'_> {
    fn drop(&mut self) {
        *self.0.lock() = IngestionState::Idle;
    }
}

impl IngestionCoordinator {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        normalizer: Normalizer,
        store: Arc<SnapshotStore>,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            fetcher,
            normalizer,
            store,
            settings,
            run_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(IngestionState::Idle),
            last_outcome: Mutex::new(None),
            completed_runs: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn state(&self) -> IngestionState {
        *self.state.lock()
    }

    pub fn last_outcome(&self) -> Option<IngestionOutcome> {
        self.last_outcome.lock().clone()
    }

    /// Runs that reached an outcome since start-up.
    pub fn completed_runs(&self) -> u64 {
        self.completed_runs.load(Ordering::SeqCst)
    }

    /// Publish the persisted snapshot, if persistence is configured and a
    /// file exists. Returns the number of restored records.
    pub fn restore_persisted(&self) -> anyhow::Result<Option<usize>> {
        let Some(path) = self.settings.persist_path.as_deref() else {
            return Ok(None);
        };
        let Some(snapshot) = persist::load_snapshot(path)
            .with_context(|| format!("Failed to restore snapshot from {}", path.display()))?
        else {
            return Ok(None);
        };
        let published = self.store.publish(snapshot);
        tracing::info!(
            path = %path.display(),
            records = published.len(),
            ingested_at = ?published.ingested_at(),
            "restored persisted snapshot"
        );
        Ok(Some(published.len()))
    }

    /// Execute one ingestion run, honouring the overlap policy.
    pub async fn run_ingestion(&self) -> Result<IngestionOutcome, IngestionError> {
        let observed = self.completed_runs.load(Ordering::SeqCst);

        let _guard = match self.settings.overlap {
            OverlapPolicy::Reject => self
                .run_lock
                .try_lock()
                .map_err(|_| IngestionError::InProgress)?,
            OverlapPolicy::Wait => {
                let guard = self.run_lock.lock().await;
                if self.completed_runs.load(Ordering::SeqCst) != observed {
                    if let Some(outcome) = self.last_outcome() {
                        tracing::debug!("joined the outcome of an overlapping run");
                        return Ok(outcome);
                    }
                }
                guard
            }
        };

        let outcome = self.execute().await;
        *self.last_outcome.lock() = Some(outcome.clone());
        self.completed_runs.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    /// Fetch and normalize without publishing.
    pub async fn preview(&self) -> Result<Normalized, SourceError> {
        let dataset = self.fetch().await?;
        Ok(self.normalizer.normalize(&dataset.rows))
    }

    async fn fetch(&self) -> Result<kbob_core::source::RawDataset, SourceError> {
        let timeout = self.settings.fetch_timeout;
        match tokio::time::timeout(timeout, self.fetcher.fetch_raw_dataset()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                secs: timeout.as_secs(),
            }),
        }
    }

    fn set_state(&self, state: IngestionState) {
        *self.state.lock() = state;
    }

    async fn execute(&self) -> IngestionOutcome {
        let started_at = Utc::now();
        let _reset = ResetToIdle(&self.state);

        self.set_state(IngestionState::Fetching);
        let dataset = match self.fetch().await {
            Ok(dataset) => dataset,
            Err(e) => return self.failed(started_at, e.into(), None),
        };
        tracing::info!(origin = %dataset.origin, rows = dataset.rows.len(), "dataset fetched");

        self.set_state(IngestionState::Normalizing);
        let normalized = self.normalizer.normalize(&dataset.rows);
        if normalized.accepted.is_empty() {
            let failure = IngestionFailure::EmptyResult {
                rejected: normalized.rejected.len(),
            };
            return self.failed(started_at, failure, Some(&normalized));
        }

        self.set_state(IngestionState::Publishing);
        let summary = RejectionSummary::of(&normalized);
        let snapshot = Snapshot::new(normalized.accepted, Utc::now());
        let published = self.store.publish(snapshot);

        tracing::info!(
            version = published.version(),
            records = published.len(),
            rejected = summary.count,
            fingerprint = %published.fingerprint(),
            "ingestion published"
        );

        if let Some(path) = self.settings.persist_path.clone() {
            let snap = published.clone();
            let result =
                tokio::task::spawn_blocking(move || persist::save_snapshot(&path, &snap)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %format!("{:#}", e), "snapshot not persisted"),
                Err(e) => tracing::warn!(error = %e, "snapshot persistence task failed"),
            }
        }

        IngestionOutcome {
            started_at,
            finished_at: Utc::now(),
            success: true,
            snapshot_version: Some(published.version()),
            record_count: published.len(),
            rejected_count: summary.count,
            rejected_by_reason: summary.by_reason,
            rejected_sample: summary.sample,
            failure: None,
        }
    }

    fn failed(
        &self,
        started_at: DateTime<Utc>,
        failure: IngestionFailure,
        normalized: Option<&Normalized>,
    ) -> IngestionOutcome {
        self.set_state(IngestionState::Failed);
        tracing::warn!(
            kind = failure.code(),
            error = %failure,
            "ingestion failed; previous snapshot kept"
        );

        let summary = normalized.map(RejectionSummary::of).unwrap_or_default();
        IngestionOutcome {
            started_at,
            finished_at: Utc::now(),
            success: false,
            snapshot_version: None,
            record_count: 0,
            rejected_count: summary.count,
            rejected_by_reason: summary.by_reason,
            rejected_sample: summary.sample,
            failure: Some(FailureInfo {
                kind: failure.code().to_string(),
                message: failure.to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct RejectionSummary {
    count: usize,
    by_reason: BTreeMap<String, usize>,
    sample: Vec<RejectedSample>,
}

impl RejectionSummary {
    fn of(normalized: &Normalized) -> Self {
        Self {
            count: normalized.rejected.len(),
            by_reason: normalized.rejected_by_reason(),
            sample: normalized
                .rejected
                .iter()
                .take(REJECTED_SAMPLE_LIMIT)
                .map(|r| RejectedSample {
                    position: r.row.position,
                    reason: r.reason,
                    field: r.field.map(|f| f.key().to_string()),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kbob_core::models::{RawRow, RawValue};
    use kbob_core::source::{LinkError, RawDataset};

    struct FixedFetcher(Vec<RawRow>);

    #[async_trait]
    impl SourceFetcher for FixedFetcher {
        async fn fetch_raw_dataset(&self) -> Result<RawDataset, SourceError> {
            Ok(RawDataset {
                origin: "memory".to_string(),
                rows: self.0.clone(),
            })
        }

        async fn fetch_link(&self, _url: &str) -> Result<bool, LinkError> {
            Ok(true)
        }
    }

    fn bad_row(position: usize) -> RawRow {
        RawRow::new(position).with("group", RawValue::Text("Beton".into()))
    }

    fn coordinator(rows: Vec<RawRow>) -> IngestionCoordinator {
        IngestionCoordinator::new(
            Arc::new(FixedFetcher(rows)),
            Normalizer::new(),
            Arc::new(SnapshotStore::new()),
            IngestionSettings {
                overlap: OverlapPolicy::Reject,
                fetch_timeout: Duration::from_secs(5),
                persist_path: None,
            },
        )
    }

    #[tokio::test]
    async fn rejected_sample_is_bounded() {
        let coord = coordinator((0..50).map(bad_row).collect());
        let outcome = coord.run_ingestion().await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.rejected_count, 50);
        assert_eq!(outcome.rejected_sample.len(), REJECTED_SAMPLE_LIMIT);
        assert_eq!(outcome.rejected_by_reason.get("MissingUUID"), Some(&50));
        assert_eq!(outcome.failure.unwrap().kind, "EmptyIngestionResult");
        assert_eq!(coord.state(), IngestionState::Idle);
        assert_eq!(coord.completed_runs(), 1);
    }

    #[test]
    fn outcome_serializes_camel_case() {
        let outcome = IngestionOutcome {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            success: false,
            snapshot_version: None,
            record_count: 0,
            rejected_count: 1,
            rejected_by_reason: BTreeMap::from([("DuplicateUUID".to_string(), 1)]),
            rejected_sample: vec![RejectedSample {
                position: 3,
                reason: RejectReason::DuplicateUuid,
                field: None,
            }],
            failure: Some(FailureInfo {
                kind: "SourceTimeout".to_string(),
                message: "source timed out after 60s".to_string(),
            }),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["rejectedCount"], 1);
        assert_eq!(json["rejectedSample"][0]["reason"], "DuplicateUUID");
        assert_eq!(json["failure"]["kind"], "SourceTimeout");
        assert!(json.get("snapshotVersion").is_none());
    }
}
