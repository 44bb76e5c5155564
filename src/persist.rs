//! Optional on-disk copy of the published snapshot.
//!
//! The file is plain JSON (`{ ingestedAt, fingerprint, materials }`) and is
//! replaced atomically: written to a sibling temp file, then renamed over
//! the target.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use kbob_core::models::Material;
use kbob_core::snapshot::Snapshot;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSnapshot {
    ingested_at: DateTime<Utc>,
    fingerprint: String,
    materials: Vec<Material>,
}

/// Write `snapshot` to `path`. Cold-start snapshots (no timestamp) are skipped.
pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let Some(ingested_at) = snapshot.ingested_at() else {
        return Ok(());
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let doc = PersistedSnapshot {
        ingested_at,
        fingerprint: snapshot.fingerprint().to_string(),
        materials: snapshot.materials().to_vec(),
    };
    let json = serde_json::to_vec(&doc).context("Failed to serialize snapshot")?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

/// Read a snapshot written by [`save_snapshot`]. `Ok(None)` if the file does not exist.
///
/// The stored fingerprint must match the recomputed one.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let doc: PersistedSnapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse snapshot file {}", path.display()))?;

    let snapshot = Snapshot::new(doc.materials, doc.ingested_at);
    if snapshot.fingerprint() != doc.fingerprint {
        bail!(
            "snapshot file {} is inconsistent: fingerprint mismatch",
            path.display()
        );
    }
    Ok(Some(snapshot))
}
