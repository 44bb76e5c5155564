//! Immutable material snapshots and the store that publishes them.
//!
//! A [`Snapshot`] is built wholesale (indices and fingerprint included)
//! before it is handed to [`SnapshotStore::publish`]. Publishing swaps an
//! `Arc` in an [`ArcSwap`] slot. Readers load the `Arc` without taking a
//! lock and keep a consistent view for as long as they hold it, even if a
//! newer snapshot is published in the meantime.
//!
//! ```text
//!  build (no lock)          publish (swap)          current()
//! ┌──────────────┐        ┌───────────────┐       ┌──────────────┐
//! │ Vec<Material>│──new──▶│ ArcSwap<_>    │──────▶│ Arc<Snapshot>│
//! │ + indices    │        │ version += 1  │       │ (per call)   │
//! └──────────────┘        └───────────────┘       └──────────────┘
//! ```

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::Material;

/// An immutable, indexed set of materials plus its ingestion timestamp.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: u64,
    ingested_at: Option<DateTime<Utc>>,
    materials: Vec<Material>,
    by_uuid: HashMap<String, usize>,
    by_group: HashMap<String, Vec<usize>>,
    by_id: HashMap<String, Vec<usize>>,
    fingerprint: String,
}

impl Snapshot {
    /// The cold-start snapshot: no records, no timestamp, version 0.
    pub fn empty() -> Self {
        Self::build(Vec::new(), None)
    }

    /// Build an unpublished snapshot. Its version is assigned on publish.
    ///
    /// `materials` are expected to have unique `uuid`s (the normalizer
    /// guarantees it); if not, the index points at the last occurrence.
    pub fn new(materials: Vec<Material>, ingested_at: DateTime<Utc>) -> Self {
        Self::build(materials, Some(ingested_at))
    }

    fn build(materials: Vec<Material>, ingested_at: Option<DateTime<Utc>>) -> Self {
        let mut by_uuid = HashMap::with_capacity(materials.len());
        let mut by_group: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, m) in materials.iter().enumerate() {
            by_uuid.insert(m.uuid.clone(), idx);
            by_group.entry(m.group.clone()).or_default().push(idx);
            if !m.id.is_empty() {
                by_id.entry(m.id.clone()).or_default().push(idx);
            }
        }

        let fingerprint = fingerprint(&materials);

        Self {
            version: 0,
            ingested_at,
            materials,
            by_uuid,
            by_group,
            by_id,
            fingerprint,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ingested_at(&self) -> Option<DateTime<Utc>> {
        self.ingested_at
    }

    /// All materials in source order.
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Hex SHA-256 over the serialized records.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn get(&self, uuid: &str) -> Option<&Material> {
        self.by_uuid.get(uuid).map(|&i| &self.materials[i])
    }

    /// Materials whose `group` matches exactly, in source order.
    pub fn group(&self, group: &str) -> impl Iterator<Item = &Material> {
        self.by_group
            .get(group)
            .into_iter()
            .flatten()
            .map(move |&i| &self.materials[i])
    }

    /// Materials carrying the KBOB short code `id`, in source order.
    pub fn with_id(&self, id: &str) -> impl Iterator<Item = &Material> {
        self.by_id
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.materials[i])
    }

    /// Group names with their record counts, sorted by name.
    pub fn group_counts(&self) -> Vec<GroupCount> {
        let mut groups: Vec<GroupCount> = self
            .by_group
            .iter()
            .map(|(g, idx)| GroupCount {
                group: g.clone(),
                count: idx.len(),
            })
            .collect();
        groups.sort_by(|a, b| a.group.cmp(&b.group));
        groups
    }
}

/// One entry of [`Snapshot::group_counts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub group: String,
    pub count: usize,
}

fn fingerprint(materials: &[Material]) -> String {
    let mut hasher = Sha256::new();
    for m in materials {
        hasher.update(serde_json::to_vec(m).unwrap_or_default());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Holds the currently published snapshot.
///
/// Starts with [`Snapshot::empty`]. Only [`publish`](Self::publish)
/// changes what readers see. Reads never wait on a publish; publishers
/// are serialized among themselves.
#[derive(Debug)]
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
    publish_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
            publish_lock: Mutex::new(()),
        }
    }

    /// The published snapshot. Never fails, never partial.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Timestamp of the most recent successful publish, if any.
    pub fn last_ingested_at(&self) -> Option<DateTime<Utc>> {
        self.current.load().ingested_at
    }

    /// Atomically replace the visible snapshot and return the published one.
    ///
    /// Assigns `version = previous + 1`. If the new `ingested_at` is not
    /// strictly after the previous one it is moved to one millisecond past
    /// it, so readers always see a strictly increasing sequence.
    pub fn publish(&self, mut snapshot: Snapshot) -> Arc<Snapshot> {
        let _guard = self.publish_lock.lock();
        let prev = self.current.load();
        snapshot.version = prev.version + 1;
        if let (Some(prev), Some(next)) = (prev.ingested_at, snapshot.ingested_at) {
            if next <= prev {
                snapshot.ingested_at = Some(prev + Duration::milliseconds(1));
            }
        }
        let published = Arc::new(snapshot);
        self.current.store(published.clone());
        published
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn material(uuid: &str, id: &str, group: &str) -> Material {
        Material {
            id: id.to_string(),
            uuid: uuid.to_string(),
            group: group.to_string(),
            name: format!("{} name", uuid),
            name_fr: String::new(),
            disposal: String::new(),
            density: 1.0,
            unit: "kg".to_string(),
            ubp_total: 3.0,
            ubp_production: 2.0,
            ubp_disposal: 1.0,
            ghg_total: 0.3,
            ghg_production: 0.2,
            ghg_disposal: 0.1,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn cold_start_is_empty() {
        let store = SnapshotStore::new();
        let snap = store.current();
        assert!(snap.is_empty());
        assert_eq!(snap.version(), 0);
        assert!(snap.ingested_at().is_none());
        assert!(store.last_ingested_at().is_none());
    }

    #[test]
    fn publish_swaps_and_versions() {
        let store = SnapshotStore::new();
        let before = store.current();

        let t = Utc::now();
        let published = store.publish(Snapshot::new(vec![material("a", "1", "Beton")], t));

        assert_eq!(published.version(), 1);
        assert_eq!(store.current().len(), 1);
        assert_eq!(store.last_ingested_at(), Some(t));
        // A reader holding the old Arc still sees the old data.
        assert!(before.is_empty());
    }

    #[test]
    fn reads_do_not_wait_on_publishers() {
        let store = SnapshotStore::new();
        store.publish(Snapshot::new(vec![material("a", "1", "Beton")], Utc::now()));

        let _held = store.publish_lock.lock();
        assert_eq!(store.current().len(), 1);
        assert!(store.last_ingested_at().is_some());
    }

    #[test]
    fn ingested_at_strictly_increases() {
        let store = SnapshotStore::new();
        let t = Utc::now();
        store.publish(Snapshot::new(vec![material("a", "1", "Beton")], t));
        let second = store.publish(Snapshot::new(vec![material("b", "2", "Holz")], t));
        assert!(second.ingested_at().unwrap() > t);
        assert_eq!(second.version(), 2);
    }

    #[test]
    fn indices_by_group_id_and_uuid() {
        let snap = Snapshot::new(
            vec![
                material("a", "01.01", "Beton"),
                material("b", "02.01", "Holz"),
                material("c", "01.01", "Beton"),
            ],
            Utc::now(),
        );
        let beton: Vec<&str> = snap.group("Beton").map(|m| m.uuid.as_str()).collect();
        assert_eq!(beton, vec!["a", "c"]);
        assert_eq!(snap.group("beton").count(), 0);
        assert_eq!(snap.with_id("01.01").count(), 2);
        assert_eq!(snap.get("b").map(|m| m.group.as_str()), Some("Holz"));
        assert!(snap.get("zzz").is_none());
        assert_eq!(
            snap.group_counts(),
            vec![
                GroupCount {
                    group: "Beton".to_string(),
                    count: 2
                },
                GroupCount {
                    group: "Holz".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn fingerprint_tracks_content() {
        let t = Utc::now();
        let a = Snapshot::new(vec![material("a", "1", "Beton")], t);
        let b = Snapshot::new(vec![material("a", "1", "Beton")], t);
        let c = Snapshot::new(vec![material("a", "1", "Holz")], t);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        let store = Arc::new(SnapshotStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for round in 0..200 {
                    let group = if round % 2 == 0 { "Beton" } else { "Holz" };
                    let ms = (0..10)
                        .map(|i| material(&format!("{}-{}", round, i), "x", group))
                        .collect();
                    store.publish(Snapshot::new(ms, Utc::now()));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut last_version = 0;
                    for _ in 0..500 {
                        let snap = store.current();
                        assert!(snap.version() >= last_version);
                        last_version = snap.version();
                        if !snap.is_empty() {
                            let g = &snap.materials()[0].group;
                            assert!(snap.materials().iter().all(|m| &m.group == g));
                            assert_eq!(snap.len(), 10);
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
