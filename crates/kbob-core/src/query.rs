//! Read-only queries over the published snapshot.
//!
//! Every call takes exactly one [`Snapshot`] from the store at its start
//! and answers entirely from it, so a concurrent publish never produces a
//! mixed result.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::models::Material;
use crate::snapshot::{GroupCount, Snapshot, SnapshotStore};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid page request: {0}")]
    InvalidPageRequest(String),
}

/// One page of materials plus pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub items: Vec<Material>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

/// Query front-end over a shared [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<SnapshotStore>,
    max_page_size: usize,
}

impl QueryService {
    pub fn new(store: Arc<SnapshotStore>, max_page_size: usize) -> Self {
        Self {
            store,
            max_page_size,
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.current()
    }

    /// Exact, case-sensitive group match. Unknown groups yield an empty vec.
    pub fn materials_by_group(&self, group: &str) -> Vec<Material> {
        let snap = self.store.current();
        snap.group(group).cloned().collect()
    }

    /// Page `page` (1-based) of all materials in source order.
    ///
    /// `page` and `page_size` must be positive and `page_size` may not
    /// exceed the configured maximum. Pages past the end are empty.
    pub fn all_materials(&self, page: i64, page_size: i64) -> Result<Page, QueryError> {
        if page < 1 {
            return Err(QueryError::InvalidPageRequest(format!(
                "page must be a positive integer, got {}",
                page
            )));
        }
        if page_size < 1 {
            return Err(QueryError::InvalidPageRequest(format!(
                "pageSize must be a positive integer, got {}",
                page_size
            )));
        }
        let (page, page_size) = (page as usize, page_size as usize);
        if page_size > self.max_page_size {
            return Err(QueryError::InvalidPageRequest(format!(
                "pageSize must not exceed {}",
                self.max_page_size
            )));
        }

        let snap = self.store.current();
        Ok(paginate(&snap, page, page_size))
    }

    /// Lookup by primary key.
    pub fn material_by_uuid(&self, uuid: &str) -> Option<Material> {
        self.store.current().get(uuid).cloned()
    }

    /// All materials carrying the KBOB short code `id`.
    pub fn materials_by_id(&self, id: &str) -> Vec<Material> {
        let snap = self.store.current();
        snap.with_id(id).cloned().collect()
    }

    pub fn groups(&self) -> Vec<GroupCount> {
        self.store.current().group_counts()
    }
}

fn paginate(snap: &Snapshot, page: usize, page_size: usize) -> Page {
    let total_items = snap.len();
    let total_pages = total_items.div_ceil(page_size);
    let start = (page - 1).saturating_mul(page_size);
    let items = snap
        .materials()
        .iter()
        .skip(start)
        .take(page_size)
        .cloned()
        .collect();

    Page {
        items,
        pagination: Pagination {
            page,
            page_size,
            total_items,
            total_pages,
        },
    }
}
