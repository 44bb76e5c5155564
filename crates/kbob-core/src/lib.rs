//! # KBOB Core
//!
//! Runtime-agnostic core of the KBOB cache: the material data model, the
//! normalizer that turns raw source rows into validated materials, the
//! snapshot store that publishes them atomically, and the query service
//! that reads them.
//!
//! This crate has no tokio, HTTP or filesystem dependencies. Fetching is
//! abstracted behind [`source::SourceFetcher`].
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `Material`, raw rows and canonical fields |
//! | [`normalize`] | Row validation, coercion and duplicate resolution |
//! | [`snapshot`] | Immutable snapshots and the atomic store |
//! | [`query`] | Group, paginated and keyed lookups |
//! | [`source`] | Fetcher trait and source/link errors |

pub mod models;
pub mod normalize;
pub mod query;
pub mod snapshot;
pub mod source;
