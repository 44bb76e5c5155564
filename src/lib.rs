//! # KBOB Cache
//!
//! An in-memory, periodically refreshed cache of the KBOB
//! construction-material LCA dataset, served over HTTP.
//!
//! The dataset is fetched from its publisher, normalized into validated
//! [`Material`](kbob_core::models::Material) records, and published as an
//! immutable snapshot. Readers always see one whole snapshot; a failed
//! refresh keeps the previous one.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────────┐
//! │ HttpFetcher │──▶│ Normalizer  │──▶│ Snapshot   │──▶│ QueryService │
//! │ xlsx / json │   │ (kbob-core) │   │ Store      │   │ (kbob-core)  │
//! └─────────────┘   └─────────────┘   └────────────┘   └──────┬───────┘
//!        ▲                 ▲                                  │
//!        │         ┌───────┴───────┐                   ┌──────▼──────┐
//!        └─────────│  Coordinator  │◀── scheduler ─────│  HTTP (axum)│
//!                  └───────────────┘                   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbob sync --dry-run           # fetch + normalize, print rejects
//! kbob sync                     # one ingestion (persists if configured)
//! kbob check-link https://www.kbob.admin.ch
//! kbob serve                    # HTTP API + scheduled refresh
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`xlsx`] | Worksheet reader for the published workbook |
//! | [`fetcher`] | HTTP / file Source Fetcher |
//! | [`links`] | Link Validator |
//! | [`ingest`] | Ingestion Coordinator |
//! | [`persist`] | Optional snapshot file |
//! | [`scheduler`] | Periodic ingestion task |
//! | [`server`] | HTTP API |
//! | [`error`] | HTTP error rendering |
//! | [`sync`] | CLI one-shot commands |

pub mod config;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod links;
pub mod persist;
pub mod scheduler;
pub mod server;
pub mod sync;
pub mod xlsx;
