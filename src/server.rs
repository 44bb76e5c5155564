//! HTTP API over the snapshot cache.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness and crate version |
//! | `GET`  | `/api/kbob/last-ingestion` | Timestamp of the published snapshot |
//! | `GET`  | `/api/kbob/materials/group/{group}` | Materials of one group |
//! | `GET`  | `/api/kbob/materials?page=&pageSize=` | Paginated materials |
//! | `GET`  | `/api/kbob/materials/id/{id}` | Materials sharing a KBOB short code |
//! | `GET`  | `/api/kbob/materials/{uuid}` | One material |
//! | `GET`  | `/api/kbob/groups` | Groups with record counts |
//! | `POST` | `/api/kbob/test-link` | Reachability of `{ "link": ... }` |
//! | `POST` | `/api/kbob/ingest` | Run an ingestion now |
//! | `GET`  | `/api/kbob/ingestion` | Coordinator state and last outcome |
//! | `GET`  | `/api/kbob/source-status` | Reachability of the source links |
//!
//! Successful bodies carry `"success": true`; errors are rendered by
//! [`ApiError`] as `{ "success": false, "error": ... }`.
//!
//! Reads never fail because of ingestion health: they are answered from
//! the last good snapshot, or the empty cold-start snapshot.

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use kbob_core::models::Material;
use kbob_core::query::{Pagination, QueryService};
use kbob_core::snapshot::{GroupCount, SnapshotStore};
use kbob_core::source::SourceFetcher;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::fetcher::HttpFetcher;
use crate::ingest::{IngestionCoordinator, IngestionOutcome, IngestionSettings, IngestionState};
use crate::links::{LinkStatus, LinkValidator};
use crate::scheduler::{ingestion_task, SchedulerConfig};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    query: QueryService,
    coordinator: Arc<IngestionCoordinator>,
    links: LinkValidator,
    /// Dataset URL (when http) plus configured auxiliary links.
    source_links: Arc<Vec<String>>,
    default_page_size: usize,
}

impl AppState {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn SourceFetcher>,
        coordinator: Arc<IngestionCoordinator>,
    ) -> Self {
        let mut source_links = Vec::new();
        let dataset_url = &config.source.dataset_url;
        if dataset_url.starts_with("http://") || dataset_url.starts_with("https://") {
            source_links.push(dataset_url.clone());
        }
        source_links.extend(config.source.links.iter().cloned());

        Self {
            query: QueryService::new(coordinator.store().clone(), config.query.max_page_size),
            links: LinkValidator::new(fetcher, config.source.link_timeout()),
            coordinator,
            source_links: Arc::new(source_links),
            default_page_size: config.query.default_page_size,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/kbob/last-ingestion", get(handle_last_ingestion))
        .route("/api/kbob/materials", get(handle_materials))
        .route("/api/kbob/materials/group/{group}", get(handle_group))
        .route("/api/kbob/materials/id/{id}", get(handle_materials_by_id))
        .route("/api/kbob/materials/{uuid}", get(handle_material))
        .route("/api/kbob/groups", get(handle_groups))
        .route("/api/kbob/test-link", post(handle_test_link))
        .route("/api/kbob/ingest", post(handle_ingest))
        .route("/api/kbob/ingestion", get(handle_ingestion_status))
        .route("/api/kbob/source-status", get(handle_source_status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the cache: restores persisted data, spawns the scheduler and
/// serves HTTP on `[server].bind` until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let fetcher: Arc<dyn SourceFetcher> = Arc::new(HttpFetcher::new(&config.source)?);
    let store = Arc::new(SnapshotStore::new());
    let coordinator = Arc::new(IngestionCoordinator::new(
        fetcher.clone(),
        config.source.normalizer()?,
        store,
        IngestionSettings::from_config(config),
    ));

    if let Err(e) = coordinator.restore_persisted() {
        tracing::warn!(error = %format!("{:#}", e), "starting with an empty snapshot");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = match SchedulerConfig::from_config(&config.ingestion) {
        Some(sc) => Some(tokio::spawn(ingestion_task(
            coordinator.clone(),
            sc,
            shutdown_rx,
        ))),
        None => {
            tracing::info!("scheduled ingestion disabled");
            if config.ingestion.run_on_startup {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    if let Err(e) = coordinator.run_ingestion().await {
                        tracing::debug!(error = %e, "startup ingestion skipped");
                    }
                });
            }
            None
        }
    };

    let app = build_router(AppState::new(config, fetcher, coordinator));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "KBOB cache listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "ingestion scheduler task failed");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /api/kbob/last-ingestion ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LastIngestionResponse {
    last_ingestion_time: Option<DateTime<Utc>>,
}

async fn handle_last_ingestion(State(state): State<AppState>) -> Json<LastIngestionResponse> {
    Json(LastIngestionResponse {
        last_ingestion_time: state.coordinator.store().last_ingested_at(),
    })
}

// ============ GET /api/kbob/materials/group/{group} ============

#[derive(Serialize)]
struct GroupResponse {
    success: bool,
    materials: Vec<Material>,
    count: usize,
}

async fn handle_group(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Json<GroupResponse> {
    let materials = state.query.materials_by_group(&group);
    Json(GroupResponse {
        success: true,
        count: materials.len(),
        materials,
    })
}

// ============ GET /api/kbob/materials/id/{id} ============

/// Same body shape as the group listing; an unknown id is an empty list.
async fn handle_materials_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<GroupResponse> {
    let materials = state.query.materials_by_id(&id);
    Json(GroupResponse {
        success: true,
        count: materials.len(),
        materials,
    })
}

// ============ GET /api/kbob/materials ============

/// Raw strings so that non-numeric input yields our own 400 body.
#[derive(Deserialize)]
struct PageParams {
    page: Option<String>,
    #[serde(rename = "pageSize")]
    page_size: Option<String>,
}

#[derive(Serialize)]
struct MaterialsResponse {
    success: bool,
    materials: Vec<Material>,
    pagination: Pagination,
}

fn parse_int(name: &str, raw: Option<&str>, default: i64) -> ApiResult<i64> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(s) => s.parse::<i64>().map_err(|_| {
            ApiError::BadRequest(format!("{} must be a positive integer, got '{}'", name, s))
        }),
    }
}

async fn handle_materials(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<MaterialsResponse>> {
    let page = parse_int("page", params.page.as_deref(), 1)?;
    let page_size = parse_int(
        "pageSize",
        params.page_size.as_deref(),
        state.default_page_size as i64,
    )?;

    let page = state.query.all_materials(page, page_size)?;
    Ok(Json(MaterialsResponse {
        success: true,
        materials: page.items,
        pagination: page.pagination,
    }))
}

// ============ GET /api/kbob/materials/{uuid} ============

#[derive(Serialize)]
struct MaterialResponse {
    success: bool,
    material: Material,
}

async fn handle_material(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> ApiResult<Json<MaterialResponse>> {
    let material = state
        .query
        .material_by_uuid(&uuid)
        .ok_or_else(|| ApiError::NotFound(format!("no material with uuid '{}'", uuid)))?;
    Ok(Json(MaterialResponse {
        success: true,
        material,
    }))
}

// ============ GET /api/kbob/groups ============

#[derive(Serialize)]
struct GroupsResponse {
    success: bool,
    groups: Vec<GroupCount>,
}

async fn handle_groups(State(state): State<AppState>) -> Json<GroupsResponse> {
    Json(GroupsResponse {
        success: true,
        groups: state.query.groups(),
    })
}

// ============ POST /api/kbob/test-link ============

#[derive(Serialize)]
struct TestLinkResponse {
    success: bool,
}

async fn handle_test_link(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<TestLinkResponse>> {
    let value: serde_json::Value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?
    };
    let link = value
        .get("link")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::BadRequest("link is required".to_string()))?;

    let reachable = state.links.test_link(link).await?;
    Ok(Json(TestLinkResponse { success: reachable }))
}

// ============ POST /api/kbob/ingest ============

#[derive(Serialize)]
struct IngestResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    outcome: IngestionOutcome,
}

/// A run that fails upstream answers 502 so the status agrees with `success`.
async fn handle_ingest(State(state): State<AppState>) -> ApiResult<Response> {
    let outcome = state.coordinator.run_ingestion().await?;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    let body = IngestResponse {
        success: outcome.success,
        error: outcome.failure.as_ref().map(|f| f.message.clone()),
        outcome,
    };
    Ok((status, Json(body)).into_response())
}

// ============ GET /api/kbob/ingestion ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestionStatusResponse {
    state: IngestionState,
    snapshot_version: u64,
    fingerprint: String,
    record_count: usize,
    last_ingestion_time: Option<DateTime<Utc>>,
    completed_runs: u64,
    last_outcome: Option<IngestionOutcome>,
}

async fn handle_ingestion_status(State(state): State<AppState>) -> Json<IngestionStatusResponse> {
    let snapshot = state.query.snapshot();
    Json(IngestionStatusResponse {
        state: state.coordinator.state(),
        snapshot_version: snapshot.version(),
        fingerprint: snapshot.fingerprint().to_string(),
        record_count: snapshot.len(),
        last_ingestion_time: snapshot.ingested_at(),
        completed_runs: state.coordinator.completed_runs(),
        last_outcome: state.coordinator.last_outcome(),
    })
}

// ============ GET /api/kbob/source-status ============

#[derive(Serialize)]
struct SourceStatusResponse {
    links: Vec<LinkStatus>,
}

async fn handle_source_status(State(state): State<AppState>) -> Json<SourceStatusResponse> {
    Json(SourceStatusResponse {
        links: state.links.check_all(&state.source_links).await,
    })
}
