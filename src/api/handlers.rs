//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.
//!
//! Node operations may block on store I/O or on a full write-behind queue,
//! so they run on the blocking pool.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::Cache;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, GetResponse, HealthResponse, PrepareRequest, SetRequest, SetResponse,
    StatsResponse, TxResponse, TxSetRequest,
};
use crate::persistence::TxId;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<Cache>,
}

impl AppState {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }

    /// Builds and starts a node from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = Cache::new(config, None)?;
        cache.start()?;
        Ok(Self::new(cache))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Internal(format!("Worker task failed: {}", e)))?
}

fn parse_tx(id: &str) -> Result<TxId> {
    id.parse()
        .map_err(|_| CacheError::InvalidRequest(format!("Invalid transaction id '{}'", id)))
}

/// Handler for PUT /set
///
/// Stores a key-value pair with an optional TTL in seconds.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    let lifespan = req.lifespan();
    let entry = blocking(move || state.cache.put(&req.key, &req.value, lifespan)).await?;
    Ok(Json(SetResponse::new(entry.key)))
}

/// Handler for GET /get/:key
///
/// Falls through to the persistence tier on a memory miss.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let entry = blocking(move || state.cache.get(&key)).await?;
    Ok(Json(GetResponse::from(entry)))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let deleted = key.clone();
    blocking(move || state.cache.delete(&deleted)).await?;
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(
        state.cache.name(),
        state.cache.persistence().stack().describe(),
    ))
}

// == Transactions ==
/// Handler for POST /tx
pub async fn begin_tx_handler(State(state): State<AppState>) -> Json<TxResponse> {
    Json(TxResponse::new(state.cache.begin_tx(), "active"))
}

/// Handler for PUT /tx/:id/set
pub async fn tx_set_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TxSetRequest>,
) -> Result<Json<TxResponse>> {
    let tx = parse_tx(&id)?;
    state.cache.tx_put(tx, &req.key, &req.value, req.lifespan())?;
    Ok(Json(TxResponse::new(tx, "active")))
}

/// Handler for DELETE /tx/:id/del/:key
pub async fn tx_delete_handler(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<Json<TxResponse>> {
    let tx = parse_tx(&id)?;
    state.cache.tx_remove(tx, &key)?;
    Ok(Json(TxResponse::new(tx, "active")))
}

/// Handler for POST /tx/:id/prepare
///
/// The body is optional; `{"one_phase": true}` commits on the spot.
pub async fn prepare_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<PrepareRequest>>,
) -> Result<Json<TxResponse>> {
    let tx = parse_tx(&id)?;
    let one_phase = body.map(|Json(req)| req.one_phase).unwrap_or(false);
    blocking(move || state.cache.prepare(tx, one_phase)).await?;
    let status = if one_phase { "committed" } else { "prepared" };
    Ok(Json(TxResponse::new(tx, status)))
}

/// Handler for POST /tx/:id/commit
pub async fn commit_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TxResponse>> {
    let tx = parse_tx(&id)?;
    blocking(move || state.cache.commit(tx)).await?;
    Ok(Json(TxResponse::new(tx, "committed")))
}

/// Handler for POST /tx/:id/rollback
pub async fn rollback_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TxResponse>> {
    let tx = parse_tx(&id)?;
    blocking(move || state.cache.rollback(tx)).await?;
    Ok(Json(TxResponse::new(tx, "rolled_back")))
}
