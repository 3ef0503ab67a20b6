//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    begin_tx_handler, commit_handler, delete_handler, get_handler, health_handler,
    prepare_handler, rollback_handler, set_handler, stats_handler, tx_delete_handler,
    tx_set_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/tx", post(begin_tx_handler))
        .route("/tx/:id/set", put(tx_set_handler))
        .route("/tx/:id/del/:key", delete(tx_delete_handler))
        .route("/tx/:id/prepare", post(prepare_handler))
        .route("/tx/:id/commit", post(commit_handler))
        .route("/tx/:id/rollback", post(rollback_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
