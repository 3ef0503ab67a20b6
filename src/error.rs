//! Error types for the cache node and its persistence tier
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Store Error Enum ==
/// Errors raised by the persistence tier.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backing medium unavailable, or a read/write against it failed
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A store does not match the configuration it was built from
    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// The async write queue stayed full past the flush lock timeout
    #[error("Async store queue full after waiting {0:?}")]
    Backpressure(Duration),

    /// Draining the async write queue on stop did not finish in time
    #[error("Async store failed to drain {pending} modifications within {timeout:?}")]
    ShutdownTimeout { pending: usize, timeout: Duration },

    /// Pushing in-memory state to a singleton store did not finish in time
    #[error("Pushing state to singleton store did not finish within {0:?}")]
    PushStateTimeout(Duration),

    /// The store was used after it was stopped
    #[error("Store is not running")]
    NotRunning,

    /// Every child of a chaining store failed
    #[error("All {} chained stores failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<StoreError>),
}

fn join_errors(errors: &[StoreError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience Result type for the persistence tier.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// == Cache Error Enum ==
/// Unified error type for the cache node.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key has expired
    #[error("Key expired: {0}")]
    Expired(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cache is full and eviction failed
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// No open transaction with this id
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    /// The persistence tier rejected the operation
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) | CacheError::Expired(_) => StatusCode::NOT_FOUND,
            CacheError::UnknownTransaction(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::CacheFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Store(StoreError::Backpressure(_)) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Store(_) | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache node.
pub type Result<T> = std::result::Result<T, CacheError>;
