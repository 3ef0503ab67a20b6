//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use std::time::Duration;

use serde::Deserialize;

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: The value to store
/// - `ttl`: Optional lifespan in seconds (node default if not specified)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: String,
    /// Optional lifespan in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    pub fn lifespan(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }
}

/// Request body for a transactional put (PUT /tx/:id/set)
#[derive(Debug, Clone, Deserialize)]
pub struct TxSetRequest {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl TxSetRequest {
    pub fn lifespan(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }
}

/// Request body for POST /tx/:id/prepare
///
/// A one-phase prepare applies the transaction immediately.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrepareRequest {
    #[serde(default)]
    pub one_phase: bool,
}
