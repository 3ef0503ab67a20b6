//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheEntry, NodeStats};
use crate::persistence::{PersistenceStats, TxId};

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: String,
    /// Expiry instant in Unix milliseconds, absent for immortal entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires_at: None,
        }
    }
}

impl From<CacheEntry> for GetResponse {
    fn from(entry: CacheEntry) -> Self {
        let expires_at = entry
            .lifespan
            .map(|l| entry.created_at.saturating_add(l.as_millis() as u64));
        Self {
            key: entry.key,
            value: entry.value,
            expires_at,
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for every transaction endpoint
#[derive(Debug, Clone, Serialize)]
pub struct TxResponse {
    pub tx_id: String,
    /// What happened to the transaction, e.g. "active" or "committed"
    pub status: String,
}

impl TxResponse {
    pub fn new(tx: TxId, status: impl Into<String>) -> Self {
        Self {
            tx_id: tx.to_string(),
            status: status.into(),
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of evictions
    pub evictions: u64,
    /// Number of entries dropped because they expired
    pub expirations: u64,
    /// Current number of entries in memory
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    /// Persistence tier counters
    pub persistence: PersistenceStats,
}

impl From<NodeStats> for StatsResponse {
    fn from(stats: NodeStats) -> Self {
        Self {
            hits: stats.cache.hits,
            misses: stats.cache.misses,
            evictions: stats.cache.evictions,
            expirations: stats.cache.expirations,
            total_entries: stats.cache.total_entries,
            hit_rate: stats.cache.hit_rate(),
            persistence: stats.persistence,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Name of the node answering
    pub node: String,
    /// Store stack in use, outermost decorator first
    pub store: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy(node: impl Into<String>, store: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            node: node.into(),
            store: store.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
