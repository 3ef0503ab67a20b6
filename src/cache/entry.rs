//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with lifespan and
//! max-idle expiration. The same entry type lives in the in-memory container
//! and in every store of the persistence tier.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// Represents a single cache entry with value and expiration metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The key this entry is stored under
    pub key: String,
    /// The stored value
    pub value: String,
    /// Time the entry may live after creation, None = immortal
    pub lifespan: Option<Duration>,
    /// Time the entry may stay untouched, None = never idles out
    pub max_idle: Option<Duration>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Last access timestamp (Unix milliseconds)
    pub last_used_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry that never expires.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        let now = current_timestamp_ms();
        Self {
            key: key.into(),
            value: value.into(),
            lifespan: None,
            max_idle: None,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Sets the lifespan of the entry.
    pub fn with_lifespan(mut self, lifespan: Option<Duration>) -> Self {
        self.lifespan = lifespan;
        self
    }

    /// Sets the max-idle time of the entry.
    pub fn with_max_idle(mut self, max_idle: Option<Duration>) -> Self {
        self.max_idle = max_idle;
        self
    }

    // == Is Expired ==
    /// Checks if the entry has expired at the given instant.
    ///
    /// Boundary condition: an entry is expired once `now` reaches
    /// `created_at + lifespan` or `last_used_at + max_idle`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        let lifespan_over = self
            .lifespan
            .map(|l| now_ms >= self.created_at.saturating_add(l.as_millis() as u64))
            .unwrap_or(false);
        let idle_over = self
            .max_idle
            .map(|m| now_ms >= self.last_used_at.saturating_add(m.as_millis() as u64))
            .unwrap_or(false);
        lifespan_over || idle_over
    }

    /// Checks if the entry has expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Returns true if the entry can expire at all.
    pub fn can_expire(&self) -> bool {
        self.lifespan.is_some() || self.max_idle.is_some()
    }

    /// Records an access, resetting the max-idle clock.
    pub fn touch(&mut self) {
        self.last_used_at = current_timestamp_ms();
    }

    // == Time To Live ==
    /// Returns remaining lifespan in milliseconds, or None if no lifespan is set.
    ///
    /// # Returns
    /// - `Some(0)` if the lifespan has elapsed
    /// - `Some(remaining_ms)` if the entry has a lifespan and hasn't expired
    /// - `None` if the entry has no lifespan
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.lifespan.map(|lifespan| {
            let expires = self.created_at.saturating_add(lifespan.as_millis() as u64);
            expires.saturating_sub(current_timestamp_ms())
        })
    }

    /// Returns remaining lifespan in seconds, or None if no lifespan is set.
    pub fn ttl_remaining(&self) -> Option<u64> {
        self.ttl_remaining_ms().map(|ms| ms / 1000)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
