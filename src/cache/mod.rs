//! Cache Module
//!
//! The cache node: an in-memory container with lifespan/max-idle expiration
//! and LRU eviction, fronting the persistence tier.

mod container;
mod entry;
mod lru;
mod node;
mod stats;
mod transactions;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use container::DataContainer;
pub use entry::{current_timestamp_ms, CacheEntry};
pub use lru::LruTracker;
pub use node::{Cache, NodeStats};
pub use stats::CacheStats;
pub use transactions::{TransactionCoordinator, TxPhase};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
