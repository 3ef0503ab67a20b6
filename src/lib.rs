//! Persistent Cache - a cache node backed by a pluggable persistence tier
//!
//! An in-memory container with lifespan expiration and LRU eviction, in
//! front of stores that can be chained, shared between nodes, written
//! behind asynchronously, or used as a passivation target.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod persistence;
pub mod tasks;

pub use api::AppState;
pub use cache::Cache;
pub use config::Config;
pub use tasks::spawn_reaper_task;
