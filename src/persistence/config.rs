//! Persistence configuration
//!
//! Plain data describing the store stack. A [`StoreConfig`] is validated once
//! by [`StoreConfig::validate`] and handed to the builder by value, so nothing
//! can change it after the stack is assembled.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Base store variants the builder knows how to construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// HashMap-backed store; named instances are shared process-wide
    InMemory { name: Option<String> },
    /// Directory of hash-bucket files
    File { location: PathBuf },
    /// Read-only fallback that asks peer nodes for missing keys
    Cluster { timeout: Duration },
}

/// Write-behind settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncConfig {
    /// How long a writer waits for room in a full queue
    pub flush_lock_timeout: Duration,
    /// How long `stop()` waits for the queue to drain
    pub shutdown_timeout: Duration,
    pub queue_size: usize,
    pub thread_pool_size: usize,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            flush_lock_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(25),
            queue_size: 1024,
            thread_pool_size: 1,
        }
    }
}

/// Singleton-store settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingletonConfig {
    pub push_state_on_coordinator_change: bool,
    pub push_state_timeout: Duration,
}

impl Default for SingletonConfig {
    fn default() -> Self {
        Self {
            push_state_on_coordinator_change: true,
            push_state_timeout: Duration::from_secs(10),
        }
    }
}

/// Expiration reaper settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    pub enabled: bool,
    /// `None` disables periodic runs even when enabled
    pub wake_up_interval: Option<Duration>,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_up_interval: Some(Duration::from_secs(5)),
        }
    }
}

// == Store Config ==
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Ordered base stores; more than one builds a chain
    pub stores: Vec<StoreKind>,
    /// Several nodes write through to one physical store
    pub shared: bool,
    /// The store holds only what was evicted from memory
    pub passivation: bool,
    /// Warm the container from the store on start
    pub preload: bool,
    pub purge_on_startup: bool,
    /// Reaper waits for each store purge to finish
    pub purge_synchronously: bool,
    /// Store contents take part in state transfer to joining nodes
    pub fetch_persistent_state: bool,
    pub async_store: Option<AsyncConfig>,
    pub singleton: Option<SingletonConfig>,
    pub reaper: ReaperConfig,
}

impl StoreConfig {
    /// A config with a single base store and everything else default.
    pub fn with_store(kind: StoreKind) -> Self {
        Self {
            stores: vec![kind],
            ..Self::default()
        }
    }

    /// True when any store is configured.
    pub fn is_enabled(&self) -> bool {
        !self.stores.is_empty()
    }

    pub fn using_chaining(&self) -> bool {
        !self.passivation && self.stores.len() > 1
    }

    /// Interval the reaper should tick at, if it runs at all.
    pub fn reaper_interval(&self) -> Option<Duration> {
        if !self.reaper.enabled {
            return None;
        }
        self.reaper.wake_up_interval.filter(|d| !d.is_zero())
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.passivation && self.stores.len() > 1 {
            return Err(StoreError::ConfigMismatch(format!(
                "passivation supports a single store, {} configured",
                self.stores.len()
            )));
        }
        if let Some(cfg) = &self.async_store {
            if cfg.queue_size == 0 {
                return Err(StoreError::ConfigMismatch(
                    "async queue_size must be positive".to_string(),
                ));
            }
            if cfg.thread_pool_size == 0 {
                return Err(StoreError::ConfigMismatch(
                    "async thread_pool_size must be positive".to_string(),
                ));
            }
        }
        if self.shared && self.singleton.is_some() {
            return Err(StoreError::ConfigMismatch(
                "a store cannot be both shared and singleton".to_string(),
            ));
        }
        Ok(())
    }
}
