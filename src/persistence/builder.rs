//! Store stack assembly
//!
//! Wraps the configured base stores in decorators, always in the same order:
//! base store(s) -> chaining -> shared/singleton -> async.

use std::sync::Arc;

use tracing::info;

use super::{
    AsyncStore, ChainingStore, ClusterLoader, FileStore, InMemoryStore, RemoteValueSource,
    SharedPolicy, SharedStore, Store, StoreConfig, StoreKind,
};
use crate::error::{StoreError, StoreResult};

/// An assembled decorator stack.
///
/// `root` is the outermost store; the typed handles point into the same
/// stack for callers that need decorator-specific operations.
#[derive(Clone, Default)]
pub struct StoreStack {
    root: Option<Arc<dyn Store>>,
    shared: Option<Arc<SharedStore>>,
    async_store: Option<Arc<AsyncStore>>,
}

impl StoreStack {
    /// A stack with no store at all; every persistence call is skipped.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A stack around a caller-supplied store with no decorators.
    pub fn custom(root: Arc<dyn Store>) -> Self {
        Self {
            root: Some(root),
            ..Self::default()
        }
    }

    pub fn root(&self) -> Option<&Arc<dyn Store>> {
        self.root.as_ref()
    }

    pub fn shared(&self) -> Option<&Arc<SharedStore>> {
        self.shared.as_ref()
    }

    pub fn async_store(&self) -> Option<&Arc<AsyncStore>> {
        self.async_store.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Kind labels from the outermost store inwards, for logging.
    pub fn describe(&self) -> String {
        let mut layers = Vec::new();
        if self.async_store.is_some() {
            layers.push("async");
        }
        if let Some(shared) = &self.shared {
            layers.push(shared.kind());
        }
        match &self.root {
            Some(root) if layers.is_empty() => layers.push(root.kind()),
            Some(_) => {}
            None => layers.push("none"),
        }
        layers.join(" -> ")
    }
}

// == Store Stack Builder ==
pub struct StoreStackBuilder {
    config: StoreConfig,
    remote: Option<Arc<dyn RemoteValueSource>>,
}

impl StoreStackBuilder {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            remote: None,
        }
    }

    /// Peer source required by `StoreKind::Cluster` stores.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteValueSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn build(self) -> StoreResult<StoreStack> {
        self.config.validate()?;
        if !self.config.is_enabled() {
            return Ok(StoreStack::empty());
        }

        let mut bases = self
            .config
            .stores
            .iter()
            .map(|kind| self.build_base(kind))
            .collect::<StoreResult<Vec<_>>>()?;

        let mut root: Arc<dyn Store> = if self.config.using_chaining() {
            Arc::new(ChainingStore::new(bases))
        } else {
            bases.remove(0)
        };

        let policy = match (self.config.shared, self.config.singleton) {
            (true, _) => Some(SharedPolicy::Shared),
            (false, Some(singleton)) => Some(SharedPolicy::Singleton(singleton)),
            (false, None) => None,
        };
        let shared = policy.map(|policy| Arc::new(SharedStore::new(root.clone(), policy)));
        if let Some(shared) = &shared {
            root = shared.clone();
        }

        let async_store = self
            .config
            .async_store
            .map(|cfg| Arc::new(AsyncStore::new(root.clone(), cfg)));
        if let Some(async_store) = &async_store {
            root = async_store.clone();
        }

        let stack = StoreStack {
            root: Some(root),
            shared,
            async_store,
        };
        info!("Built store stack: {}", stack.describe());
        Ok(stack)
    }

    fn build_base(&self, kind: &StoreKind) -> StoreResult<Arc<dyn Store>> {
        let store: Arc<dyn Store> = match kind {
            StoreKind::InMemory { name: Some(name) } => InMemoryStore::named(name),
            StoreKind::InMemory { name: None } => Arc::new(InMemoryStore::new()),
            StoreKind::File { location } => Arc::new(FileStore::new(location.clone())),
            StoreKind::Cluster { timeout } => {
                let remote = self.remote.clone().ok_or_else(|| {
                    StoreError::ConfigMismatch(
                        "cluster store configured without a peer source".to_string(),
                    )
                })?;
                Arc::new(ClusterLoader::new(remote, *timeout))
            }
        };
        Ok(store)
    }
}
