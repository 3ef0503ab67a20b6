//! Async Store Decorator
//!
//! Decouples callers from store latency. Writes are appended to a bounded
//! FIFO and return at once; a flusher thread drains the queue in batches,
//! collapses each batch to the last modification per key, and hands the
//! per-key work to a fixed pool of worker threads.
//!
//! # Thread Lifecycle
//!
//! - `start()` spawns the flusher and `thread_pool_size` workers
//! - `stop()` rejects new writes, waits up to `shutdown_timeout` for the
//!   flusher to apply everything already queued, then stops the wrapped store
//! - `Drop` performs the same stop if the owner forgot to

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{
    apply_modification, AsyncConfig, Modification, ModificationLog, Store, TxId, WriteContext,
};
use crate::cache::{current_timestamp_ms, CacheEntry};
use crate::error::{StoreError, StoreResult};

/// Consecutive failing batches before the flusher escalates to `error!`.
const FAILURE_ESCALATION: u64 = 3;

#[derive(Debug, Clone)]
struct Pending {
    modification: Modification,
    ctx: WriteContext,
}

/// A drained, coalesced slice of the queue.
#[derive(Debug, Default)]
struct Batch {
    /// Set when a `ClearAll` was queued; applied before `by_key`
    clear: Option<WriteContext>,
    /// Last modification per key queued after the clear, if any
    by_key: HashMap<String, Pending>,
}

impl Batch {
    fn coalesce(drained: Vec<Pending>, stats: &AsyncCounters) -> Self {
        let mut batch = Batch::default();
        for pending in drained {
            let key = match pending.modification.key() {
                Some(key) => key.to_string(),
                None => {
                    stats.add(&stats.coalesced, batch.by_key.len());
                    batch.by_key.clear();
                    batch.clear = Some(pending.ctx);
                    continue;
                }
            };
            if batch.by_key.insert(key, pending).is_some() {
                stats.add(&stats.coalesced, 1);
            }
        }
        batch
    }

    fn len(&self) -> usize {
        self.by_key.len() + usize::from(self.clear.is_some())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<Pending>,
    in_flight: Option<Arc<Batch>>,
    running: bool,
    stopping: bool,
}

impl QueueState {
    /// What the pending modifications say about `key`:
    /// `Some(Some(entry))` written, `Some(None)` removed or cleared,
    /// `None` untouched.
    fn view(&self, key: &str) -> Option<Option<CacheEntry>> {
        for pending in self.queue.iter().rev() {
            match &pending.modification {
                Modification::Write(entry) if entry.key == key => return Some(Some(entry.clone())),
                Modification::Remove(k) if k == key => return Some(None),
                Modification::ClearAll => return Some(None),
                _ => {}
            }
        }
        let batch = self.in_flight.as_ref()?;
        match batch.by_key.get(key) {
            Some(Pending {
                modification: Modification::Write(entry),
                ..
            }) => Some(Some(entry.clone())),
            Some(_) => Some(None),
            None if batch.clear.is_some() => Some(None),
            None => None,
        }
    }

    fn pending_len(&self) -> usize {
        self.queue.len() + self.in_flight.as_ref().map(|b| b.len()).unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct AsyncCounters {
    enqueued: AtomicU64,
    applied: AtomicU64,
    coalesced: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    failing_batches: AtomicU64,
}

impl AsyncCounters {
    fn add(&self, counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Point-in-time counters of an [`AsyncStore`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AsyncStats {
    pub enqueued: u64,
    pub applied: u64,
    pub coalesced: u64,
    pub failed: u64,
    pub rejected: u64,
    pub consecutive_failing_batches: u64,
    pub queue_len: usize,
}

struct Shared {
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    idle: Condvar,
    counters: AsyncCounters,
}

struct Threads {
    flusher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    done: Receiver<()>,
}

// == Async Store ==
pub struct AsyncStore {
    inner: Arc<dyn Store>,
    config: AsyncConfig,
    shared: Arc<Shared>,
    log: ModificationLog,
    threads: Mutex<Option<Threads>>,
}

impl AsyncStore {
    pub fn new(inner: Arc<dyn Store>, config: AsyncConfig) -> Self {
        Self {
            inner,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                not_full: Condvar::new(),
                not_empty: Condvar::new(),
                idle: Condvar::new(),
                counters: AsyncCounters::default(),
            }),
            log: ModificationLog::new(),
            threads: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> AsyncStats {
        let c = &self.shared.counters;
        AsyncStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            applied: c.applied.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            consecutive_failing_batches: c.failing_batches.load(Ordering::Relaxed),
            queue_len: self.shared.state.lock().pending_len(),
        }
    }

    /// Blocks until every modification queued so far has been applied, or
    /// `shutdown_timeout` passes.
    pub fn flush(&self) -> StoreResult<()> {
        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut state = self.shared.state.lock();
        while state.pending_len() > 0 {
            if !state.running && !state.stopping {
                return Err(StoreError::NotRunning);
            }
            if self.shared.idle.wait_until(&mut state, deadline).timed_out()
                && state.pending_len() > 0
            {
                return Err(StoreError::ShutdownTimeout {
                    pending: state.pending_len(),
                    timeout: self.config.shutdown_timeout,
                });
            }
        }
        Ok(())
    }

    fn enqueue(&self, modification: Modification, ctx: WriteContext) -> StoreResult<()> {
        let mut state = self.shared.state.lock();
        if !state.running {
            return Err(StoreError::NotRunning);
        }
        let deadline = Instant::now() + self.config.flush_lock_timeout;
        while state.queue.len() >= self.config.queue_size {
            let timed_out = self.shared.not_full.wait_until(&mut state, deadline).timed_out();
            if !state.running {
                return Err(StoreError::NotRunning);
            }
            if timed_out && state.queue.len() >= self.config.queue_size {
                self.shared.counters.add(&self.shared.counters.rejected, 1);
                return Err(StoreError::Backpressure(self.config.flush_lock_timeout));
            }
        }
        state.queue.push_back(Pending { modification, ctx });
        self.shared.counters.add(&self.shared.counters.enqueued, 1);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    fn spawn_threads(&self) -> StoreResult<Threads> {
        let (job_tx, job_rx) = channel::unbounded::<(Pending, WaitGroup)>();
        let workers = (0..self.config.thread_pool_size)
            .map(|index| {
                let jobs = job_rx.clone();
                let inner = self.inner.clone();
                let shared = self.shared.clone();
                thread::Builder::new()
                    .name(format!("async-store-worker-{}", index))
                    .spawn(move || worker_loop(inner, shared, jobs))
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        let (done_tx, done) = channel::bounded(1);
        let inner = self.inner.clone();
        let shared = self.shared.clone();
        let flusher = thread::Builder::new()
            .name("async-store-flusher".to_string())
            .spawn(move || {
                flusher_loop(inner, shared, job_tx);
                let _ = done_tx.send(());
            })?;

        Ok(Threads {
            flusher,
            workers,
            done,
        })
    }
}

fn worker_loop(inner: Arc<dyn Store>, shared: Arc<Shared>, jobs: Receiver<(Pending, WaitGroup)>) {
    for (pending, batch_done) in jobs.iter() {
        apply_pending(inner.as_ref(), &shared.counters, pending);
        drop(batch_done);
    }
}

fn apply_pending(inner: &dyn Store, counters: &AsyncCounters, pending: Pending) {
    let key = pending.modification.key().unwrap_or("*").to_string();
    match apply_modification(inner, pending.modification, pending.ctx) {
        Ok(()) => counters.add(&counters.applied, 1),
        Err(e) => {
            counters.add(&counters.failed, 1);
            warn!("Async store failed to apply modification for '{}': {}", key, e);
        }
    }
}

fn flusher_loop(inner: Arc<dyn Store>, shared: Arc<Shared>, jobs: Sender<(Pending, WaitGroup)>) {
    loop {
        let batch = {
            let mut state = shared.state.lock();
            while state.queue.is_empty() && !state.stopping {
                shared.not_empty.wait(&mut state);
            }
            if state.queue.is_empty() {
                break;
            }
            let drained: Vec<Pending> = state.queue.drain(..).collect();
            let batch = Arc::new(Batch::coalesce(drained, &shared.counters));
            state.in_flight = Some(batch.clone());
            shared.not_full.notify_all();
            batch
        };

        let failed_before = shared.counters.failed.load(Ordering::Relaxed);
        apply_batch(inner.as_ref(), &shared, &batch, &jobs);
        track_batch_failures(&shared.counters, failed_before);

        let mut state = shared.state.lock();
        state.in_flight = None;
        shared.idle.notify_all();
    }
    debug!("Async store flusher exiting");
}

fn apply_batch(
    inner: &dyn Store,
    shared: &Shared,
    batch: &Batch,
    jobs: &Sender<(Pending, WaitGroup)>,
) {
    if let Some(ctx) = batch.clear {
        apply_pending(
            inner,
            &shared.counters,
            Pending {
                modification: Modification::ClearAll,
                ctx,
            },
        );
    }

    let batch_done = WaitGroup::new();
    for pending in batch.by_key.values() {
        if let Err(channel::SendError((pending, _))) =
            jobs.send((pending.clone(), batch_done.clone()))
        {
            apply_pending(inner, &shared.counters, pending);
        }
    }
    batch_done.wait();
}

fn track_batch_failures(counters: &AsyncCounters, failed_before: u64) {
    if counters.failed.load(Ordering::Relaxed) == failed_before {
        counters.failing_batches.store(0, Ordering::Relaxed);
        return;
    }
    let streak = counters.failing_batches.fetch_add(1, Ordering::Relaxed) + 1;
    if streak >= FAILURE_ESCALATION {
        error!(
            "Async store has failed to flush {} consecutive batches ({} modifications lost so far)",
            streak,
            counters.failed.load(Ordering::Relaxed)
        );
    }
}

impl Store for AsyncStore {
    fn kind(&self) -> &'static str {
        "async"
    }

    fn start(&self) -> StoreResult<()> {
        self.inner.start()?;
        let mut threads = self.threads.lock();
        if threads.is_some() {
            return Ok(());
        }
        let spawned = self.spawn_threads()?;
        {
            let mut state = self.shared.state.lock();
            state.running = true;
            state.stopping = false;
        }
        *threads = Some(spawned);
        info!(
            "Async store started: queue_size={}, threads={}",
            self.config.queue_size, self.config.thread_pool_size
        );
        Ok(())
    }

    fn stop(&self) -> StoreResult<()> {
        let Some(threads) = self.threads.lock().take() else {
            return Ok(());
        };
        {
            let mut state = self.shared.state.lock();
            state.running = false;
            state.stopping = true;
            self.shared.not_empty.notify_all();
            self.shared.not_full.notify_all();
        }

        if threads.done.recv_timeout(self.config.shutdown_timeout).is_err() {
            let pending = self.shared.state.lock().pending_len();
            error!(
                "Async store could not drain {} pending modifications within {:?}",
                pending, self.config.shutdown_timeout
            );
            return Err(StoreError::ShutdownTimeout {
                pending,
                timeout: self.config.shutdown_timeout,
            });
        }

        for handle in std::iter::once(threads.flusher).chain(threads.workers) {
            if handle.join().is_err() {
                warn!("Async store thread panicked during shutdown");
            }
        }
        self.shared.state.lock().stopping = false;
        info!("Async store drained and stopped");
        self.inner.stop()
    }

    fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let pending = self.shared.state.lock().view(key);
        match pending {
            Some(found) => Ok(found.filter(|entry| !entry.is_expired())),
            None => self.inner.load(key),
        }
    }

    fn contains_key(&self, key: &str) -> StoreResult<bool> {
        let pending = self.shared.state.lock().view(key);
        match pending {
            Some(found) => Ok(found.map(|entry| !entry.is_expired()).unwrap_or(false)),
            None => self.inner.contains_key(key),
        }
    }

    /// The wrapped store's entries overlaid with everything still queued.
    fn load_all(&self) -> StoreResult<Vec<CacheEntry>> {
        let (in_flight, queued) = {
            let state = self.shared.state.lock();
            (state.in_flight.clone(), state.queue.clone())
        };

        let mut merged: HashMap<String, CacheEntry> = self
            .inner
            .load_all()?
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();

        let in_flight_mods = in_flight.iter().flat_map(|batch| {
            batch
                .clear
                .map(|_| Modification::ClearAll)
                .into_iter()
                .chain(batch.by_key.values().map(|p| p.modification.clone()))
        });
        for modification in in_flight_mods.chain(queued.into_iter().map(|p| p.modification)) {
            match modification {
                Modification::Write(entry) => {
                    merged.insert(entry.key.clone(), entry);
                }
                Modification::Remove(key) => {
                    merged.remove(&key);
                }
                Modification::ClearAll => merged.clear(),
            }
        }

        let now = current_timestamp_ms();
        Ok(merged
            .into_values()
            .filter(|entry| !entry.is_expired_at(now))
            .collect())
    }

    fn store(&self, entry: CacheEntry, ctx: WriteContext) -> StoreResult<()> {
        self.enqueue(Modification::Write(entry), ctx)
    }

    fn remove(&self, key: &str, ctx: WriteContext) -> StoreResult<bool> {
        let existed = self.contains_key(key)?;
        self.enqueue(Modification::Remove(key.to_string()), ctx)?;
        Ok(existed)
    }

    fn clear(&self, ctx: WriteContext) -> StoreResult<()> {
        self.enqueue(Modification::ClearAll, ctx)
    }

    fn purge_expired(&self) -> StoreResult<usize> {
        self.inner.purge_expired()
    }

    fn prepare(
        &self,
        modifications: Vec<Modification>,
        tx: TxId,
        one_phase: bool,
        ctx: WriteContext,
    ) -> StoreResult<()> {
        self.log
            .prepare(tx, modifications, one_phase, |m| self.enqueue(m, ctx))
    }

    fn commit(&self, tx: TxId, ctx: WriteContext) -> StoreResult<()> {
        self.log.commit(tx, |m| self.enqueue(m, ctx)).map(|_| ())
    }

    fn rollback(&self, tx: TxId) -> StoreResult<()> {
        self.log.rollback(tx);
        Ok(())
    }
}

impl Drop for AsyncStore {
    fn drop(&mut self) {
        if self.threads.get_mut().is_some() {
            if let Err(e) = Store::stop(self) {
                error!("Async store dropped without a clean stop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;
    use std::time::Duration;

    /// Store that sleeps before every write.
    struct SlowStore {
        inner: InMemoryStore,
        delay: Duration,
    }

    impl Store for SlowStore {
        fn kind(&self) -> &'static str {
            "slow"
        }
        fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
            self.inner.load(key)
        }
        fn load_all(&self) -> StoreResult<Vec<CacheEntry>> {
            self.inner.load_all()
        }
        fn store(&self, entry: CacheEntry, ctx: WriteContext) -> StoreResult<()> {
            thread::sleep(self.delay);
            self.inner.store(entry, ctx)
        }
        fn remove(&self, key: &str, ctx: WriteContext) -> StoreResult<bool> {
            thread::sleep(self.delay);
            self.inner.remove(key, ctx)
        }
        fn clear(&self, ctx: WriteContext) -> StoreResult<()> {
            self.inner.clear(ctx)
        }
        fn purge_expired(&self) -> StoreResult<usize> {
            self.inner.purge_expired()
        }
        fn prepare(
            &self,
            modifications: Vec<Modification>,
            tx: TxId,
            one_phase: bool,
            ctx: WriteContext,
        ) -> StoreResult<()> {
            self.inner.prepare(modifications, tx, one_phase, ctx)
        }
        fn commit(&self, tx: TxId, ctx: WriteContext) -> StoreResult<()> {
            self.inner.commit(tx, ctx)
        }
        fn rollback(&self, tx: TxId) -> StoreResult<()> {
            self.inner.rollback(tx)
        }
    }

    fn config() -> AsyncConfig {
        AsyncConfig {
            flush_lock_timeout: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
            queue_size: 1024,
            thread_pool_size: 2,
        }
    }

    fn ctx() -> WriteContext {
        WriteContext::local()
    }

    fn started(inner: Arc<dyn Store>, config: AsyncConfig) -> AsyncStore {
        let store = AsyncStore::new(inner, config);
        store.start().unwrap();
        store
    }

    #[test]
    fn test_everything_enqueued_is_visible_after_stop() {
        let inner = Arc::new(InMemoryStore::new());
        let store = started(inner.clone(), config());

        for i in 0..200 {
            store
                .store(CacheEntry::new(format!("k{}", i), format!("v{}", i)), ctx())
                .unwrap();
        }
        store.remove("k0", ctx()).unwrap();
        store.stop().unwrap();

        assert_eq!(inner.physical_len(), 199);
        assert_eq!(inner.load("k199").unwrap().unwrap().value, "v199");
        assert!(inner.load("k0").unwrap().is_none());
    }

    #[test]
    fn test_reads_see_queued_writes() {
        let inner = Arc::new(SlowStore {
            inner: InMemoryStore::new(),
            delay: Duration::from_millis(30),
        });
        let store = started(inner, config());

        store.store(CacheEntry::new("k", "v1"), ctx()).unwrap();
        store.store(CacheEntry::new("k", "v2"), ctx()).unwrap();
        assert_eq!(store.load("k").unwrap().unwrap().value, "v2");
        assert!(store.contains_key("k").unwrap());

        store.remove("k", ctx()).unwrap();
        assert!(store.load("k").unwrap().is_none());

        store.store(CacheEntry::new("other", "x"), ctx()).unwrap();
        store.clear(ctx()).unwrap();
        assert!(store.load("other").unwrap().is_none());
        assert!(store.load_all().unwrap().is_empty());
        store.stop().unwrap();
    }

    #[test]
    fn test_last_write_wins_and_clear_supersedes() {
        let inner = Arc::new(InMemoryStore::new());
        let store = started(inner.clone(), config());

        store.store(CacheEntry::new("a", "1"), ctx()).unwrap();
        store.clear(ctx()).unwrap();
        store.store(CacheEntry::new("b", "1"), ctx()).unwrap();
        store.store(CacheEntry::new("b", "2"), ctx()).unwrap();
        store.stop().unwrap();

        assert!(inner.load("a").unwrap().is_none());
        assert_eq!(inner.load("b").unwrap().unwrap().value, "2");
    }

    #[test]
    fn test_full_queue_applies_backpressure() {
        let inner = Arc::new(SlowStore {
            inner: InMemoryStore::new(),
            delay: Duration::from_millis(300),
        });
        let store = started(
            inner,
            AsyncConfig {
                queue_size: 1,
                thread_pool_size: 1,
                flush_lock_timeout: Duration::from_millis(20),
                shutdown_timeout: Duration::from_secs(5),
            },
        );

        // first write is drained into the slow in-flight batch, the second
        // fills the queue, the third has nowhere to go
        store.store(CacheEntry::new("a", "1"), ctx()).unwrap();
        thread::sleep(Duration::from_millis(50));
        store.store(CacheEntry::new("b", "1"), ctx()).unwrap();
        let result = store.store(CacheEntry::new("c", "1"), ctx());

        assert!(matches!(result, Err(StoreError::Backpressure(_))));
        assert_eq!(store.stats().rejected, 1);
        store.stop().unwrap();
    }

    #[test]
    fn test_stop_times_out_when_drain_is_too_slow() {
        let inner = Arc::new(SlowStore {
            inner: InMemoryStore::new(),
            delay: Duration::from_millis(200),
        });
        let store = started(
            inner,
            AsyncConfig {
                shutdown_timeout: Duration::from_millis(50),
                thread_pool_size: 1,
                ..config()
            },
        );
        for i in 0..5 {
            store
                .store(CacheEntry::new(format!("k{}", i), "v"), ctx())
                .unwrap();
        }

        let result = store.stop();
        assert!(matches!(result, Err(StoreError::ShutdownTimeout { .. })));
    }

    #[test]
    fn test_writes_after_stop_are_rejected() {
        let store = started(Arc::new(InMemoryStore::new()), config());
        store.stop().unwrap();

        let result = store.store(CacheEntry::new("k", "v"), ctx());
        assert!(matches!(result, Err(StoreError::NotRunning)));
    }

    #[test]
    fn test_restart_after_stop() {
        let inner = Arc::new(InMemoryStore::new());
        let store = started(inner.clone(), config());
        store.stop().unwrap();
        store.start().unwrap();

        store.store(CacheEntry::new("k", "v"), ctx()).unwrap();
        store.flush().unwrap();
        assert!(inner.contains_key("k").unwrap());
        store.stop().unwrap();
    }

    #[test]
    fn test_two_phase_is_enqueued_at_commit() {
        let inner = Arc::new(InMemoryStore::new());
        let store = started(inner.clone(), config());
        let tx = TxId::new();

        store
            .prepare(
                vec![
                    Modification::Write(CacheEntry::new("k1", "v1")),
                    Modification::Write(CacheEntry::new("k2", "v2")),
                    Modification::Remove("k1".into()),
                ],
                tx,
                false,
                ctx(),
            )
            .unwrap();
        store.flush().unwrap();
        assert_eq!(inner.physical_len(), 0);

        store.commit(tx, ctx()).unwrap();
        store.commit(tx, ctx()).unwrap();
        store.stop().unwrap();

        let all = inner.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "k2");
    }

    #[test]
    fn test_coalescing_counts() {
        let counters = AsyncCounters::default();
        let w = |k: &str, v: &str| Pending {
            modification: Modification::Write(CacheEntry::new(k, v)),
            ctx: WriteContext::local(),
        };
        let batch = Batch::coalesce(
            vec![
                w("a", "1"),
                w("a", "2"),
                w("b", "1"),
                Pending {
                    modification: Modification::ClearAll,
                    ctx: WriteContext::local(),
                },
                w("c", "1"),
            ],
            &counters,
        );

        assert!(batch.clear.is_some());
        assert_eq!(batch.by_key.len(), 1);
        assert!(batch.by_key.contains_key("c"));
        // a overwritten once, then a and b dropped by the clear
        assert_eq!(counters.coalesced.load(Ordering::Relaxed), 3);
    }
}
