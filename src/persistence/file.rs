//! File Store
//!
//! Persists entries in a directory of hash buckets. Each bucket is one JSON
//! file holding every entry whose key hashes to it; every bucket access runs
//! under that bucket's lock so read-modify-write sequences stay atomic while
//! operations on other buckets proceed in parallel.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{
    apply_modification, lock_id, LockContainer, Modification, ModificationLog, Store, StoreStats,
    TxId, WriteContext,
};
use crate::cache::{current_timestamp_ms, CacheEntry};
use crate::error::{StoreError, StoreResult};

const BUCKET_EXTENSION: &str = "bucket";

// == File Store ==
#[derive(Debug)]
pub struct FileStore {
    location: PathBuf,
    locks: LockContainer,
    log: ModificationLog,
    stats: StoreStats,
}

impl FileStore {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            locks: LockContainer::new(),
            log: ModificationLog::new(),
            stats: StoreStats::new(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Number of bucket locks currently held; zero between operations.
    pub fn locks_held(&self) -> usize {
        self.locks.locks_held()
    }

    fn bucket_path(&self, id: u64) -> PathBuf {
        self.location.join(format!("{:016x}.{}", id, BUCKET_EXTENSION))
    }

    fn read_bucket(&self, id: u64) -> StoreResult<Vec<CacheEntry>> {
        match fs::read(self.bucket_path(id)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_bucket(&self, id: u64, entries: &[CacheEntry]) -> StoreResult<()> {
        let path = self.bucket_path(id);
        if entries.is_empty() {
            return match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(entries)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Ids of every bucket file currently on disk.
    fn bucket_ids(&self) -> StoreResult<Vec<u64>> {
        let mut ids = Vec::new();
        for dir_entry in fs::read_dir(&self.location)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BUCKET_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| u64::from_str_radix(s, 16).ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

impl Store for FileStore {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn start(&self) -> StoreResult<()> {
        if self.location.exists() && !self.location.is_dir() {
            return Err(StoreError::ConfigMismatch(format!(
                "file store location {} is not a directory",
                self.location.display()
            )));
        }
        fs::create_dir_all(&self.location)?;
        info!("File store started at {}", self.location.display());
        Ok(())
    }

    fn load(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let id = lock_id(key);
        let _lock = self.locks.acquire(id);
        let found = self
            .read_bucket(id)?
            .into_iter()
            .find(|entry| entry.key == key && !entry.is_expired());
        self.stats.record_load(found.is_some());
        Ok(found)
    }

    fn load_all(&self) -> StoreResult<Vec<CacheEntry>> {
        let now = current_timestamp_ms();
        let mut all = Vec::new();
        for id in self.bucket_ids()? {
            let _lock = self.locks.acquire(id);
            all.extend(
                self.read_bucket(id)?
                    .into_iter()
                    .filter(|entry| !entry.is_expired_at(now)),
            );
        }
        Ok(all)
    }

    fn store(&self, entry: CacheEntry, _ctx: WriteContext) -> StoreResult<()> {
        let id = lock_id(&entry.key);
        let _lock = self.locks.acquire(id);
        let mut bucket = self.read_bucket(id)?;
        match bucket.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => *existing = entry,
            None => bucket.push(entry),
        }
        self.write_bucket(id, &bucket)?;
        self.stats.record_write();
        Ok(())
    }

    fn remove(&self, key: &str, _ctx: WriteContext) -> StoreResult<bool> {
        let id = lock_id(key);
        let _lock = self.locks.acquire(id);
        let mut bucket = self.read_bucket(id)?;
        let before = bucket.len();
        bucket.retain(|entry| entry.key != key);
        let removed = bucket.len() != before;
        if removed {
            self.write_bucket(id, &bucket)?;
        }
        self.stats.record_remove();
        Ok(removed)
    }

    fn clear(&self, _ctx: WriteContext) -> StoreResult<()> {
        for id in self.bucket_ids()? {
            let _lock = self.locks.acquire(id);
            self.write_bucket(id, &[])?;
        }
        self.stats.record_clear();
        Ok(())
    }

    fn purge_expired(&self) -> StoreResult<usize> {
        let now = current_timestamp_ms();
        let mut purged = 0;
        for id in self.bucket_ids()? {
            let _lock = self.locks.acquire(id);
            let mut bucket = self.read_bucket(id)?;
            let before = bucket.len();
            bucket.retain(|entry| !entry.is_expired_at(now));
            if bucket.len() != before {
                purged += before - bucket.len();
                self.write_bucket(id, &bucket)?;
            }
        }
        if purged > 0 {
            debug!("File store purged {} expired entries", purged);
        }
        self.stats.record_purged(purged);
        Ok(purged)
    }

    fn prepare(
        &self,
        modifications: Vec<Modification>,
        tx: TxId,
        one_phase: bool,
        ctx: WriteContext,
    ) -> StoreResult<()> {
        self.log.prepare(tx, modifications, one_phase, |m| {
            apply_modification(self, m, ctx)
        })
    }

    fn commit(&self, tx: TxId, ctx: WriteContext) -> StoreResult<()> {
        self.log
            .commit(tx, |m| apply_modification(self, m, ctx))
            .map(|_| ())
    }

    fn rollback(&self, tx: TxId) -> StoreResult<()> {
        self.log.rollback(tx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn started_store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("store"));
        store.start().unwrap();
        (dir, store)
    }

    fn ctx() -> WriteContext {
        WriteContext::local()
    }

    #[test]
    fn test_store_load_remove_leave_no_locks() {
        let (_dir, store) = started_store();

        store.store(CacheEntry::new("k", "v"), ctx()).unwrap();
        assert_eq!(store.locks_held(), 0);
        assert_eq!(store.load("k").unwrap().unwrap().value, "v");
        assert_eq!(store.locks_held(), 0);
        assert!(store.contains_key("k").unwrap());
        assert_eq!(store.locks_held(), 0);
        assert!(store.remove("k", ctx()).unwrap());
        assert_eq!(store.locks_held(), 0);
        assert!(!store.remove("k", ctx()).unwrap());
        assert!(store.load("k").unwrap().is_none());
        assert_eq!(store.locks_held(), 0);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let (dir, store) = started_store();
        store.store(CacheEntry::new("a", "1"), ctx()).unwrap();
        store.store(CacheEntry::new("b", "2"), ctx()).unwrap();
        drop(store);

        let reopened = FileStore::new(dir.path().join("store"));
        reopened.start().unwrap();
        let mut keys: Vec<String> = reopened.load_all().unwrap().into_iter().map(|e| e.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_overwrite_replaces_entry() {
        let (_dir, store) = started_store();
        store.store(CacheEntry::new("k", "v1"), ctx()).unwrap();
        store.store(CacheEntry::new("k", "v2"), ctx()).unwrap();

        assert_eq!(store.load_all().unwrap().len(), 1);
        assert_eq!(store.load("k").unwrap().unwrap().value, "v2");
    }

    #[test]
    fn test_clear_and_purge() {
        let (_dir, store) = started_store();
        let mut expired = CacheEntry::new("old", "x").with_lifespan(Some(Duration::from_millis(1)));
        expired.created_at -= 1_000;
        store.store(expired, ctx()).unwrap();
        store.store(CacheEntry::new("live", "y"), ctx()).unwrap();

        assert!(store.load("old").unwrap().is_none());
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.purge_expired().unwrap(), 0);
        assert_eq!(store.load_all().unwrap().len(), 1);

        store.clear(ctx()).unwrap();
        assert!(store.load_all().unwrap().is_empty());
        assert_eq!(store.locks_held(), 0);
    }

    #[test]
    fn test_start_rejects_plain_file_location() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-dir");
        fs::write(&path, b"x").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(store.start(), Err(StoreError::ConfigMismatch(_))));
    }

    #[test]
    fn test_corrupt_bucket_is_serialization_error() {
        let (_dir, store) = started_store();
        fs::write(store.bucket_path(lock_id("k")), b"not json").unwrap();

        assert!(matches!(store.load("k"), Err(StoreError::Serialization(_))));
        assert_eq!(store.locks_held(), 0);
    }

    #[test]
    fn test_concurrent_writers_on_distinct_keys() {
        let (_dir, store) = started_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..20 {
                        store
                            .store(CacheEntry::new(format!("t{}-k{}", t, i), "v"), WriteContext::local())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load_all().unwrap().len(), 160);
        assert_eq!(store.locks_held(), 0);
    }

    #[test]
    fn test_two_phase_transaction() {
        let (_dir, store) = started_store();
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
        assert!(store.load_all().unwrap().is_empty());

        store.commit(tx, ctx()).unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "k2");
        assert_eq!(store.locks_held(), 0);
    }
}
