//! Lock Container
//!
//! Per-key exclusive locks for stores whose read-modify-write sequences are
//! not atomic on their own. Locks exist only while held, so
//! [`LockContainer::locks_held`] drops back to zero once every guard is gone.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};

/// FNV-1a of `key`. Stable across processes, so it also names file buckets.
pub fn lock_id(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Table of currently held lock ids.
#[derive(Debug, Default)]
pub struct LockContainer {
    held: Mutex<HashSet<u64>>,
    released: Condvar,
}

/// Releases its lock id on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    container: &'a LockContainer,
    id: u64,
}

impl LockContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `id` is free, then takes it.
    ///
    /// Callers holding different ids never wait on each other.
    pub fn acquire(&self, id: u64) -> LockGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(&id) {
            self.released.wait(&mut held);
        }
        held.insert(id);
        LockGuard {
            container: self,
            id,
        }
    }

    /// Takes the lock for `key`.
    pub fn acquire_key(&self, key: &str) -> LockGuard<'_> {
        self.acquire(lock_id(key))
    }

    /// Number of locks currently held.
    pub fn locks_held(&self) -> usize {
        self.held.lock().len()
    }

    fn release(&self, id: u64) {
        self.held.lock().remove(&id);
        self.released.notify_all();
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.container.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = LockContainer::new();
        {
            let _a = locks.acquire(1);
            let _b = locks.acquire(2);
            assert_eq!(locks.locks_held(), 2);
        }
        assert_eq!(locks.locks_held(), 0);
    }

    #[test]
    fn test_same_id_waits_for_release() {
        let locks = Arc::new(LockContainer::new());
        let acquired = Arc::new(AtomicBool::new(false));

        let guard = locks.acquire(7);
        let handle = {
            let locks = locks.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let _g = locks.acquire(7);
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(guard);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(locks.locks_held(), 0);
    }

    #[test]
    fn test_different_ids_do_not_block() {
        let locks = Arc::new(LockContainer::new());
        let _held = locks.acquire(1);

        let other = locks.clone();
        thread::spawn(move || {
            let _g = other.acquire(2);
        })
        .join()
        .unwrap();

        assert_eq!(locks.locks_held(), 1);
    }
}
