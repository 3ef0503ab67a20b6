//! Property-Based Tests for the cache node and its persistence tier
//!
//! Uses proptest to check container behavior, and that the store decorators
//! are observationally equivalent to applying operations directly.

use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheEntry, DataContainer, MAX_KEY_LENGTH, MAX_VALUE_SIZE};
use crate::config::Config;
use crate::persistence::{
    apply_modification, AsyncConfig, AsyncStore, ChainingStore, InMemoryStore, Modification,
    Store, StoreConfig, StoreKind, TxId, WriteContext,
};

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 100;

// == Strategies ==
/// Generates valid cache keys (non-empty, within length limit)
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,64}".prop_map(|s| s)
}

/// Generates valid cache values (within size limit)
fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,256}".prop_map(|s| s)
}

/// Keys from a small alphabet so operations collide often
fn small_key_strategy() -> impl Strategy<Value = String> {
    "[a-e]".prop_map(|s| s)
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

fn small_cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (small_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        small_key_strategy().prop_map(|key| CacheOp::Get { key }),
        small_key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

/// Modifications over a small key set, with the occasional clear
fn modification_strategy() -> impl Strategy<Value = Modification> {
    prop_oneof![
        6 => (small_key_strategy(), valid_value_strategy())
            .prop_map(|(k, v)| Modification::Write(CacheEntry::new(k, v))),
        3 => small_key_strategy().prop_map(Modification::Remove),
        1 => Just(Modification::ClearAll),
    ]
}

/// Live contents of a store as key -> value.
fn contents(store: &dyn Store) -> BTreeMap<String, String> {
    store
        .load_all()
        .unwrap()
        .into_iter()
        .map(|e| (e.key, e.value))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Property: hits and misses count exactly the gets that found or missed
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let mut container = DataContainer::new(TEST_MAX_ENTRIES);
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    let _ = container.put(CacheEntry::new(key, value));
                }
                CacheOp::Get { key } => match container.get(&key) {
                    Ok(_) => expected_hits += 1,
                    Err(_) => expected_misses += 1,
                },
                CacheOp::Delete { key } => {
                    container.remove(&key);
                }
            }
        }

        let stats = container.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries, container.len(), "Total entries mismatch");
    }

    // Property: the container never holds more than its capacity, and every
    // eviction hands back exactly one entry
    #[test]
    fn prop_capacity_enforcement(
        entries in prop::collection::vec(
            (valid_key_strategy(), valid_value_strategy()),
            1..200
        )
    ) {
        let max_entries = 50;
        let mut container = DataContainer::new(max_entries);
        let mut evictions = 0u64;

        for (key, value) in entries {
            if container.put(CacheEntry::new(key, value)).unwrap().is_some() {
                evictions += 1;
            }
            prop_assert!(
                container.len() <= max_entries,
                "Container size {} exceeds max {}",
                container.len(),
                max_entries
            );
        }
        prop_assert_eq!(container.stats().evictions, evictions);
    }

    // Property: when full, a new key evicts the least recently used entry
    #[test]
    fn prop_lru_eviction_order(
        initial_keys in prop::collection::vec(valid_key_strategy(), 3..10),
        new_key in valid_key_strategy(),
        new_value in valid_value_strategy()
    ) {
        let mut seen = HashSet::new();
        let unique_keys: Vec<String> = initial_keys
            .into_iter()
            .filter(|k| seen.insert(k.clone()))
            .collect();
        prop_assume!(unique_keys.len() >= 2);
        prop_assume!(!unique_keys.contains(&new_key));

        let mut container = DataContainer::new(unique_keys.len());
        for key in &unique_keys {
            container.put(CacheEntry::new(key.clone(), "v")).unwrap();
        }
        // touching the first key makes the second the eviction candidate
        container.get(&unique_keys[0]).unwrap();

        let evicted = container.put(CacheEntry::new(new_key.clone(), new_value)).unwrap();
        prop_assert_eq!(evicted.map(|e| e.key), Some(unique_keys[1].clone()));
        prop_assert!(container.contains_key(&unique_keys[0]));
        prop_assert!(container.contains_key(&new_key));
    }

    // Property: committing a two-phase transaction leaves the store exactly as
    // applying the same modifications one by one
    #[test]
    fn prop_two_phase_commit_equals_direct_application(
        mods in prop::collection::vec(modification_strategy(), 0..30)
    ) {
        let direct = InMemoryStore::new();
        for m in mods.clone() {
            apply_modification(&direct, m, WriteContext::local()).unwrap();
        }

        let staged = InMemoryStore::new();
        let tx = TxId::new();
        staged.prepare(mods, tx, false, WriteContext::local()).unwrap();
        prop_assert_eq!(staged.physical_len(), 0);
        staged.commit(tx, WriteContext::local()).unwrap();

        prop_assert_eq!(contents(&staged), contents(&direct));
    }

    // Property: a chain answers every read with the earliest store holding the key
    #[test]
    fn prop_chain_read_order(placement in prop::collection::vec(0u8..4, 1..20)) {
        let a = Arc::new(InMemoryStore::new());
        let b = Arc::new(InMemoryStore::new());
        for (i, where_) in placement.iter().enumerate() {
            let key = format!("k{}", i);
            if where_ & 1 != 0 {
                a.store(CacheEntry::new(key.clone(), "a"), WriteContext::local()).unwrap();
            }
            if where_ & 2 != 0 {
                b.store(CacheEntry::new(key, "b"), WriteContext::local()).unwrap();
            }
        }
        let chain = ChainingStore::new(vec![
            a.clone() as Arc<dyn Store>,
            b.clone() as Arc<dyn Store>,
        ]);

        for (i, where_) in placement.iter().enumerate() {
            let found = chain.load(&format!("k{}", i)).unwrap().map(|e| e.value);
            let expected = match *where_ {
                0 => None,
                2 => Some("b".to_string()),
                _ => Some("a".to_string()),
            };
            prop_assert_eq!(found, expected);
        }
    }
}

// Fewer cases: every case spins up write-behind threads
proptest! {
    #![proptest_config(ProptestConfig::with_cases(25))]

    // Property: after stop, a write-behind store holds exactly what sequential
    // application of the same modifications would produce
    #[test]
    fn prop_async_coalescing_equals_sequential(
        mods in prop::collection::vec(modification_strategy(), 1..60),
        threads in 1usize..4
    ) {
        let direct = InMemoryStore::new();
        for m in mods.clone() {
            apply_modification(&direct, m, WriteContext::local()).unwrap();
        }

        let behind = Arc::new(InMemoryStore::new());
        let store = AsyncStore::new(
            behind.clone() as Arc<dyn Store>,
            AsyncConfig {
                thread_pool_size: threads,
                queue_size: 16,
                flush_lock_timeout: Duration::from_secs(5),
                shutdown_timeout: Duration::from_secs(5),
            },
        );
        store.start().unwrap();
        for m in mods {
            apply_modification(&store, m, WriteContext::local()).unwrap();
        }
        // reads through the decorator agree before anything is flushed
        prop_assert_eq!(contents(&store), contents(&direct));
        store.stop().unwrap();

        prop_assert_eq!(contents(behind.as_ref()), contents(&direct));
    }

    // Property: with passivation on, every written key lives in memory or in
    // the store, never both
    #[test]
    fn prop_passivation_exclusivity(
        ops in prop::collection::vec(small_cache_op_strategy(), 1..40),
        capacity in 1usize..4
    ) {
        let config = Config {
            max_entries: capacity,
            store: StoreConfig {
                passivation: true,
                ..StoreConfig::with_store(StoreKind::InMemory { name: None })
            },
            ..Config::default()
        };
        let cache = Cache::new(&config, None).unwrap();
        cache.start().unwrap();
        let root = cache.persistence().stack().root().unwrap().clone();

        let mut live: HashSet<String> = HashSet::new();
        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    cache.put(&key, &value, None).unwrap();
                    live.insert(key);
                }
                CacheOp::Get { key } => {
                    let _ = cache.get(&key);
                }
                CacheOp::Delete { key } => {
                    let _ = cache.delete(&key);
                    live.remove(&key);
                }
            }
            for key in ["a", "b", "c", "d", "e"] {
                let in_memory = cache.entries().iter().any(|e| e.key == key);
                let in_store = root.contains_key(key).unwrap();
                prop_assert!(!(in_memory && in_store), "'{}' is in memory and store", key);
                prop_assert_eq!(in_memory || in_store, live.contains(key));
            }
        }
    }
}

// == Property Test for Error Response Format ==
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Property: every error maps to a JSON body with a string "error" field
    #[test]
    fn prop_error_response_format(
        error_msg in "[a-zA-Z0-9 _-]{1,100}"
    ) {
        use crate::error::{CacheError, StoreError};
        use axum::response::IntoResponse;
        use axum::body::to_bytes;

        let error_variants = vec![
            CacheError::NotFound(error_msg.clone()),
            CacheError::Expired(error_msg.clone()),
            CacheError::InvalidRequest(error_msg.clone()),
            CacheError::CacheFull(error_msg.clone()),
            CacheError::UnknownTransaction(error_msg.clone()),
            CacheError::Store(StoreError::ConfigMismatch(error_msg.clone())),
            CacheError::Internal(error_msg.clone()),
        ];

        let rt = tokio::runtime::Runtime::new().unwrap();
        for error in error_variants {
            let expected_msg = error.to_string();
            let response = error.into_response();

            let content_type = response.headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok());
            prop_assert!(
                content_type.map(|ct| ct.contains("application/json")).unwrap_or(false),
                "Response should have JSON content-type"
            );

            let bytes = rt.block_on(async {
                to_bytes(response.into_body(), usize::MAX).await.unwrap()
            });
            let json: serde_json::Value = serde_json::from_slice(&bytes)
                .expect("Response body should be valid JSON");

            let error_value = json.get("error");
            prop_assert!(error_value.map(|v| v.is_string()).unwrap_or(false));
            prop_assert_eq!(error_value.and_then(|v| v.as_str()), Some(expected_msg.as_str()));
        }
    }
}

// == Additional Unit Tests for Edge Cases ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_validation() {
        let cache = Cache::new(&Config::default(), None).unwrap();
        let long_key = "x".repeat(MAX_KEY_LENGTH + 1);

        assert!(cache.put(&long_key, "value", None).is_err());
    }

    #[test]
    fn test_value_size_validation() {
        let cache = Cache::new(&Config::default(), None).unwrap();
        let large_value = "x".repeat(MAX_VALUE_SIZE + 1);

        assert!(cache.put("key", &large_value, None).is_err());
    }

    #[test]
    fn test_error_status_codes() {
        use crate::error::CacheError;
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let test_cases = vec![
            (CacheError::NotFound("key".to_string()), StatusCode::NOT_FOUND),
            (CacheError::Expired("key".to_string()), StatusCode::NOT_FOUND),
            (CacheError::UnknownTransaction("tx".to_string()), StatusCode::NOT_FOUND),
            (CacheError::InvalidRequest("bad".to_string()), StatusCode::BAD_REQUEST),
            (CacheError::CacheFull("full".to_string()), StatusCode::SERVICE_UNAVAILABLE),
            (CacheError::Internal("error".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected_status) in test_cases {
            let response = error.into_response();
            assert_eq!(
                response.status(),
                expected_status,
                "Error should map to correct HTTP status"
            );
        }
    }
}
