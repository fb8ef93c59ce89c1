//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the store against sequences of operations.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::{CacheEntry, CacheStore, Fingerprint};
use crate::routing::RouteKey;

// == Test Configuration ==
const TEST_MAX_SIZE: u64 = 64 * 1024;

// == Helpers ==
fn key(path: &str) -> RouteKey {
    RouteKey::new(path, &HashMap::new())
}

/// Writes a shared origin file; every entry in a case is fingerprinted to it.
fn origin(dir: &Path) -> (PathBuf, Fingerprint) {
    let path = dir.join("origin.html");
    std::fs::write(&path, b"origin").unwrap();
    let fingerprint = Fingerprint::from_metadata(&std::fs::metadata(&path).unwrap());
    (path, fingerprint)
}

fn entry(origin: &(PathBuf, Fingerprint), body: &str) -> CacheEntry {
    CacheEntry::new(body.to_string(), "text/html", origin.0.clone(), origin.1)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

// == Strategies ==
/// Generates route paths
fn path_strategy() -> impl Strategy<Value = String> {
    "/[a-z0-9]{1,12}(\\.html)?"
}

/// Generates payload bodies
fn body_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,256}"
}

#[derive(Debug, Clone)]
enum CacheOp {
    Put { path: String, body: String },
    Get { path: String },
    Invalidate { path: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (path_strategy(), body_strategy()).prop_map(|(path, body)| CacheOp::Put { path, body }),
        path_strategy().prop_map(|path| CacheOp::Get { path }),
        path_strategy().prop_map(|path| CacheOp::Invalidate { path }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Hits and misses reported by the store match what callers observed.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let dir = tempfile::tempdir().unwrap();
        let origin = origin(dir.path());
        let store = CacheStore::in_memory(TEST_MAX_SIZE);
        let mut expected_hits = 0u64;
        let mut expected_misses = 0u64;

        tokio_test::block_on(async {
            for op in ops {
                match op {
                    CacheOp::Put { path, body } => {
                        store.put(key(&path), entry(&origin, &body)).await.unwrap();
                    }
                    CacheOp::Get { path } => match store.get(&key(&path)).await {
                        Some(_) => expected_hits += 1,
                        None => expected_misses += 1,
                    },
                    CacheOp::Invalidate { path } => {
                        store.invalidate(&key(&path)).await;
                    }
                }
            }
        });

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        prop_assert_eq!(stats.total_entries, store.len());
    }

    // A stored entry reads back byte for byte while its origin is unchanged.
    #[test]
    fn prop_roundtrip_storage(path in path_strategy(), body in body_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        let origin = origin(dir.path());
        let store = CacheStore::in_memory(TEST_MAX_SIZE);

        let cached = tokio_test::block_on(async {
            store.put(key(&path), entry(&origin, &body)).await.unwrap();
            store.get(&key(&path)).await
        });

        prop_assert_eq!(cached.map(|e| e.payload), Some(Bytes::from(body)));
    }

    // After invalidation a lookup misses.
    #[test]
    fn prop_invalidate_removes_entry(path in path_strategy(), body in body_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        let origin = origin(dir.path());
        let store = CacheStore::in_memory(TEST_MAX_SIZE);

        let (existed, after) = tokio_test::block_on(async {
            store.put(key(&path), entry(&origin, &body)).await.unwrap();
            let existed = store.invalidate(&key(&path)).await;
            (existed, store.get(&key(&path)).await)
        });

        prop_assert!(existed);
        prop_assert!(after.is_none());
        prop_assert_eq!(store.total_bytes(), 0);
    }

    // The second put for a key wins and leaves exactly one entry.
    #[test]
    fn prop_overwrite_semantics(
        path in path_strategy(),
        first in body_strategy(),
        second in body_strategy()
    ) {
        let dir = tempfile::tempdir().unwrap();
        let origin = origin(dir.path());
        let store = CacheStore::in_memory(TEST_MAX_SIZE);

        let cached = tokio_test::block_on(async {
            store.put(key(&path), entry(&origin, &first)).await.unwrap();
            store.put(key(&path), entry(&origin, &second)).await.unwrap();
            store.get(&key(&path)).await
        });

        prop_assert_eq!(cached.map(|e| e.payload), Some(Bytes::from(second.clone())));
        prop_assert_eq!(store.len(), 1);
        prop_assert_eq!(store.total_bytes(), second.len() as u64);
    }

    // Sequential puts never leave the aggregate size above the bound.
    #[test]
    fn prop_size_bound_enforced(
        entries in prop::collection::vec((path_strategy(), body_strategy()), 1..100)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let origin = origin(dir.path());
        let bound = 1024;
        let store = CacheStore::in_memory(bound);

        tokio_test::block_on(async {
            for (path, body) in entries {
                store.put(key(&path), entry(&origin, &body)).await.unwrap();
                assert!(
                    store.total_bytes() <= bound,
                    "cache holds {} bytes, bound is {}",
                    store.total_bytes(),
                    bound
                );
            }
        });
    }

    // Rewriting the origin makes every entry derived from it stale.
    #[test]
    fn prop_origin_change_invalidates(
        paths in prop::collection::hash_set(path_strategy(), 1..10)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let origin = origin(dir.path());
        let store = CacheStore::in_memory(TEST_MAX_SIZE);

        tokio_test::block_on(async {
            for path in &paths {
                store.put(key(path), entry(&origin, "cached")).await.unwrap();
            }
        });
        std::fs::write(&origin.0, b"a longer replacement body").unwrap();

        tokio_test::block_on(async {
            for path in &paths {
                assert!(store.get(&key(path)).await.is_none());
            }
        });
        prop_assert_eq!(store.len(), 0);
        prop_assert_eq!(store.stats().stale, paths.len() as u64);
    }
}

// Property tests for LRU eviction behavior
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // With equal-sized entries filling the bound, one more put evicts the
    // least recently inserted key and nothing else.
    #[test]
    fn prop_lru_eviction_order(
        paths in prop::collection::vec(path_strategy(), 3..10),
        new_path in path_strategy()
    ) {
        let mut seen = HashSet::new();
        let unique: Vec<String> = paths.into_iter().filter(|p| seen.insert(key(p))).collect();
        prop_assume!(unique.len() >= 2);
        prop_assume!(!seen.contains(&key(&new_path)));

        let dir = tempfile::tempdir().unwrap();
        let origin = origin(dir.path());
        let store = CacheStore::in_memory(10 * unique.len() as u64);

        tokio_test::block_on(async {
            for path in &unique {
                store.put(key(path), entry(&origin, "0123456789")).await.unwrap();
            }
            store.put(key(&new_path), entry(&origin, "0123456789")).await.unwrap();

            assert!(store.get(&key(&unique[0])).await.is_none(), "oldest survives");
            assert!(store.get(&key(&new_path)).await.is_some());
            for path in unique.iter().skip(1) {
                assert!(store.get(&key(path)).await.is_some(), "{} evicted", path);
            }
        });
        prop_assert_eq!(store.len(), unique.len());
    }

    // Reading an entry moves it to the back of the eviction line.
    #[test]
    fn prop_lru_access_tracking(
        paths in prop::collection::vec(path_strategy(), 3..8),
        new_path in path_strategy()
    ) {
        let mut seen = HashSet::new();
        let unique: Vec<String> = paths.into_iter().filter(|p| seen.insert(key(p))).collect();
        prop_assume!(unique.len() >= 3);
        prop_assume!(!seen.contains(&key(&new_path)));

        let dir = tempfile::tempdir().unwrap();
        let origin = origin(dir.path());
        let store = CacheStore::in_memory(10 * unique.len() as u64);

        tokio_test::block_on(async {
            for path in &unique {
                store.put(key(path), entry(&origin, "0123456789")).await.unwrap();
            }
            assert!(store.get(&key(&unique[0])).await.is_some());
            store.put(key(&new_path), entry(&origin, "0123456789")).await.unwrap();

            assert!(store.get(&key(&unique[0])).await.is_some());
            assert!(store.get(&key(&unique[1])).await.is_none());
        });
    }
}

// == Property Test for Concurrent Operation Correctness ==
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Concurrent readers only ever see a complete payload that some writer
    // stored for that key, and the index agrees with the byte count afterwards.
    #[test]
    fn prop_concurrent_operation_correctness(
        operations in prop::collection::vec(cache_op_strategy(), 10..60)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(origin(dir.path()));
        let store = Arc::new(CacheStore::in_memory(4 * 1024));

        let mut written: HashMap<RouteKey, HashSet<Bytes>> = HashMap::new();
        for op in &operations {
            if let CacheOp::Put { path, body } = op {
                written.entry(key(path)).or_default().insert(Bytes::from(body.clone()));
            }
        }
        let written = Arc::new(written);

        let rt = runtime();
        let result: Result<(), String> = rt.block_on(async {
            let mut handles = Vec::new();
            for op in operations {
                let store = Arc::clone(&store);
                let origin = Arc::clone(&origin);
                let written = Arc::clone(&written);
                handles.push(tokio::spawn(async move {
                    match op {
                        CacheOp::Put { path, body } => {
                            store.put(key(&path), entry(&origin, &body)).await.map(|_| ()).map_err(|e| e.to_string())
                        }
                        CacheOp::Get { path } => {
                            let k = key(&path);
                            match store.get(&k).await {
                                Some(e) if !written.get(&k).is_some_and(|w| w.contains(&e.payload)) => {
                                    Err(format!("{} returned a payload never written", path))
                                }
                                _ => Ok(()),
                            }
                        }
                        CacheOp::Invalidate { path } => {
                            store.invalidate(&key(&path)).await;
                            Ok(())
                        }
                    }
                }));
            }
            for handle in handles {
                handle.await.map_err(|e| e.to_string())??;
            }
            Ok(())
        });

        prop_assert!(result.is_ok(), "{:?}", result);
        let stats = store.stats();
        prop_assert_eq!(stats.total_entries, store.len());
        prop_assert!(stats.hit_rate() >= 0.0 && stats.hit_rate() <= 1.0);
    }
}
