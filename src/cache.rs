// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Result Cache
 * Fingerprint keyed LRU cache of extracted values with single-flight loading
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::errors::{CacheError, EngineError, EngineResult};
use crate::types::{ExtractedValue, Query};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stable hash of an injection point identity and a normalized query
pub fn fingerprint(point_id: &str, query: &Query) -> String {
    let mut hasher = Sha256::new();
    hasher.update(point_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(query.normalized().as_bytes());
    hex::encode(hasher.finalize())
}

/// Immutable once written; only the hit counter moves
#[derive(Debug)]
pub struct CacheEntry {
    pub value: ExtractedValue,
    pub created_at: DateTime<Utc>,
    hits: AtomicU64,
}

impl CacheEntry {
    pub fn new(value: ExtractedValue) -> Self {
        Self::with_timestamp(value, Utc::now())
    }

    pub fn with_timestamp(value: ExtractedValue, created_at: DateTime<Utc>) -> Self {
        Self {
            value,
            created_at,
            hits: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct ResultCacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    conflicts: AtomicU64,
}

impl ResultCacheMetrics {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> ResultCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        ResultCacheStats {
            hits,
            misses,
            inserts: self.inserts.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub conflicts: u64,
    pub hit_rate: f64,
}

/// Size bounded, least-recently-used, no time based expiry. Loading goes
/// through moka's per-key coalescing, so concurrent requests for one
/// fingerprint share a single computation and unrelated keys never wait
/// on each other.
pub struct ResultCache {
    cache: Cache<String, Arc<CacheEntry>>,
    metrics: Arc<ResultCacheMetrics>,
}

impl ResultCache {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        info!("Initialized result cache: capacity={}", max_capacity);

        Self {
            cache,
            metrics: Arc::new(ResultCacheMetrics::new()),
        }
    }

    pub async fn lookup(&self, fingerprint: &str) -> Option<ExtractedValue> {
        match self.cache.get(fingerprint).await {
            Some(entry) => {
                entry.record_hit();
                self.metrics.record_hit();
                debug!(fingerprint = fingerprint, "Result cache hit");
                Some(entry.value.clone())
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    pub async fn entry(&self, fingerprint: &str) -> Option<Arc<CacheEntry>> {
        self.cache.get(fingerprint).await
    }

    /// Idempotent insert. A different value for an existing fingerprint is
    /// a logic error: database content is assumed static for the session.
    pub async fn store(&self, fingerprint: &str, value: ExtractedValue) -> Result<(), CacheError> {
        self.store_entry(fingerprint, CacheEntry::new(value)).await
    }

    pub async fn store_entry(&self, fingerprint: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if entry.value.is_partial() {
            return Ok(());
        }

        let value = entry.value.clone();
        let stored = self
            .cache
            .entry(fingerprint.to_string())
            .or_insert_with(async move { Arc::new(entry) })
            .await;

        if stored.is_fresh() {
            self.metrics.record_insert();
            return Ok(());
        }

        if stored.value().value != value {
            self.metrics.record_conflict();
            warn!(fingerprint = fingerprint, "Conflicting value for cached fingerprint");
            return Err(CacheError::Conflict {
                fingerprint: fingerprint.to_string(),
            });
        }

        Ok(())
    }

    /// Return the cached value or run `init` exactly once across all
    /// concurrent callers for this fingerprint. Errors are not cached and
    /// are handed to every caller that was waiting on the same run.
    pub async fn get_or_extract<F>(&self, fingerprint: &str, init: F) -> EngineResult<ExtractedValue>
    where
        F: Future<Output = EngineResult<ExtractedValue>>,
    {
        let computed = AtomicBool::new(false);
        let metrics = Arc::clone(&self.metrics);

        let result = self
            .cache
            .try_get_with(fingerprint.to_string(), async {
                computed.store(true, Ordering::Relaxed);
                let value = init.await?;
                metrics.record_insert();
                Ok::<_, EngineError>(Arc::new(CacheEntry::new(value)))
            })
            .await;

        let entry = result.map_err(|e| (*e).clone())?;
        if computed.load(Ordering::Relaxed) {
            self.metrics.record_miss();
        } else {
            entry.record_hit();
            self.metrics.record_hit();
            debug!(fingerprint = fingerprint, "Result served from cache or in-flight run");
        }
        Ok(entry.value.clone())
    }

    /// All live entries, for persistence
    pub fn snapshot(&self) -> Vec<(String, ExtractedValue, DateTime<Utc>)> {
        self.cache
            .iter()
            .map(|(key, entry)| (key.as_ref().clone(), entry.value.clone(), entry.created_at))
            .collect()
    }

    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn get_stats(&self) -> ResultCacheStats {
        self.metrics.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EngineError, OracleError};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_fingerprint_stable_and_distinct() {
        let a = fingerprint("point-1", &Query::scalar("SELECT  user()"));
        let b = fingerprint("point-1", &Query::scalar("SELECT user()"));
        let c = fingerprint("point-2", &Query::scalar("SELECT user()"));
        let d = fingerprint("point-1", &Query::count("SELECT user()"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let cache = ResultCache::new(100);
        let value = ExtractedValue::Text("admin".into());

        cache.store("fp", value.clone()).await.unwrap();
        cache.store("fp", value.clone()).await.unwrap();

        assert_eq!(cache.lookup("fp").await, Some(value));
        assert_eq!(cache.get_stats().inserts, 1);
    }

    #[tokio::test]
    async fn test_conflicting_store_rejected() {
        let cache = ResultCache::new(100);
        cache.store("fp", ExtractedValue::Text("admin".into())).await.unwrap();

        let err = cache
            .store("fp", ExtractedValue::Text("root".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Conflict { .. }));
        assert_eq!(
            cache.lookup("fp").await,
            Some(ExtractedValue::Text("admin".into()))
        );
    }

    #[tokio::test]
    async fn test_partial_values_never_stored() {
        let cache = ResultCache::new(100);
        cache
            .store(
                "fp",
                ExtractedValue::Partial {
                    prefix: "adm".into(),
                    length: 10,
                },
            )
            .await
            .unwrap();

        assert_eq!(cache.lookup("fp").await, None);
    }

    #[tokio::test]
    async fn test_single_flight_runs_once() {
        let cache = Arc::new(ResultCache::new(100));
        let runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_extract("fp", async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(ExtractedValue::Count(42))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), ExtractedValue::Count(42));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let cache = ResultCache::new(100);

        let err = cache
            .get_or_extract("fp", async {
                Err(EngineError::Oracle(OracleError::Network("reset".into())))
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let value = cache
            .get_or_extract("fp", async { Ok(ExtractedValue::Exists(true)) })
            .await
            .unwrap();
        assert_eq!(value, ExtractedValue::Exists(true));
    }

    #[tokio::test]
    async fn test_lru_capacity_bounded() {
        let cache = ResultCache::new(2);
        for i in 0..10u64 {
            cache
                .store(&format!("fp-{}", i), ExtractedValue::Count(i))
                .await
                .unwrap();
        }

        assert!(cache.len().await <= 2);
    }

    #[tokio::test]
    async fn test_snapshot_contains_entries() {
        let cache = ResultCache::new(10);
        cache.store("a", ExtractedValue::Count(1)).await.unwrap();
        cache.store("b", ExtractedValue::Count(2)).await.unwrap();

        let mut keys: Vec<String> = cache.snapshot().into_iter().map(|(k, _, _)| k).collect();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
