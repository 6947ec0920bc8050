use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::retry::CircuitBreaker;
use crate::core::storage::{CacheStore, StoreResult};

/// Read-through response cache in front of the stores.
///
/// Every failure of the backing [`CacheStore`] is logged and treated as a
/// miss; the caller always falls through to the authoritative store.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<ResponseCacheInner>,
}

struct ResponseCacheInner {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    breaker: CircuitBreaker,
    hits: AtomicUsize,
    misses: AtomicUsize,
    errors: AtomicUsize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_entries: usize,
    /// Consecutive backend failures before the cache is bypassed
    pub failure_threshold: u32,
    pub recovery_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300, // 5 minutes
            max_entries: 1000,
            failure_threshold: 5,
            recovery_secs: 30,
            sweep_interval_secs: 300,
        }
    }
}

/// Groups of cached reads that a write can invalidate together.
/// Namespaces are always scoped to one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    Chats,
    Conversations,
    Messages,
    Branches,
    Users,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Chats => "chats",
            CacheNamespace::Conversations => "conversations",
            CacheNamespace::Messages => "messages",
            CacheNamespace::Branches => "branches",
            CacheNamespace::Users => "users",
        }
    }

    pub fn scoped(&self, owner: Uuid) -> String {
        format!("{}:{}", self.as_str(), owner)
    }
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        let cache = Self {
            inner: Arc::new(ResponseCacheInner {
                breaker: CircuitBreaker::new(config.failure_threshold, config.recovery_secs),
                store,
                config,
                hits: AtomicUsize::new(0),
                misses: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
            }),
        };

        // Sweep expired entries in the background
        if cache.inner.config.enabled && tokio::runtime::Handle::try_current().is_ok() {
            let cache_clone = cache.clone();
            tokio::spawn(async move {
                cache_clone.cleanup_loop().await;
            });
        }

        cache
    }

    /// Deterministic key for (operation, arguments, caller).
    pub fn generate_key(
        namespace: CacheNamespace,
        operation: &str,
        args: &[&str],
        owner: Uuid,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        for arg in args {
            // separator keeps ("ab", "c") and ("a", "bc") apart
            hasher.update([0u8]);
            hasher.update(arg.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(owner.as_bytes());

        format!("{}:{:x}", namespace.scoped(owner), hasher.finalize())
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.inner.config.ttl_seconds)
    }

    fn usable(&self) -> bool {
        self.inner.config.enabled && !self.inner.breaker.is_open()
    }

    fn record_error(&self, action: &str, err: impl std::fmt::Display) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
        self.inner.breaker.record_failure();
        warn!("Cache {} failed, falling through: {}", action, err);
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.usable() {
            return None;
        }

        match self.inner.store.get(key).await {
            Ok(Some(value)) => {
                self.inner.breaker.record_success();
                match serde_json::from_value(value) {
                    Ok(decoded) => {
                        self.inner.hits.fetch_add(1, Ordering::Relaxed);
                        Some(decoded)
                    },
                    Err(e) => {
                        self.record_error("decode", e);
                        None
                    },
                }
            },
            Ok(None) => {
                self.inner.breaker.record_success();
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            },
            Err(e) => {
                self.record_error("read", e);
                None
            },
        }
    }

    pub async fn put<T: Serialize>(&self, key: String, namespace: String, value: &T) {
        if !self.usable() {
            return;
        }

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                self.record_error("encode", e);
                return;
            },
        };

        match self.inner.store.set(key, namespace, value, self.ttl()).await {
            Ok(()) => self.inner.breaker.record_success(),
            Err(e) => self.record_error("write", e),
        }
    }

    /// Serve `operation(args)` for `owner` from the cache, or run `load` and
    /// cache its result. Load errors are returned and never cached.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        namespace: CacheNamespace,
        owner: Uuid,
        operation: &str,
        args: &[&str],
        load: F,
    ) -> StoreResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let key = Self::generate_key(namespace, operation, args, owner);
        if let Some(cached) = self.get(&key).await {
            debug!("Serving {} from cache", operation);
            return Ok(cached);
        }

        let value = load().await?;
        self.put(key, namespace.scoped(owner), &value).await;
        Ok(value)
    }

    /// Drop every cached read of `owner` in the given namespaces.
    ///
    /// Runs even while the breaker is open so a recovering backend never
    /// serves entries older than the write.
    pub async fn invalidate(&self, owner: Uuid, namespaces: &[CacheNamespace]) {
        if !self.inner.config.enabled {
            return;
        }

        for namespace in namespaces {
            let scoped = namespace.scoped(owner);
            match self.inner.store.invalidate(&scoped).await {
                Ok(removed) => debug!("Invalidated {} cached reads in {}", removed, scoped),
                Err(e) => {
                    self.inner.errors.fetch_add(1, Ordering::Relaxed);
                    self.inner.breaker.record_failure();
                    error!("Failed to invalidate cache namespace {}: {}", scoped, e);
                },
            }
        }
    }

    async fn cleanup_loop(&self) {
        let interval = Duration::from_secs(self.inner.config.sweep_interval_secs.max(1));

        loop {
            tokio::time::sleep(interval).await;

            match self.inner.store.cleanup().await {
                Ok(count) if count > 0 => info!("Cache cleanup: removed {} entries", count),
                Err(e) => warn!("Cache cleanup failed: {}", e),
                _ => {},
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let store_stats = self.inner.store.stats().await;

        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            enabled: self.inner.config.enabled,
            circuit_open: self.inner.breaker.is_open(),
            ..store_stats
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_hits: usize,
    pub hits: usize,
    pub misses: usize,
    pub errors: usize,
    pub enabled: bool,
    pub circuit_open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{InMemoryCacheStore, MockCacheStore, StoreError};

    fn memory_cache() -> ResponseCache {
        ResponseCache::new(Arc::new(InMemoryCacheStore::default()), CacheConfig::default())
    }

    #[test]
    fn test_keys_differ_across_owners() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let key_a = ResponseCache::generate_key(CacheNamespace::Chats, "list_chats", &["0"], a);
        let key_b = ResponseCache::generate_key(CacheNamespace::Chats, "list_chats", &["0"], b);

        assert_ne!(key_a, key_b);
        assert!(key_a.starts_with(&format!("chats:{a}:")));
    }

    #[test]
    fn test_keys_are_deterministic() {
        let owner = Uuid::new_v4();
        let first = ResponseCache::generate_key(CacheNamespace::Branches, "tree", &["x"], owner);
        let second = ResponseCache::generate_key(CacheNamespace::Branches, "tree", &["x"], owner);
        let other = ResponseCache::generate_key(CacheNamespace::Branches, "tree", &["y"], owner);

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_get_or_load_caches_result() {
        let cache = memory_cache();
        let owner = Uuid::new_v4();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Vec<String> = cache
                .get_or_load(CacheNamespace::Chats, owner, "list", &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["a".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(value, vec!["a".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache = memory_cache();
        let owner = Uuid::new_v4();

        let first: u32 = cache
            .get_or_load(CacheNamespace::Branches, owner, "op", &[], || async { Ok(1) })
            .await
            .unwrap();
        cache.invalidate(owner, &[CacheNamespace::Branches]).await;
        let second: u32 = cache
            .get_or_load(CacheNamespace::Branches, owner, "op", &[], || async { Ok(2) })
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_failing_backend_falls_through() {
        let mut store = MockCacheStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Transient("cache down".into())));
        store
            .expect_set()
            .returning(|_, _, _, _| Err(StoreError::Transient("cache down".into())));
        store
            .expect_stats()
            .returning(CacheStats::default);

        let cache = ResponseCache::new(
            Arc::new(store),
            CacheConfig {
                sweep_interval_secs: 3600,
                ..Default::default()
            },
        );
        let owner = Uuid::new_v4();

        let value: String = cache
            .get_or_load(CacheNamespace::Chats, owner, "get", &["1"], || async {
                Ok("fresh".to_string())
            })
            .await
            .unwrap();

        assert_eq!(value, "fresh");
        assert_eq!(cache.stats().await.errors, 2);
    }

    #[tokio::test]
    async fn test_breaker_bypasses_backend() {
        let mut store = MockCacheStore::new();
        store
            .expect_get()
            .times(2)
            .returning(|_| Err(StoreError::Transient("cache down".into())));
        store
            .expect_set()
            .returning(|_, _, _, _| Err(StoreError::Transient("cache down".into())));

        let cache = ResponseCache::new(
            Arc::new(store),
            CacheConfig {
                failure_threshold: 2,
                recovery_secs: 3600,
                ..Default::default()
            },
        );

        // two failures open the breaker; the third read never reaches the store
        for _ in 0..3 {
            assert!(cache.get::<String>("key").await.is_none());
        }
    }

    #[tokio::test]
    async fn test_load_errors_are_not_cached() {
        let cache = memory_cache();
        let owner = Uuid::new_v4();

        let err = cache
            .get_or_load::<String, _, _>(CacheNamespace::Chats, owner, "get", &[], || async {
                Err(StoreError::not_found("Chat"))
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let value: String = cache
            .get_or_load(CacheNamespace::Chats, owner, "get", &[], || async {
                Ok("now present".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "now present");
    }
}
