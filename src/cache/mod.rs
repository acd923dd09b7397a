// src/cache/mod.rs
//! Tiered key/value cache: a networked backend (Redis) with a process-local
//! fallback. Transport errors never reach callers; the first failure pins the
//! cache to memory for the rest of the process.

pub mod memory;
pub mod redis_store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::CacheError;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Networked store seam. Values are opaque strings; encoding lives in [`Cache`].
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
    /// Delete all keys matching a glob, returning how many were removed.
    async fn sweep(&self, pattern: &str) -> Result<usize, CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
    fn name(&self) -> &'static str;
}

struct CacheInner {
    remote: Option<Arc<dyn KvBackend>>,
    remote_live: AtomicBool,
    memory: MemoryStore,
}

/// Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend_name())
            .finish()
    }
}

impl Cache {
    /// Memory-only cache.
    pub fn in_memory() -> Self {
        Self::build(None)
    }

    /// Connect to Redis; an unreachable server yields a memory-only cache.
    pub async fn connect(url: &str, timeout: Duration) -> Self {
        match RedisStore::connect(url, timeout).await {
            Ok(store) => {
                tracing::info!(target: "cache", "redis cache initialized");
                Self::build(Some(Arc::new(store)))
            }
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, "redis unavailable, using memory cache");
                counter!("cache_fallback_total").increment(1);
                Self::in_memory()
            }
        }
    }

    /// Wrap an arbitrary backend; it is pinged once and dropped if it does not answer.
    pub async fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        match backend.ping().await {
            Ok(()) => Self::build(Some(backend)),
            Err(e) => {
                tracing::warn!(target: "cache", backend = backend.name(), error = %e, "backend ping failed, using memory cache");
                counter!("cache_fallback_total").increment(1);
                Self::in_memory()
            }
        }
    }

    fn build(remote: Option<Arc<dyn KvBackend>>) -> Self {
        let live = remote.is_some();
        Self {
            inner: Arc::new(CacheInner {
                remote,
                remote_live: AtomicBool::new(live),
                memory: MemoryStore::new(),
            }),
        }
    }

    /// "redis" (or the injected backend's name) until the first failure, then "memory".
    pub fn backend_name(&self) -> &'static str {
        match self.remote() {
            Some(r) => r.name(),
            None => "memory",
        }
    }

    fn remote(&self) -> Option<&Arc<dyn KvBackend>> {
        if self.inner.remote_live.load(Ordering::Acquire) {
            self.inner.remote.as_ref()
        } else {
            None
        }
    }

    fn degrade(&self, op: &'static str, err: &CacheError) {
        if self.inner.remote_live.swap(false, Ordering::AcqRel) {
            tracing::warn!(target: "cache", op, error = %err, "cache backend failed, switching to memory store");
            counter!("cache_fallback_total").increment(1);
        }
    }

    /// Store a serialisable value. Strings are stored verbatim, everything else as JSON.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match encode(value) {
            Ok(raw) => self.set_raw(key, raw, ttl).await,
            Err(e) => {
                tracing::warn!(target: "cache", key, error = %e, "value not serializable, skipping set");
                false
            }
        }
    }

    pub async fn set_raw(&self, key: &str, raw: String, ttl: Option<Duration>) -> bool {
        if let Some(remote) = self.remote() {
            match remote.set(key, &raw, ttl).await {
                Ok(()) => return true,
                Err(e) => self.degrade("set", &e),
            }
        }
        self.inner.memory.set(key, raw, ttl).await;
        true
    }

    /// Typed read: JSON first, then the raw string itself. Undecodable values read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_raw(key).await.and_then(decode)
    }

    pub async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(remote) = self.remote() {
            match remote.get(key).await {
                Ok(v) => return v,
                Err(e) => self.degrade("get", &e),
            }
        }
        self.inner.memory.get(key).await
    }

    pub async fn delete(&self, key: &str) -> bool {
        if let Some(remote) = self.remote() {
            match remote.delete(key).await {
                Ok(v) => return v,
                Err(e) => self.degrade("delete", &e),
            }
        }
        self.inner.memory.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        if let Some(remote) = self.remote() {
            match remote.exists(key).await {
                Ok(v) => return v,
                Err(e) => self.degrade("exists", &e),
            }
        }
        self.inner.memory.exists(key).await
    }

    /// Remove all keys matching a glob (`*`, `?`, `[..]`).
    pub async fn sweep(&self, pattern: &str) -> usize {
        if let Some(remote) = self.remote() {
            match remote.sweep(pattern).await {
                Ok(n) => return n,
                Err(e) => self.degrade("sweep", &e),
            }
        }
        self.inner.memory.sweep(pattern).await
    }

    /// True while some tier can serve requests; the memory tier always can.
    pub async fn ping(&self) -> bool {
        if let Some(remote) = self.remote() {
            if let Err(e) = remote.ping().await {
                self.degrade("ping", &e);
            }
        }
        true
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(match serde_json::to_value(value)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn decode<T: DeserializeOwned>(raw: String) -> Option<T> {
    match serde_json::from_str::<T>(&raw) {
        Ok(v) => Some(v),
        Err(_) => serde_json::from_value(Value::String(raw)).ok(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex;

    /// Backend that serves `healthy_ops` operations, then fails every call.
    pub(crate) struct FlakyBackend {
        healthy_ops: usize,
        ops: AtomicUsize,
        map: Mutex<HashMap<String, String>>,
    }

    impl FlakyBackend {
        pub(crate) fn new(healthy_ops: usize) -> Self {
            Self {
                healthy_ops,
                ops: AtomicUsize::new(0),
                map: Mutex::new(HashMap::new()),
            }
        }

        fn tick(&self) -> Result<(), CacheError> {
            if self.ops.fetch_add(1, Ordering::SeqCst) >= self.healthy_ops {
                Err(CacheError::Unavailable("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl KvBackend for FlakyBackend {
        async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> Result<(), CacheError> {
            self.tick()?;
            self.map.lock().await.insert(key.into(), value.into());
            Ok(())
        }
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.tick()?;
            Ok(self.map.lock().await.get(key).cloned())
        }
        async fn delete(&self, key: &str) -> Result<bool, CacheError> {
            self.tick()?;
            Ok(self.map.lock().await.remove(key).is_some())
        }
        async fn exists(&self, key: &str) -> Result<bool, CacheError> {
            self.tick()?;
            Ok(self.map.lock().await.contains_key(key))
        }
        async fn sweep(&self, _pattern: &str) -> Result<usize, CacheError> {
            self.tick()?;
            let mut m = self.map.lock().await;
            let n = m.len();
            m.clear();
            Ok(n)
        }
        async fn ping(&self) -> Result<(), CacheError> {
            // pings are free so construction does not consume healthy ops
            if self.ops.load(Ordering::SeqCst) >= self.healthy_ops {
                return Err(CacheError::Unavailable("connection reset".into()));
            }
            Ok(())
        }
        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn strings_round_trip_verbatim_and_structs_as_json() {
        let cache = Cache::in_memory();
        assert!(cache.set("polling:fields:status", "running", None).await);
        assert_eq!(
            cache.get_raw("polling:fields:status").await.as_deref(),
            Some("running")
        );
        assert_eq!(
            cache.get::<String>("polling:fields:status").await.as_deref(),
            Some("running")
        );

        let batch = vec![serde_json::json!({"id": "1"})];
        cache.set("agworld:fields:latest", &batch, None).await;
        assert_eq!(
            cache.get_raw("agworld:fields:latest").await.as_deref(),
            Some(r#"[{"id":"1"}]"#)
        );
        let back: Vec<Value> = cache.get("agworld:fields:latest").await.unwrap();
        assert_eq!(back, batch);
    }

    #[tokio::test]
    async fn undecodable_value_reads_as_miss() {
        let cache = Cache::in_memory();
        cache.set("k", "not json", None).await;
        assert!(cache.get::<Vec<Value>>("k").await.is_none());
        assert!(cache.exists("k").await);
    }

    #[tokio::test]
    async fn outage_after_five_sets_falls_back_without_raising() {
        let backend = Arc::new(FlakyBackend::new(5));
        let cache = Cache::with_backend(backend).await;
        assert_eq!(cache.backend_name(), "flaky");

        for i in 0..5 {
            assert!(cache.set(&format!("k{i}"), &i, None).await);
        }
        // backend is now unreachable
        assert!(cache.set("after", "v", None).await);
        assert_eq!(cache.backend_name(), "memory");
        assert_eq!(cache.get::<String>("after").await.as_deref(), Some("v"));
        // keys that only lived in the backend read as a miss
        assert_eq!(cache.get::<i32>("k0").await, None);
        assert!(!cache.exists("k1").await);
        assert!(cache.ping().await);
    }

    #[tokio::test]
    async fn failed_ping_at_construction_means_memory_only() {
        let cache = Cache::with_backend(Arc::new(FlakyBackend::new(0))).await;
        assert_eq!(cache.backend_name(), "memory");
        assert!(cache.set("k", "v", Some(Duration::from_secs(5))).await);
        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
    }

    #[tokio::test]
    async fn unreachable_redis_url_does_not_block_startup() {
        let cache = Cache::connect("redis://127.0.0.1:1/0", Duration::from_millis(300)).await;
        assert_eq!(cache.backend_name(), "memory");
        assert!(cache.ping().await);
    }
}
