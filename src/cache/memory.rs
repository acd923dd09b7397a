// src/cache/memory.rs
//! Process-local store used when the networked backend is absent or has failed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use glob::Pattern;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MemEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| now < t)
    }
}

/// TTL-aware string map. Expired entries are invisible to readers and are
/// dropped lazily on access and on every sweep.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, MemEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.map
            .write()
            .await
            .insert(key.to_string(), MemEntry { value, expires_at });
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let map = self.map.read().await;
            match map.get(key) {
                Some(e) if e.is_live(now) => return Some(e.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // expired: drop it
        self.map.write().await.remove(key);
        None
    }

    pub async fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.map
            .write()
            .await
            .remove(key)
            .is_some_and(|e| e.is_live(now))
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Remove every live key matching the glob; expired keys are purged but not counted.
    pub async fn sweep(&self, pattern: &str) -> usize {
        let now = Instant::now();
        let mut map = self.map.write().await;
        map.retain(|_, e| e.is_live(now));
        if pattern == "*" {
            let n = map.len();
            map.clear();
            return n;
        }
        let glob = match Pattern::new(pattern) {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(target: "cache", pattern, error = %e, "invalid sweep pattern");
                return 0;
            }
        };
        let before = map.len();
        map.retain(|k, _| !glob.matches(k));
        before - map.len()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.map.read().await.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
