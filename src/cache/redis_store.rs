// src/cache/redis_store.rs
//! # Redis backend
//!
//! Async wrapper over a multiplexed [`ConnectionManager`]. Every command is
//! bounded by `op_timeout` so a hung server turns into a `CacheError` instead
//! of blocking the calling job.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};

use super::KvBackend;
use crate::error::CacheError;

const SCAN_COUNT: usize = 500;

pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Opens the connection and verifies it with a `PING`.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1/").
    /// * `timeout` - Upper bound for connect and for each later command.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(unavailable)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Unavailable(format!("connect to {url} timed out")))?
            .map_err(unavailable)?;
        let store = Self {
            conn,
            op_timeout: timeout,
        };
        store.ping().await?;
        Ok(store)
    }

    async fn run<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| CacheError::Unavailable("redis command timed out".to_string()))?
            .map_err(unavailable)
    }
}

fn unavailable(e: redis::RedisError) -> CacheError {
    CacheError::Unavailable(e.to_string())
}

#[async_trait]
impl KvBackend for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(t) => {
                let ms = t.as_millis().max(1) as u64;
                self.run(conn.pset_ex::<_, _, ()>(key, value, ms)).await
            }
            None => self.run(conn.set::<_, _, ()>(key, value)).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        self.run(conn.get::<_, Option<String>>(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let n: i64 = self.run(conn.del(key)).await?;
        Ok(n > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        self.run(conn.exists::<_, bool>(key)).await
    }

    /// Walks the keyspace with `SCAN`, deleting each batch as it is returned.
    async fn sweep(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;
            if !keys.is_empty() {
                let n: i64 = self.run(conn.del(keys)).await?;
                removed += n.max(0) as usize;
            }
            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .run(redis::cmd("PING").query_async(&mut conn))
            .await?;
        if pong.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(CacheError::Unavailable(format!("unexpected PING reply: {pong}")))
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
