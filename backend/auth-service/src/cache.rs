//! Shared cache abstraction for short-lived counters.
//!
//! The rate limiter is the only component that mutates cache state, so the
//! interface is deliberately narrow: string get/set-with-TTL/remove. The
//! Redis implementation follows the connection-manager pattern used across
//! the platform; the in-memory implementation is sufficient for
//! single-process deployments and is what the test suite runs against.

use crate::error::{AuthError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>>;
    async fn set_string(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Redis-backed cache for multi-instance deployments.
#[derive(Clone)]
pub struct RedisCache {
    conn: SharedConnectionManager,
}

impl RedisCache {
    pub fn new(conn: SharedConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Arc::new(Mutex::new(manager)),
        })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock().await.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AuthError::Cache(e.to_string()))?;
        Ok(value)
    }

    async fn set_string(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.lock().await.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AuthError::Cache(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.lock().await.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AuthError::Cache(e.to_string()))?;
        Ok(())
    }
}

/// In-process TTL map. Entries are evicted lazily on read.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, (String, DateTime<Utc>)>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value().clone();
            if expires_at > Utc::now() {
                return Ok(Some(value));
            }
        }
        // Expired or absent
        self.entries
            .remove_if(key, |_, (_, expires_at)| *expires_at <= Utc::now());
        Ok(None)
    }

    async fn set_string(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let expires_at = Utc::now() + Duration::seconds(ttl_secs as i64);
        self.entries
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
