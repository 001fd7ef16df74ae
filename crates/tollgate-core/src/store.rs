//! Key-value store backing the session registry
//!
//! The registry only needs three primitives: set-with-TTL, get and delete.
//! Expiry is owned by the store; callers never prune markers themselves.
//!
//! Two implementations are provided:
//! - [`RedisStore`]: bb8 connection pool over redis-rs, every command bounded
//!   by the configured command timeout
//! - [`MemoryStore`]: process-local map with lazy TTL expiry, for tests and
//!   single-instance development setups

use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::RedisConfig;

/// Session store errors
///
/// Every variant means "the store could not answer"; callers decide whether
/// that is fatal for the surrounding operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store command timed out after {0}ms")]
    Timeout(u128),

    #[error("Invalid TTL for key {0}")]
    InvalidTtl(String),
}

/// Minimal key-value contract used by the session registry
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`. Overwrites reset the TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Get the value of `key`, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete `key`; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;
}

// ============================================================================
// Redis
// ============================================================================

/// Redis-backed store using a bb8 connection pool
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
    command_timeout: Duration,
}

impl RedisStore {
    /// Build the pool and verify connectivity with a PING
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let manager = RedisConnectionManager::new(config.url.clone())
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis manager: {e}")))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout())
            .build(manager)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis pool: {e}")))?;

        let store = Self {
            pool,
            command_timeout: config.command_timeout(),
        };
        store.ping().await?;

        tracing::info!(
            pool_size = config.pool_size,
            command_timeout_ms = config.command_timeout_ms,
            "Redis session store connected"
        );

        Ok(store)
    }

    async fn conn(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to get Redis connection: {e}")))
    }

    async fn with_timeout<F, T>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.command_timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.command_timeout.as_millis()))?
    }
}

/// Redis TTLs are whole seconds; sub-second remainders round up
fn ttl_secs(key: &str, ttl: Duration) -> Result<u64, StoreError> {
    if ttl.is_zero() {
        return Err(StoreError::InvalidTtl(key.to_string()));
    }
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    Ok(secs.max(1))
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let seconds = ttl_secs(key, ttl)?;
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.set_ex::<_, _, ()>(key, value, seconds)
                .await
                .map_err(|e| StoreError::Unavailable(format!("Redis SETEX failed: {e}")))
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.get::<_, Option<String>>(key)
                .await
                .map_err(|e| StoreError::Unavailable(format!("Redis GET failed: {e}")))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.del::<_, ()>(key)
                .await
                .map_err(|e| StoreError::Unavailable(format!("Redis DEL failed: {e}")))
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let _: String = conn
                .ping()
                .await
                .map_err(|e| StoreError::Unavailable(format!("Redis PING failed: {e}")))?;
            Ok(())
        })
        .await
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store with TTL semantics
///
/// Expired entries are dropped lazily on read.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, deadline)| *deadline > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl(key.to_string()));
        }
        let deadline = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some((value, deadline)) if *deadline > now => return Ok(Some(value.clone())),
                Some(_) => {}
            }
        }

        // Expired: drop it unless a writer refreshed it in the meantime
        let mut entries = self.entries.write().await;
        if matches!(entries.get(key), Some((_, deadline)) if *deadline <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_set_get_delete() {
        let store = MemoryStore::new();

        store
            .set("revoke:user:1", "true", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("revoke:user:1").await.unwrap(),
            Some("true".to_string())
        );

        store.delete("revoke:user:1").await.unwrap();
        assert_eq!(store.get("revoke:user:1").await.unwrap(), None);

        // Deleting again is fine
        store.delete("revoke:user:1").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_expires_entries() {
        let store = MemoryStore::new();
        store
            .set("blacklist:abc", "true", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(store.get("blacklist:abc").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get("blacklist:abc").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_overwrite_resets_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", "true", Duration::from_millis(30))
            .await
            .unwrap();
        store.set("k", "true", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.get("k").await.unwrap().is_some());
    }

    #[test]
    fn test_memory_store_rejects_zero_ttl() {
        let store = MemoryStore::new();
        let result = tokio_test::block_on(store.set("k", "true", Duration::ZERO));
        assert!(matches!(result, Err(StoreError::InvalidTtl(_))));
    }

    #[test]
    fn test_ttl_rounds_up_to_whole_seconds() {
        assert_eq!(ttl_secs("k", Duration::from_millis(1)).unwrap(), 1);
        assert_eq!(ttl_secs("k", Duration::from_millis(1500)).unwrap(), 2);
        assert_eq!(ttl_secs("k", Duration::from_secs(604_800)).unwrap(), 604_800);
        assert!(ttl_secs("k", Duration::ZERO).is_err());
    }
}
