// Cart cache: a per-customer hash of pending selections with a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::models::CartEntry;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
}

#[async_trait::async_trait]
pub trait CartCache: Send + Sync {
    /// `Ok(None)` means the customer has no cached cart (never written or expired).
    async fn load(&self, customer_id: Uuid) -> Result<Option<Vec<CartEntry>>, CacheError>;
    /// Replaces the cached cart and restarts its TTL.
    async fn store(&self, customer_id: Uuid, entries: &[CartEntry]) -> Result<(), CacheError>;
    async fn clear(&self, customer_id: Uuid) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    entries: Vec<CartEntry>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process cart cache, used in development and tests.
#[derive(Debug, Clone)]
pub struct InMemoryCartCache {
    store: Arc<RwLock<HashMap<Uuid, CacheEntry>>>,
    ttl: Duration,
}

impl InMemoryCartCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }
}

#[async_trait::async_trait]
impl CartCache for InMemoryCartCache {
    async fn load(&self, customer_id: Uuid) -> Result<Option<Vec<CartEntry>>, CacheError> {
        {
            let store = self.store.read().await;
            match store.get(&customer_id) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.entries.clone())),
                Some(_) => {}
            }
        }

        let mut store = self.store.write().await;
        store.remove(&customer_id);
        debug!(%customer_id, "Cart cache entry expired");
        Ok(None)
    }

    async fn store(&self, customer_id: Uuid, entries: &[CartEntry]) -> Result<(), CacheError> {
        let mut store = self.store.write().await;
        if entries.is_empty() {
            store.remove(&customer_id);
        } else {
            store.insert(
                customer_id,
                CacheEntry {
                    entries: entries.to_vec(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
        Ok(())
    }

    async fn clear(&self, customer_id: Uuid) -> Result<(), CacheError> {
        self.store.write().await.remove(&customer_id);
        Ok(())
    }
}

/// Redis-backed cart cache. Each cart is a hash `{prefix}:{customer_id}`
/// mapping menu id to the JSON-encoded entry.
#[derive(Clone)]
pub struct RedisCartCache {
    client: Arc<redis::Client>,
    key_prefix: String,
    ttl: Duration,
}

impl RedisCartCache {
    pub fn new(client: Arc<redis::Client>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    fn key(&self, customer_id: Uuid) -> String {
        format!("{}:{}", self.key_prefix, customer_id)
    }
}

/// HVALS answers an empty list for a missing key, and `store` never writes
/// an empty hash, so no values means nothing is cached.
fn decode_cart(raw: &[String]) -> Result<Option<Vec<CartEntry>>, CacheError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let entries = raw
        .iter()
        .map(|value| serde_json::from_str::<CartEntry>(value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(entries))
}

#[async_trait::async_trait]
impl CartCache for RedisCartCache {
    async fn load(&self, customer_id: Uuid) -> Result<Option<Vec<CartEntry>>, CacheError> {
        let key = self.key(customer_id);
        let mut conn = self.client.get_async_connection().await?;

        let raw: Vec<String> = redis::cmd("HVALS").arg(&key).query_async(&mut conn).await?;
        decode_cart(&raw)
    }

    async fn store(&self, customer_id: Uuid, entries: &[CartEntry]) -> Result<(), CacheError> {
        let key = self.key(customer_id);
        let mut fields = Vec::with_capacity(entries.len());
        for entry in entries {
            fields.push((entry.menu_id.to_string(), serde_json::to_string(entry)?));
        }

        let mut conn = self.client.get_async_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(&key).ignore();
        if !fields.is_empty() {
            pipe.cmd("HSET").arg(&key).arg(&fields).ignore();
            pipe.cmd("EXPIRE").arg(&key).arg(self.ttl.as_secs()).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn clear(&self, customer_id: Uuid) -> Result<(), CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        redis::cmd("DEL")
            .arg(self.key(customer_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
