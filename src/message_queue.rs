/*!
 * # Delayed Message Queue
 *
 * Messages become visible to consumers only once their delay has elapsed.
 * Delivery is at-least-once: a consumer that crashes after claiming a batch
 * loses it, and a redis backend may hand the same payload out again if it
 * was enqueued twice, so handlers must be idempotent.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Message queue errors
#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl From<serde_json::Error> for MessageQueueError {
    fn from(err: serde_json::Error) -> Self {
        MessageQueueError::SerializationError(err.to_string())
    }
}

impl From<redis::RedisError> for MessageQueueError {
    fn from(err: redis::RedisError) -> Self {
        MessageQueueError::ConnectionError(err.to_string())
    }
}

/// Message envelope for queue items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[async_trait]
pub trait DelayedQueue: Send + Sync {
    /// Makes `message` deliverable once `delay` has elapsed.
    async fn enqueue(&self, message: Message, delay: Duration) -> Result<(), MessageQueueError>;

    /// Claims up to `limit` messages whose delay has elapsed, oldest first.
    /// Claimed messages are removed from the queue.
    async fn poll_due(&self, limit: usize) -> Result<Vec<Message>, MessageQueueError>;
}

/// In-memory delayed queue driven by the tokio clock, so paused-time tests
/// can fast-forward through the delay.
#[derive(Debug, Clone)]
pub struct InMemoryDelayedQueue {
    entries: Arc<Mutex<BTreeMap<(Instant, u64), Message>>>,
    sequence: Arc<std::sync::atomic::AtomicU64>,
    max_size: usize,
}

impl InMemoryDelayedQueue {
    pub fn new() -> Self {
        Self::with_max_size(100_000)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            sequence: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            max_size,
        }
    }

    /// Number of messages not yet claimed, due or not.
    pub async fn pending(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for InMemoryDelayedQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DelayedQueue for InMemoryDelayedQueue {
    async fn enqueue(&self, message: Message, delay: Duration) -> Result<(), MessageQueueError> {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        let seq = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        entries.insert((Instant::now() + delay, seq), message);
        Ok(())
    }

    async fn poll_due(&self, limit: usize) -> Result<Vec<Message>, MessageQueueError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let due: Vec<(Instant, u64)> = entries
            .range(..=(now, u64::MAX))
            .take(limit)
            .map(|(key, _)| *key)
            .collect();

        Ok(due
            .into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect())
    }
}

/// Redis delayed queue: a sorted set scored by the due time in epoch millis.
#[derive(Clone)]
pub struct RedisDelayedQueue {
    client: Arc<redis::Client>,
    key: String,
}

impl RedisDelayedQueue {
    pub fn new(client: Arc<redis::Client>, queue_name: impl Into<String>) -> Self {
        Self {
            client,
            key: queue_name.into(),
        }
    }
}

#[async_trait]
impl DelayedQueue for RedisDelayedQueue {
    async fn enqueue(&self, message: Message, delay: Duration) -> Result<(), MessageQueueError> {
        let due_at = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let member = serde_json::to_string(&message)?;

        let mut conn = self.client.get_async_connection().await?;
        redis::cmd("ZADD")
            .arg(&self.key)
            .arg(due_at)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn poll_due(&self, limit: usize) -> Result<Vec<Message>, MessageQueueError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.client.get_async_connection().await?;

        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.key)
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut claimed = Vec::with_capacity(members.len());
        for member in members {
            // ZREM decides the race between concurrent workers.
            let removed: i64 = redis::cmd("ZREM")
                .arg(&self.key)
                .arg(&member)
                .query_async(&mut conn)
                .await?;
            if removed == 1 {
                claimed.extend(decode_member(&member));
            }
        }
        Ok(claimed)
    }
}

/// Decodes a sorted-set member. A member that is not a valid envelope has
/// already been removed, so it is logged and dropped without failing the
/// rest of the batch.
fn decode_member(member: &str) -> Option<Message> {
    match serde_json::from_str(member) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, member, "Dropping undecodable delayed queue member");
            None
        }
    }
}
