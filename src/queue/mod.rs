//! Durable work queues shared by the pipeline stages
//!
//! Every queue has exactly one consumer:
//! - `/zero/pending` is consumed by the deposit watcher
//! - `/zero/watch` is consumed by the settlement watcher
//! - `/zero/dispatch` is consumed by the dispatcher
//! - `/zero/quarantine` is only read by operators
//!
//! Implementations must make each operation atomic: a popped item is seen by
//! at most one caller, and ordering is FIFO except for `rotate`.

mod memory;
mod postgres;

pub use memory::MemoryQueueStore;
pub use postgres::PgQueueStore;

use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PENDING_QUEUE: &str = "/zero/pending";
pub const WATCH_QUEUE: &str = "/zero/watch";
pub const DISPATCH_QUEUE: &str = "/zero/dispatch";
pub const QUARANTINE_QUEUE: &str = "/zero/quarantine";

pub const ALL_QUEUES: [&str; 4] = [PENDING_QUEUE, WATCH_QUEUE, DISPATCH_QUEUE, QUARANTINE_QUEUE];

/// Opaque list storage. Items are UTF-8 JSON documents the store never interprets.
///
/// Every operation is atomic on its own; nothing spans two calls. Each queue
/// has exactly one consuming loop, so a peek followed by a remove sees the
/// same head.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append an item at the tail
    async fn push(&self, queue: &str, item: String) -> RelayerResult<()>;

    /// Remove and return the head
    async fn pop_head(&self, queue: &str) -> RelayerResult<Option<String>>;

    /// Return the head without removing it
    async fn peek_head(&self, queue: &str) -> RelayerResult<Option<String>>;

    /// Remove and return the item at `index` (0 = head)
    async fn remove_at(&self, queue: &str, index: usize) -> RelayerResult<Option<String>>;

    /// Move the head to the tail
    async fn rotate(&self, queue: &str) -> RelayerResult<()>;

    async fn len(&self, queue: &str) -> RelayerResult<usize>;

    /// Liveness check used by readiness
    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }
}

/// Serialize a job and push it to the tail of `queue`
pub async fn enqueue<T: Serialize + Sync>(
    store: &dyn QueueStore,
    queue: &str,
    job: &T,
) -> RelayerResult<()> {
    let payload = serde_json::to_string(job).map_err(|e| RelayerError::Queue {
        queue: queue.to_string(),
        message: format!("failed to serialize job: {}", e),
    })?;
    store.push(queue, payload).await?;
    crate::metrics::record_enqueued(queue);
    Ok(())
}

/// Decode a raw queue item
pub fn decode<T: DeserializeOwned>(queue: &str, payload: &str) -> RelayerResult<T> {
    serde_json::from_str(payload).map_err(|e| RelayerError::malformed(queue, e))
}

/// An item that can never succeed, parked for operator inspection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinedItem {
    pub source_queue: String,
    /// Raw payload exactly as it was read from the source queue
    pub payload: String,
    pub reason: String,
    #[serde(default)]
    pub attempts: u32,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantinedItem {
    pub fn new(source_queue: &str, payload: String, reason: &RelayerError, attempts: u32) -> Self {
        Self {
            source_queue: source_queue.to_string(),
            payload,
            reason: reason.to_string(),
            attempts,
            quarantined_at: Utc::now(),
        }
    }
}

/// Park an item in the quarantine queue
pub async fn quarantine(store: &dyn QueueStore, item: QuarantinedItem) -> RelayerResult<()> {
    tracing::warn!(
        "Quarantining item from {} after {} attempts: {}",
        item.source_queue,
        item.attempts,
        item.reason
    );
    crate::metrics::record_quarantined(&item.source_queue);
    enqueue(store, QUARANTINE_QUEUE, &item).await
}

/// Lengths of every known queue, in `ALL_QUEUES` order
pub async fn queue_lengths(store: &dyn QueueStore) -> RelayerResult<Vec<(&'static str, usize)>> {
    let mut lengths = Vec::with_capacity(ALL_QUEUES.len());
    for queue in ALL_QUEUES {
        let len = store.len(queue).await?;
        crate::metrics::record_queue_length(queue, len);
        lengths.push((queue, len));
    }
    Ok(lengths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quarantine_preserves_raw_payload() {
        let store = MemoryQueueStore::new();
        let reason = RelayerError::malformed(PENDING_QUEUE, "expected value at line 1");
        quarantine(&store, QuarantinedItem::new(PENDING_QUEUE, "not json".to_string(), &reason, 0))
            .await
            .unwrap();

        let raw = store.pop_head(QUARANTINE_QUEUE).await.unwrap().unwrap();
        let item: QuarantinedItem = decode(QUARANTINE_QUEUE, &raw).unwrap();
        assert_eq!(item.source_queue, PENDING_QUEUE);
        assert_eq!(item.payload, "not json");
        assert!(item.reason.contains("Malformed payload"));
    }

    #[tokio::test]
    async fn test_queue_lengths_reports_every_queue() {
        let store = MemoryQueueStore::new();
        store.push(WATCH_QUEUE, "{}".to_string()).await.unwrap();

        let lengths = queue_lengths(&store).await.unwrap();
        assert_eq!(lengths.len(), 4);
        assert_eq!(lengths[1], (WATCH_QUEUE, 1));
        assert_eq!(lengths[0], (PENDING_QUEUE, 0));
    }

    #[test]
    fn test_decode_reports_queue() {
        let err = decode::<QuarantinedItem>(DISPATCH_QUEUE, "{").unwrap_err();
        assert!(err.is_permanent());
        assert!(err.to_string().contains(DISPATCH_QUEUE));
    }
}
