//! In-process queue store for tests and single-process development

use super::QueueStore;
use crate::error::RelayerResult;

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Queue store backed by a mutex-guarded map of deques. Not durable.
#[derive(Default)]
pub struct MemoryQueueStore {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a queue, head first
    #[cfg(test)]
    pub async fn items(&self, queue: &str) -> Vec<String> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push(&self, queue: &str, item: String) -> RelayerResult<()> {
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(item);
        Ok(())
    }

    async fn pop_head(&self, queue: &str) -> RelayerResult<Option<String>> {
        Ok(self
            .queues
            .lock()
            .await
            .get_mut(queue)
            .and_then(|q| q.pop_front()))
    }

    async fn peek_head(&self, queue: &str) -> RelayerResult<Option<String>> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .and_then(|q| q.front().cloned()))
    }

    async fn remove_at(&self, queue: &str, index: usize) -> RelayerResult<Option<String>> {
        Ok(self
            .queues
            .lock()
            .await
            .get_mut(queue)
            .and_then(|q| q.remove(index)))
    }

    async fn rotate(&self, queue: &str) -> RelayerResult<()> {
        if let Some(q) = self.queues.lock().await.get_mut(queue) {
            q.rotate_left(q.len().min(1));
        }
        Ok(())
    }

    async fn len(&self, queue: &str) -> RelayerResult<usize> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0))
    }
}
