//! The three pipeline stages
//!
//! 1. `PendingProcess` turns confirmed deposits into loan and watch jobs
//! 2. `WatcherProcess` turns settlement signatures into repay jobs
//! 3. `Dispatcher` submits dispatch jobs to their destination chain
//!
//! Stages share nothing but the queue store.

pub mod dispatcher;
pub mod pending;
pub mod watcher;

pub use dispatcher::Dispatcher;
pub use pending::PendingProcess;
pub use watcher::WatcherProcess;

use crate::error::{RelayerError, RelayerResult};
use crate::queue::{quarantine, QuarantinedItem, QueueStore};

use tracing::warn;

/// Park the head of `queue` (already peeked as `item`) in quarantine, then drop it
async fn quarantine_head(
    store: &dyn QueueStore,
    queue: &str,
    item: String,
    reason: &RelayerError,
) -> RelayerResult<()> {
    quarantine(store, QuarantinedItem::new(queue, item.clone(), reason, 0)).await?;

    let removed = store.remove_at(queue, 0).await?;
    if removed.as_deref() != Some(item.as_str()) {
        warn!("Head of {} changed while quarantining", queue);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::error::RelayerResult;
    use crate::queue::{MemoryQueueStore, QueueStore};
    use async_trait::async_trait;

    /// Records every mutation so tests can check their order
    #[derive(Default)]
    pub struct RecordingStore {
        pub inner: MemoryQueueStore,
        ops: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingStore {
        fn log(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }

        pub fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueueStore for RecordingStore {
        async fn push(&self, queue: &str, item: String) -> RelayerResult<()> {
            self.log(format!("push {}", queue));
            self.inner.push(queue, item).await
        }

        async fn pop_head(&self, queue: &str) -> RelayerResult<Option<String>> {
            self.log(format!("pop {}", queue));
            self.inner.pop_head(queue).await
        }

        async fn peek_head(&self, queue: &str) -> RelayerResult<Option<String>> {
            self.inner.peek_head(queue).await
        }

        async fn remove_at(&self, queue: &str, index: usize) -> RelayerResult<Option<String>> {
            self.log(format!("remove {}", queue));
            self.inner.remove_at(queue, index).await
        }

        async fn rotate(&self, queue: &str) -> RelayerResult<()> {
            self.log(format!("rotate {}", queue));
            self.inner.rotate(queue).await
        }

        async fn len(&self, queue: &str) -> RelayerResult<usize> {
            self.inner.len(queue).await
        }
    }
}
