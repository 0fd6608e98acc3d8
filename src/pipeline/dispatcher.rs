//! Transaction dispatcher
//!
//! Pops one dispatch job per cycle and submits it on the chain named by its
//! routing metadata. Failed jobs go back to the tail with their attempt
//! count bumped, until they run out of attempts or fail permanently.

use crate::chain::{ChainRegistry, TransactionIntent};
use crate::config::DispatcherConfig;
use crate::error::RelayerResult;
use crate::queue::{decode, enqueue, quarantine, QuarantinedItem, QueueStore, DISPATCH_QUEUE};
use crate::transfer::DispatchJob;

use ethers::types::{H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Result of one dispatcher cycle
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Idle,
    Dispatched(H256),
    /// Submission failed, job re-enqueued at the tail
    Requeued,
    Quarantined,
}

pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    chains: Arc<ChainRegistry>,
    gas_limit: U256,
    error_timeout: Duration,
    max_attempts: u32,
    shutdown: Arc<RwLock<bool>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn QueueStore>,
        chains: Arc<ChainRegistry>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            store,
            chains,
            gas_limit: U256::from(config.gas_limit),
            error_timeout: config.error_timeout(),
            max_attempts: config.max_attempts,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn run_once(&self) -> RelayerResult<DispatchOutcome> {
        let Some(raw) = self.store.pop_head(DISPATCH_QUEUE).await? else {
            return Ok(DispatchOutcome::Idle);
        };

        let job: DispatchJob = match decode(DISPATCH_QUEUE, &raw) {
            Ok(job) => job,
            Err(e) => {
                quarantine(self.store.as_ref(), QuarantinedItem::new(DISPATCH_QUEUE, raw, &e, 0))
                    .await?;
                return Ok(DispatchOutcome::Quarantined);
            }
        };

        match self.submit(&job).await {
            Ok(tx_hash) => {
                info!(
                    "Dispatched tx {:?} to {:?} on chain {} (attempt {})",
                    tx_hash,
                    job.to,
                    job.chain_id,
                    job.attempts + 1
                );
                crate::metrics::record_tx_submitted(job.chain_id);
                Ok(DispatchOutcome::Dispatched(tx_hash))
            }
            Err(e) => {
                error!("Dispatch to chain {} failed: {}", job.chain_id, e);
                crate::metrics::record_tx_failed(job.chain_id, e.is_permanent());
                if e.should_alert() {
                    error!("ALERT: chain {} needs operator attention: {}", job.chain_id, e);
                }

                let retried = job.retried(&e);
                if !e.is_retryable() || retried.attempts >= self.max_attempts {
                    quarantine(
                        self.store.as_ref(),
                        QuarantinedItem::new(DISPATCH_QUEUE, raw, &e, retried.attempts),
                    )
                    .await?;
                    return Ok(DispatchOutcome::Quarantined);
                }

                if let Err(push_err) = enqueue(self.store.as_ref(), DISPATCH_QUEUE, &retried).await {
                    error!("Could not re-enqueue dispatch job, payload: {}", raw);
                    return Err(push_err);
                }
                warn!(
                    "Dispatch job re-enqueued ({}/{} attempts)",
                    retried.attempts, self.max_attempts
                );
                Ok(DispatchOutcome::Requeued)
            }
        }
    }

    /// The chain id selects the client and is never part of the transaction
    async fn submit(&self, job: &DispatchJob) -> RelayerResult<H256> {
        let client = self.chains.get(job.chain_id)?;
        client
            .submit(TransactionIntent {
                to: job.to,
                data: job.data.clone(),
                gas_limit: self.gas_limit,
            })
            .await
    }

    pub async fn run_loop(&self) -> RelayerResult<()> {
        info!(
            "Dispatcher started for chains {:?}",
            self.chains.connected_chains()
        );

        loop {
            if *self.shutdown.read().await {
                break;
            }

            match self.run_once().await {
                Ok(DispatchOutcome::Dispatched(_)) | Ok(DispatchOutcome::Quarantined) => {}
                Ok(_) => tokio::time::sleep(self.error_timeout).await,
                Err(e) => {
                    error!("Dispatcher cycle failed: {}", e);
                    tokio::time::sleep(self.error_timeout).await;
                }
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::error::RelayerError;
    use crate::queue::{MemoryQueueStore, QUARANTINE_QUEUE};
    use ethers::types::{Address, Bytes};

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            enabled: true,
            gas_limit: 500_000,
            error_timeout_ms: 0,
            max_attempts: 3,
        }
    }

    fn job(byte: u8) -> DispatchJob {
        DispatchJob::new(
            "0x85dAC4da6eB28393088CF65b73bA1eA30e7e3cab".parse().unwrap(),
            Bytes::from(vec![byte; 8]),
            137,
        )
    }

    fn registry(client: MockChainClient) -> Arc<ChainRegistry> {
        let registry = ChainRegistry::new();
        registry.insert(Arc::new(client));
        Arc::new(registry)
    }

    fn polygon() -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(137u64);
        client
    }

    async fn store_with(jobs: &[DispatchJob]) -> Arc<MemoryQueueStore> {
        let store = Arc::new(MemoryQueueStore::new());
        for job in jobs {
            store
                .push(DISPATCH_QUEUE, serde_json::to_string(job).unwrap())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_idle_when_empty() {
        let dispatcher = Dispatcher::new(
            Arc::new(MemoryQueueStore::new()),
            registry(polygon()),
            &config(),
        );
        assert_eq!(dispatcher.run_once().await.unwrap(), DispatchOutcome::Idle);
    }

    #[tokio::test]
    async fn test_submits_intent_without_chain_id() {
        let store = store_with(&[job(1)]).await;
        let mut client = polygon();
        let expected_to: Address = job(1).to;
        client
            .expect_submit()
            .withf(move |intent| {
                intent.to == expected_to
                    && intent.data == Bytes::from(vec![1u8; 8])
                    && intent.gas_limit == U256::from(500_000u64)
            })
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0xaa)));
        let dispatcher = Dispatcher::new(store.clone(), registry(client), &config());

        assert_eq!(
            dispatcher.run_once().await.unwrap(),
            DispatchOutcome::Dispatched(H256::repeat_byte(0xaa))
        );
        assert_eq!(store.len(DISPATCH_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_at_tail() {
        let store = store_with(&[job(1), job(2)]).await;
        let mut client = polygon();
        client
            .expect_submit()
            .times(1)
            .returning(|_| Err(RelayerError::Transaction("connection reset".to_string())));
        let dispatcher = Dispatcher::new(store.clone(), registry(client), &config());

        assert_eq!(dispatcher.run_once().await.unwrap(), DispatchOutcome::Requeued);

        let items = store.items(DISPATCH_QUEUE).await;
        assert_eq!(items.len(), 2);
        let head: DispatchJob = decode(DISPATCH_QUEUE, &items[0]).unwrap();
        let tail: DispatchJob = decode(DISPATCH_QUEUE, &items[1]).unwrap();
        assert_eq!(head, job(2));
        assert!(tail.same_intent(&job(1)));
        assert_eq!(tail.attempts, 1);
        assert_eq!(
            tail.last_error.as_deref(),
            Some("Transaction error: connection reset")
        );
    }

    #[tokio::test]
    async fn test_requeued_job_keeps_its_intent() {
        let store = store_with(&[job(1)]).await;
        let mut client = polygon();
        client
            .expect_submit()
            .times(1)
            .returning(|_| Err(RelayerError::RateLimited { chain_id: 137 }));
        let dispatcher = Dispatcher::new(store.clone(), registry(client), &config());

        assert_eq!(dispatcher.run_once().await.unwrap(), DispatchOutcome::Requeued);

        let items = store.items(DISPATCH_QUEUE).await;
        assert_eq!(items.len(), 1);
        let requeued: DispatchJob = decode(DISPATCH_QUEUE, &items[0]).unwrap();
        assert!(requeued.same_intent(&job(1)));
        assert_eq!(requeued.attempts, 1);
        assert_eq!(store.len(QUARANTINE_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_are_quarantined() {
        let mut worn = job(1);
        worn.attempts = 2;
        let store = store_with(&[worn]).await;
        let mut client = polygon();
        client
            .expect_submit()
            .returning(|_| Err(RelayerError::Transaction("connection reset".to_string())));
        let dispatcher = Dispatcher::new(store.clone(), registry(client), &config());

        assert_eq!(dispatcher.run_once().await.unwrap(), DispatchOutcome::Quarantined);
        assert_eq!(store.len(DISPATCH_QUEUE).await.unwrap(), 0);

        let parked = store.items(QUARANTINE_QUEUE).await;
        let parked: QuarantinedItem = decode(QUARANTINE_QUEUE, &parked[0]).unwrap();
        assert_eq!(parked.attempts, 3);
        assert_eq!(parked.source_queue, DISPATCH_QUEUE);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_quarantined_immediately() {
        let store = store_with(&[job(1)]).await;
        let mut client = polygon();
        client
            .expect_submit()
            .times(1)
            .returning(|_| Err(RelayerError::Contract("execution reverted".to_string())));
        let dispatcher = Dispatcher::new(store.clone(), registry(client), &config());

        assert_eq!(dispatcher.run_once().await.unwrap(), DispatchOutcome::Quarantined);
        assert_eq!(store.len(DISPATCH_QUEUE).await.unwrap(), 0);
        assert_eq!(store.len(QUARANTINE_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_chain_is_quarantined() {
        let mut unrouted = job(1);
        unrouted.chain_id = 43114;
        let store = store_with(&[unrouted]).await;
        // the polygon client must never be asked to submit
        let dispatcher = Dispatcher::new(store.clone(), registry(polygon()), &config());

        assert_eq!(dispatcher.run_once().await.unwrap(), DispatchOutcome::Quarantined);
        assert_eq!(store.len(QUARANTINE_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_job_is_quarantined() {
        let store = Arc::new(MemoryQueueStore::new());
        store.push(DISPATCH_QUEUE, "[1,2".to_string()).await.unwrap();
        let dispatcher = Dispatcher::new(store.clone(), registry(polygon()), &config());

        assert_eq!(dispatcher.run_once().await.unwrap(), DispatchOutcome::Quarantined);
        let parked = store.items(QUARANTINE_QUEUE).await;
        let parked: QuarantinedItem = decode(QUARANTINE_QUEUE, &parked[0]).unwrap();
        assert_eq!(parked.payload, "[1,2");
    }
}
