//! Settlement watcher
//!
//! Takes the head watch job, waits (bounded) for the signing network to
//! sign it, and turns the signature into a repay dispatch job.

use super::quarantine_head;
use crate::config::WatcherConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::queue::{decode, enqueue, QueueStore, DISPATCH_QUEUE, WATCH_QUEUE};
use crate::routing::ControllerTable;
use crate::sources::{await_signature, SignatureOutcome, SignatureSource};
use crate::transfer::{encode_repay, DispatchJob, SignatureResult, WatchJob};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Result of one settlement watcher cycle
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Empty,
    /// Repay job enqueued and watch job removed
    Settled,
    /// No signature within the wait limit, job stays at the head
    TimedOut,
    /// Signing network failed transiently, job stays at the head
    Deferred,
    Quarantined,
}

pub struct WatcherProcess {
    store: Arc<dyn QueueStore>,
    signatures: Arc<dyn SignatureSource>,
    repay_controllers: ControllerTable,
    poll_interval: Duration,
    signature_timeout: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl WatcherProcess {
    pub fn new(
        store: Arc<dyn QueueStore>,
        signatures: Arc<dyn SignatureSource>,
        config: &WatcherConfig,
    ) -> Self {
        Self {
            store,
            signatures,
            repay_controllers: ControllerTable::repay(),
            poll_interval: config.poll_interval(),
            signature_timeout: config.signature_timeout(),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Process the head of the watch queue
    pub async fn run_once(&self) -> RelayerResult<WatchOutcome> {
        let Some(item) = self.store.peek_head(WATCH_QUEUE).await? else {
            return Ok(WatchOutcome::Empty);
        };

        // Routing is resolved before waiting so a bad job never blocks on the network
        let (job, chain_id) = match self.prepare(&item) {
            Ok(prepared) => prepared,
            Err(e) => return self.park(item, e).await,
        };

        debug!(
            "Waiting for settlement signature (deposit seen at block {})",
            job.block_number
        );

        let outcome = await_signature(
            self.signatures.as_ref(),
            &job.transfer_request,
            self.signature_timeout,
        )
        .await;

        match outcome {
            SignatureOutcome::Signed(result) => {
                crate::metrics::record_signature_outcome("signed");
                self.settle(item, &job, chain_id, &result).await
            }
            SignatureOutcome::TimedOut => {
                crate::metrics::record_signature_outcome("timeout");
                warn!(
                    "No settlement signature after {:?}, will retry",
                    self.signature_timeout
                );
                Ok(WatchOutcome::TimedOut)
            }
            SignatureOutcome::NetworkError(e) if e.is_permanent() => {
                crate::metrics::record_signature_outcome("rejected");
                self.park(item, e).await
            }
            SignatureOutcome::NetworkError(e) => {
                crate::metrics::record_signature_outcome("error");
                warn!("Signing network error, will retry: {}", e);
                Ok(WatchOutcome::Deferred)
            }
        }
    }

    fn prepare(&self, item: &str) -> RelayerResult<(WatchJob, u64)> {
        let job: WatchJob = decode(WATCH_QUEUE, item)?;
        let chain_id = self
            .repay_controllers
            .chain_id(job.transfer_request.contract_address)?;
        Ok((job, chain_id))
    }

    /// Enqueue the repay job, then drop the watch job
    async fn settle(
        &self,
        item: String,
        job: &WatchJob,
        chain_id: u64,
        result: &SignatureResult,
    ) -> RelayerResult<WatchOutcome> {
        let data = match encode_repay(&job.transfer_request, result) {
            Ok(data) => data,
            Err(e) => return self.park(item, e).await,
        };
        let repay = DispatchJob::new(job.transfer_request.contract_address, data, chain_id);

        enqueue(self.store.as_ref(), DISPATCH_QUEUE, &repay).await?;

        let popped = self.store.pop_head(WATCH_QUEUE).await?;
        if popped.as_deref() != Some(item.as_str()) {
            warn!("Head of {} changed while settling", WATCH_QUEUE);
        }

        info!(
            "Settlement signed for {:?}, repay queued for chain {}",
            job.transfer_request.contract_address, chain_id
        );
        Ok(WatchOutcome::Settled)
    }

    async fn park(&self, item: String, reason: RelayerError) -> RelayerResult<WatchOutcome> {
        quarantine_head(self.store.as_ref(), WATCH_QUEUE, item, &reason).await?;
        Ok(WatchOutcome::Quarantined)
    }

    pub async fn run_loop(&self) -> RelayerResult<()> {
        info!("Settlement watcher started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            if let Err(e) = self.run_once().await {
                error!("Settlement watcher cycle failed: {}", e);
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        info!("Settlement watcher stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}
