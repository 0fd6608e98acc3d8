//! Deposit watcher
//!
//! Examines one pending request per cycle. Requests without a confirmed
//! deposit are rotated to the tail, so every pending request is visited in
//! turn without scanning the whole queue each cycle.

use super::quarantine_head;
use crate::config::{BtcNetwork, PendingConfig};
use crate::error::RelayerResult;
use crate::queue::{decode, enqueue, QueueStore, DISPATCH_QUEUE, PENDING_QUEUE, WATCH_QUEUE};
use crate::routing::ControllerTable;
use crate::sources::UtxoSource;
use crate::transfer::{
    compute_gateway_address, encode_loan, parse_mpkh, DispatchJob, TransferRequest, WatchJob,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Result of one deposit watcher cycle
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOutcome {
    /// Nothing pending
    Empty,
    /// No confirmed deposit yet, head rotated to the tail
    Unconfirmed,
    /// Deposit confirmed, jobs enqueued and request removed
    Graduated,
    /// Transient failure, queue left untouched
    Deferred,
    /// Request can never succeed and was moved to quarantine
    Quarantined,
}

/// When a pending request was examined
#[derive(Debug, Clone)]
pub struct Visit {
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_visited: DateTime<Utc>,
}

/// Per-gateway visit bookkeeping, makes the round-robin order auditable
#[derive(Default)]
pub struct VisitLog {
    visits: DashMap<String, Visit>,
}

impl VisitLog {
    pub fn record(&self, gateway: &str) -> Visit {
        let now = Utc::now();
        let mut entry = self.visits.entry(gateway.to_string()).or_insert(Visit {
            count: 0,
            first_seen: now,
            last_visited: now,
        });
        entry.count += 1;
        entry.last_visited = now;
        entry.clone()
    }

    pub fn forget(&self, gateway: &str) {
        self.visits.remove(gateway);
    }

    #[cfg(test)]
    pub fn get(&self, gateway: &str) -> Option<Visit> {
        self.visits.get(gateway).map(|v| v.clone())
    }
}

/// Everything a confirmed request turns into
struct Graduation {
    gateway: String,
    loan: Option<DispatchJob>,
    watch: WatchJob,
}

enum Examination {
    Unconfirmed,
    Confirmed(Graduation),
}

/// Polls the pending queue for confirmed deposits
pub struct PendingProcess {
    store: Arc<dyn QueueStore>,
    utxos: Arc<dyn UtxoSource>,
    mpkh: [u8; 20],
    network: BtcNetwork,
    min_confirmations: u64,
    /// Requests to this controller get no loan leg
    no_dispatch_controller: Address,
    loan_controllers: ControllerTable,
    visits: VisitLog,
    idle_interval: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl PendingProcess {
    pub fn new(
        store: Arc<dyn QueueStore>,
        utxos: Arc<dyn UtxoSource>,
        config: &PendingConfig,
    ) -> RelayerResult<Self> {
        Ok(Self {
            store,
            utxos,
            mpkh: parse_mpkh(&config.mpkh)?,
            network: config.network,
            min_confirmations: config.min_confirmations,
            no_dispatch_controller: config.no_dispatch_controller,
            loan_controllers: ControllerTable::loan(),
            visits: VisitLog::default(),
            idle_interval: Duration::from_millis(config.idle_interval_ms),
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    /// Examine the head of the pending queue
    pub async fn run(&self) -> RelayerResult<PendingOutcome> {
        let Some(item) = self.store.peek_head(PENDING_QUEUE).await? else {
            return Ok(PendingOutcome::Empty);
        };
        crate::metrics::record_pending_examined();

        match self.examine(&item).await {
            Ok(Examination::Unconfirmed) => {
                self.store.rotate(PENDING_QUEUE).await?;
                Ok(PendingOutcome::Unconfirmed)
            }
            Ok(Examination::Confirmed(graduation)) => {
                self.graduate(&item, graduation).await?;
                Ok(PendingOutcome::Graduated)
            }
            Err(e) if e.is_permanent() => {
                if let Some(gateway) = self.gateway_for(&item) {
                    self.visits.forget(&gateway);
                }
                quarantine_head(self.store.as_ref(), PENDING_QUEUE, item, &e).await?;
                Ok(PendingOutcome::Quarantined)
            }
            Err(e) => {
                warn!("Pending request deferred: {}", e);
                Ok(PendingOutcome::Deferred)
            }
        }
    }

    /// Gateway of a queued request, if it decodes
    fn gateway_for(&self, item: &str) -> Option<String> {
        let request: TransferRequest = serde_json::from_str(item).ok()?;
        compute_gateway_address(&request, &self.mpkh, self.network).ok()
    }

    /// Check one request for a confirmed deposit; no queue side effects
    async fn examine(&self, item: &str) -> RelayerResult<Examination> {
        let request: TransferRequest = decode(PENDING_QUEUE, item)?;
        let gateway = compute_gateway_address(&request, &self.mpkh, self.network)?;

        let visit = self.visits.record(&gateway);
        debug!(
            "Checking gateway {} (visit {}, waiting since {})",
            gateway, visit.count, visit.first_seen
        );

        let utxos = self
            .utxos
            .confirmed_utxos(&gateway, self.min_confirmations)
            .await?;
        if utxos.is_empty() {
            return Ok(Examination::Unconfirmed);
        }

        let block_number = self.utxos.tip_height().await?;

        let loan = if request.contract_address == self.no_dispatch_controller {
            None
        } else {
            Some(DispatchJob::new(
                request.contract_address,
                encode_loan(&request)?,
                self.loan_controllers.chain_id(request.contract_address)?,
            ))
        };

        info!(
            "Deposit confirmed at {}: {} outputs, {} sats",
            gateway,
            utxos.len(),
            utxos.iter().map(|u| u.amount).sum::<u64>()
        );

        Ok(Examination::Confirmed(Graduation {
            gateway,
            loan,
            watch: WatchJob {
                block_number,
                transfer_request: request,
            },
        }))
    }

    /// Hand a confirmed request to the next stages, then drop it from pending
    async fn graduate(&self, item: &str, graduation: Graduation) -> RelayerResult<()> {
        let store = self.store.as_ref();

        if let Some(loan) = &graduation.loan {
            enqueue(store, DISPATCH_QUEUE, loan).await?;
        }
        enqueue(store, WATCH_QUEUE, &graduation.watch).await?;

        let removed = store.remove_at(PENDING_QUEUE, 0).await?;
        if removed.as_deref() != Some(item) {
            warn!("Head of {} changed while graduating {}", PENDING_QUEUE, graduation.gateway);
        }

        self.visits.forget(&graduation.gateway);
        crate::metrics::record_deposit_confirmed();
        Ok(())
    }

    #[cfg(test)]
    pub fn visits(&self) -> &VisitLog {
        &self.visits
    }

    /// Poll until stopped
    pub async fn run_loop(&self) -> RelayerResult<()> {
        info!("Deposit watcher started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            match self.run().await {
                Ok(PendingOutcome::Empty) | Ok(PendingOutcome::Deferred) => {
                    tokio::time::sleep(self.idle_interval).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Deposit watcher cycle failed: {}", e);
                    tokio::time::sleep(self.idle_interval).await;
                }
            }
        }

        info!("Deposit watcher stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}
