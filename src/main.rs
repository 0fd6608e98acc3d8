//! Zero Keeper - queue-driven BTC deposit to EVM loan/repay pipeline
//!
//! The keeper watches pending transfer requests for confirmed BTC deposits,
//! waits for the signing network to settle them, and dispatches the
//! resulting loan and repay transactions to their controller chains.

use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod error;
mod metrics;
mod pipeline;
mod queue;
mod routing;
mod sources;
mod transfer;

use chain::ChainRegistry;
use config::{QueueBackend, Settings};
use metrics::MetricsServer;
use pipeline::{Dispatcher, PendingProcess, WatcherProcess};
use queue::{MemoryQueueStore, PgQueueStore, QueueStore};
use sources::{EsploraClient, HttpSignatureSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Zero Keeper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {} ({} chains enabled)",
        settings.relayer.instance_id,
        settings.enabled_chains().len()
    );

    let store = init_queue_store(&settings).await?;

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    let pending = if settings.pending.enabled {
        let utxos = EsploraClient::new(&settings.pending.utxo_api_url)?;
        let process = PendingProcess::new(store.clone(), Arc::new(utxos), &settings.pending)?;
        info!("Deposit watcher initialized ({:?})", settings.pending.network);
        Some(Arc::new(process))
    } else {
        None
    };

    let watcher = if settings.watcher.enabled {
        let signatures = HttpSignatureSource::new(
            &settings.watcher.signing_network_url,
            Duration::from_millis(settings.watcher.signature_poll_interval_ms),
        )?;
        info!("Settlement watcher initialized");
        Some(Arc::new(WatcherProcess::new(
            store.clone(),
            Arc::new(signatures),
            &settings.watcher,
        )))
    } else {
        None
    };

    let (chains, dispatcher) = if settings.dispatcher.enabled {
        let wallet = load_wallet(&settings)?;
        let chains = Arc::new(ChainRegistry::from_settings(&settings, wallet).await?);
        for chain_id in chains.connected_chains() {
            if let Some(chain) = settings.get_chain_by_id(chain_id) {
                info!("Dispatching to {} (ID: {})", chain.name, chain_id);
            }
        }
        let dispatcher = Dispatcher::new(store.clone(), chains.clone(), &settings.dispatcher);
        (Some(chains), Some(Arc::new(dispatcher)))
    } else {
        (None, None)
    };

    let mut handles = Vec::new();

    // Start API server
    handles.push(tokio::spawn({
        let state = api::AppState {
            store: store.clone(),
            chains: chains.clone(),
            mpkh: transfer::parse_mpkh(&settings.pending.mpkh).ok(),
            network: settings.pending.network,
            no_dispatch_controller: settings.pending.no_dispatch_controller,
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    }));

    // Start metrics server
    if let Some(server) = metrics_server {
        handles.push(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }));
    }

    if let Some(process) = pending.clone() {
        handles.push(tokio::spawn(async move {
            if let Err(e) = process.run_loop().await {
                error!("Deposit watcher error: {}", e);
            }
        }));
    }

    if let Some(process) = watcher.clone() {
        handles.push(tokio::spawn(async move {
            if let Err(e) = process.run_loop().await {
                error!("Settlement watcher error: {}", e);
            }
        }));
    }

    if let Some(dispatcher) = dispatcher.clone() {
        handles.push(tokio::spawn(async move {
            if let Err(e) = dispatcher.run_loop().await {
                error!("Dispatcher error: {}", e);
            }
        }));
    }

    // Health check loop
    handles.push(tokio::spawn({
        let store = store.clone();
        let chains = chains.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;
                let mut healthy = true;

                if let Some(chains) = &chains {
                    for (chain_id, ok) in chains.health_check().await {
                        if !ok {
                            warn!("Chain {} health check failed", chain_id);
                            healthy = false;
                        }
                    }
                }

                if let Err(e) = store.health_check().await {
                    warn!("Queue store health check failed: {}", e);
                    healthy = false;
                }

                match queue::queue_lengths(store.as_ref()).await {
                    Ok(lengths) => info!("Queue lengths: {:?}", lengths),
                    Err(e) => warn!("Could not read queue lengths: {}", e),
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    }));

    info!("Zero Keeper is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    if let Some(process) = &pending {
        process.stop().await;
    }
    if let Some(process) = &watcher {
        process.stop().await;
    }
    if let Some(dispatcher) = &dispatcher {
        dispatcher.stop().await;
    }

    // Abort background tasks
    for handle in handles {
        handle.abort();
    }

    info!("Zero Keeper stopped");
    Ok(())
}

async fn init_queue_store(settings: &Settings) -> Result<Arc<dyn QueueStore>> {
    match settings.queue.backend {
        QueueBackend::Postgres => {
            let store = PgQueueStore::new(&settings.queue).await?;
            info!("Database connection established");

            store.run_migrations().await?;
            info!("Database migrations complete");
            Ok(Arc::new(store))
        }
        QueueBackend::Memory => {
            warn!("Using in-memory queues, state is lost on restart");
            Ok(Arc::new(MemoryQueueStore::new()))
        }
    }
}

fn load_wallet(settings: &Settings) -> Result<LocalWallet> {
    let var = &settings.wallet.private_key_env;
    let key = std::env::var(var).with_context(|| format!("{} is not set", var))?;
    key.trim_start_matches("0x")
        .parse::<LocalWallet>()
        .with_context(|| format!("{} is not a valid private key", var))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,zero_keeper=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
