//! HTTP API for health checks, queue status and request submission

use crate::chain::ChainRegistry;
use crate::config::{ApiConfig, BtcNetwork};
use crate::error::{RelayerError, RelayerResult};
use crate::queue::{enqueue, queue_lengths, QueueStore, PENDING_QUEUE};
use crate::routing::ControllerTable;
use crate::transfer::{compute_gateway_address, TransferRequest};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, H256};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QueueStore>,
    /// Present only when this instance dispatches
    pub chains: Option<Arc<ChainRegistry>>,
    /// Signing network key hash; request intake is off without it
    pub mpkh: Option<[u8; 20]>,
    pub network: BtcNetwork,
    /// Repay-only intake; every other controller must also route a loan
    pub no_dispatch_controller: Address,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/queues", get(get_queues))
        .route("/requests", post(submit_request))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RelayerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Config(format!("api bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("api server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - queue store and, when dispatching, every chain
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let queue_store = state.store.health_check().await.is_ok();

    let chain_health = match &state.chains {
        Some(chains) => chains.health_check().await,
        None => Vec::new(),
    };
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);
    let ready = queue_store && chains_ok;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            queue_store,
            chains: chains_ok,
            details: chain_health
                .into_iter()
                .map(|(id, h)| ChainHealth {
                    chain_id: id,
                    healthy: h,
                })
                .collect(),
        }),
    )
}

/// Lengths of every queue, quarantine included
async fn get_queues(State(state): State<AppState>) -> impl IntoResponse {
    match queue_lengths(state.store.as_ref()).await {
        Ok(lengths) => (
            StatusCode::OK,
            Json(QueuesResponse {
                queues: lengths
                    .into_iter()
                    .map(|(name, length)| QueueLength {
                        name: name.to_string(),
                        length,
                    })
                    .collect(),
            }),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, &e),
    }
}

/// Accept a signed transfer request into the pending queue
async fn submit_request(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> impl IntoResponse {
    let Some(mpkh) = state.mpkh else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &RelayerError::Config("request intake is disabled".to_string()),
        );
    };

    let accepted = match validate(
        &request,
        &mpkh,
        state.network,
        state.no_dispatch_controller,
    ) {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!("Rejected transfer request: {}", e);
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e);
        }
    };

    if let Err(e) = enqueue(state.store.as_ref(), PENDING_QUEUE, &request).await {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, &e);
    }

    info!(
        "Accepted transfer request for {:?}, deposit to {}",
        accepted.destination, accepted.gateway_address
    );
    (StatusCode::ACCEPTED, Json(accepted)).into_response()
}

/// Reject what the deposit or settlement watcher would later quarantine:
/// a bad destination, or a controller missing from the loan or repay table
fn validate(
    request: &TransferRequest,
    mpkh: &[u8; 20],
    network: BtcNetwork,
    no_dispatch_controller: Address,
) -> RelayerResult<AcceptedResponse> {
    let destination = request.destination()?;
    if request.contract_address != no_dispatch_controller {
        ControllerTable::loan().chain_id(request.contract_address)?;
    }
    ControllerTable::repay().chain_id(request.contract_address)?;

    Ok(AcceptedResponse {
        gateway_address: compute_gateway_address(request, mpkh, network)?,
        g_hash: request.g_hash()?,
        destination,
    })
}

fn error_response(status: StatusCode, error: &RelayerError) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    queue_store: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct QueuesResponse {
    queues: Vec<QueueLength>,
}

#[derive(Serialize)]
struct QueueLength {
    name: String,
    length: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptedResponse {
    gateway_address: String,
    g_hash: H256,
    destination: Address,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
