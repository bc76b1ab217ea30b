//! HTTP API: transfer control for the UI plus health checks

use crate::bridge::CorrelationId;
use crate::config::ApiConfig;
use crate::coordination::{TransferOrchestrator, TransferRequest, TransferSnapshot};
use crate::error::{BridgeError, BridgeResult, TransferError};
use crate::state::{AttemptJournal, AttemptRecord};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransferOrchestrator>,
    pub journal: Option<Arc<AttemptJournal>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/transfer", get(get_transfer).post(start_transfer))
        .route("/transfer/cancel", post(cancel_transfer))
        .route("/transfer/reset", post(reset_transfer))
        .route("/transfers/:id", get(transfer_history))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> BridgeResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| BridgeError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Error response with a status derived from the failure
pub enum ApiError {
    Bridge(BridgeError),
    NotFound(String),
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        ApiError::Bridge(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: message,
                    detail: None,
                    retryable: None,
                },
            ),
            ApiError::Bridge(err) => {
                let status = match &err {
                    BridgeError::TransferInProgress { .. }
                    | BridgeError::InvalidStateTransition { .. }
                    | BridgeError::Transfer(TransferError::PossibleDuplicate { .. }) => {
                        StatusCode::CONFLICT
                    }
                    BridgeError::AccountMismatch { .. }
                    | BridgeError::InvalidCorrelationId(_)
                    | BridgeError::Transfer(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    warn!("API request failed: {}", err);
                }
                let detail = match &err {
                    BridgeError::Transfer(transfer) => Some(transfer.clone()),
                    _ => None,
                };
                let retryable = detail.as_ref().map(TransferError::is_retryable);
                (
                    status,
                    ErrorResponse {
                        error: err.to_string(),
                        detail,
                        retryable,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - journal and source chain
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let journal = match &state.journal {
        Some(journal) => Some(journal.health_check().await.is_ok()),
        None => None,
    };
    let source_chain = state.orchestrator.chain().health_check().await;
    let ready = source_chain && journal.unwrap_or(true);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            journal,
            source_chain,
            transfer_state: state.orchestrator.state().await.to_string(),
        }),
    )
}

async fn get_transfer(State(state): State<AppState>) -> Json<TransferSnapshot> {
    Json(state.orchestrator.snapshot().await)
}

/// Start a transfer and drive it in the background
async fn start_transfer(
    State(state): State<AppState>,
    Json(body): Json<StartTransferRequest>,
) -> Result<(StatusCode, Json<TransferSnapshot>), ApiError> {
    let request = TransferRequest {
        amount: body.amount,
        source_account: body
            .source_account
            .unwrap_or_else(|| state.orchestrator.chain().account()),
        destination_address: body.destination_address,
        acknowledge_duplicate_risk: body.acknowledge_duplicate_risk,
    };

    let snapshot = state.orchestrator.spawn(request).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

async fn cancel_transfer(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<TransferSnapshot>), ApiError> {
    let snapshot = state.orchestrator.cancel().await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

async fn reset_transfer(State(state): State<AppState>) -> Result<Json<TransferSnapshot>, ApiError> {
    state.orchestrator.reset().await?;
    Ok(Json(state.orchestrator.snapshot().await))
}

/// Journal history of one attempt
async fn transfer_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AttemptRecord>>, ApiError> {
    let journal = state
        .journal
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("attempt journal is disabled".to_string()))?;

    let correlation_id = CorrelationId::from_hex(&id)?;
    let history = journal.history(&correlation_id).await?;
    if history.is_empty() {
        return Err(ApiError::NotFound(format!("no attempt {}", correlation_id)));
    }

    Ok(Json(history))
}

// Request and response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartTransferRequest {
    amount: String,
    destination_address: String,
    #[serde(default)]
    source_account: Option<Address>,
    #[serde(default)]
    acknowledge_duplicate_risk: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessResponse {
    ready: bool,
    /// `None` when the journal is disabled
    journal: Option<bool>,
    source_chain: bool,
    transfer_state: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<TransferError>,
    /// Whether starting again from idle is safe
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
}
