//! HTTP routes for block submission, balance queries and rollback.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::model::Block;
use crate::AppState;

/// Build the router over the shared indexer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/blocks", post(submit_block))
        .route("/balance/:address", get(get_balance))
        .route("/rollback", post(rollback))
        .route("/height", get(height))
        .route("/health", get(health))
        .route("/version", get(version))
        .with_state(state)
}

/// Error body: `{ "error": <message>, "kind": <variant> }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

pub struct ApiError(IndexerError);

impl From<IndexerError> for ApiError {
    fn from(e: IndexerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IndexerError::Rejected(_) => StatusCode::BAD_REQUEST,
            IndexerError::ProjectionFailed(_) | IndexerError::RollbackFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            IndexerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockAccepted {
    pub message: String,
    pub id: String,
    pub height: u64,
    pub entries: usize,
}

/// POST /blocks
pub async fn submit_block(
    State(state): State<AppState>,
    Json(block): Json<Block>,
) -> Result<Json<BlockAccepted>, ApiError> {
    let accepted = state.indexer.submit_block(block).await?;
    Ok(Json(BlockAccepted {
        message: "Block processed successfully".into(),
        id: accepted.id,
        height: accepted.height,
        entries: accepted.entries,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResp {
    pub address: String,
    pub balance: i64,
}

/// GET /balance/:address
pub async fn get_balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<BalanceResp>, ApiError> {
    let balance = state.indexer.get_balance(&address).await?;
    Ok(Json(BalanceResp { address, balance }))
}

#[derive(Debug, Deserialize)]
pub struct RollbackParams {
    pub height: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RollbackResp {
    pub message: String,
    pub height: u64,
    pub removed_blocks: usize,
}

/// POST /rollback?height=N
pub async fn rollback(
    State(state): State<AppState>,
    Query(params): Query<RollbackParams>,
) -> Result<Json<RollbackResp>, ApiError> {
    let done = state.indexer.rollback(params.height).await?;
    Ok(Json(RollbackResp {
        message: "Rollback successful".into(),
        height: done.to_height,
        removed_blocks: done.removed_blocks,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeightResp {
    pub height: u64,
}

/// GET /height
pub async fn height(State(state): State<AppState>) -> Result<Json<HeightResp>, ApiError> {
    let height = state.indexer.current_height().await?;
    Ok(Json(HeightResp { height }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResp {
    pub store: String,
    pub height: Option<u64>,
}

/// GET /health, 503 while the ledger store cannot be read.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResp>) {
    match state.indexer.current_height().await {
        Ok(height) => (
            StatusCode::OK,
            Json(HealthResp {
                store: "ok".into(),
                height: Some(height),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read the store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResp {
                    store: e.kind().into(),
                    height: None,
                }),
            )
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResp {
    pub name: String,
    pub version: String,
}

/// GET /version
pub async fn version() -> Json<VersionResp> {
    Json(VersionResp {
        name: env!("CARGO_PKG_NAME").into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
