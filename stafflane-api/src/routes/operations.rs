//! Operation REST Routes

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use stafflane_core::{Operation, OperationId, OperationRequest};
use stafflane_queue::QueueStatus;
use tracing::info;

/// POST /api/v1/operations
pub async fn submit_operation(
    State(state): State<AppState>,
    Json(request): Json<OperationRequest>,
) -> ApiResult<(StatusCode, Json<Operation>)> {
    let op = state.queue.submit(request).await?;
    info!(operation_id = %op.id, capability = %op.capability, "Operation submitted via API");
    Ok((StatusCode::CREATED, Json(op)))
}

/// GET /api/v1/operations
pub async fn list_operations(State(state): State<AppState>) -> Json<Vec<Operation>> {
    Json(state.queue.list_active().await)
}

/// GET /api/v1/operations/:id
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<OperationId>,
) -> ApiResult<Json<Operation>> {
    state
        .queue
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::operation_not_found(id))
}

/// DELETE /api/v1/operations/:id
pub async fn cancel_operation(
    State(state): State<AppState>,
    Path(id): Path<OperationId>,
) -> ApiResult<Json<Operation>> {
    let op = state.queue.cancel(id).await?;
    Ok(Json(op))
}

/// GET /api/v1/queue/status
pub async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.queue.queue_status().await)
}
