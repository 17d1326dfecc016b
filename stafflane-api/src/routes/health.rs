//! Health Check Endpoint
//!
//! Returns 200 for healthy or degraded queues and 503 when workers are not
//! running.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use stafflane_core::HealthStatus;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.queue.health().await;
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}
