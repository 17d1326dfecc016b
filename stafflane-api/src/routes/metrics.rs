//! Metrics endpoints

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use stafflane_queue::{MetricsHistory, MetricsSnapshot};

/// Prometheus text exposition.
pub async fn prometheus_metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state.queue.render_prometheus()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// Snapshot computed at request time.
pub async fn metrics_snapshot(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.queue.metrics_snapshot().await)
}

pub async fn metrics_history(State(state): State<AppState>) -> Json<MetricsHistory> {
    Json(state.queue.metrics_history())
}
