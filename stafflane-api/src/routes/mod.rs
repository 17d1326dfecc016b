//! REST API Routes
//!
//! - `/health` and `/metrics` at the root
//! - operation and metrics resources under `/api/v1`
//! - the status WebSocket at `/api/v1/ws`

use crate::state::AppState;
use crate::ws;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod health;
pub mod metrics;
pub mod operations;

/// Build the complete application router.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/operations",
            post(operations::submit_operation).get(operations::list_operations),
        )
        .route(
            "/operations/:id",
            get(operations::get_operation).delete(operations::cancel_operation),
        )
        .route("/queue/status", get(operations::queue_status))
        .route("/metrics", get(metrics::metrics_snapshot))
        .route("/metrics/history", get(metrics::metrics_history))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::prometheus_metrics))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
