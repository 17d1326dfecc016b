//! Stafflane API Server Entry Point
//!
//! Builds the queue from the environment, registers the built-in
//! capabilities, and serves the Axum router until ctrl-c.

use stafflane_api::capabilities::register_builtin;
use stafflane_api::telemetry::init_tracing;
use stafflane_api::{create_router, ApiConfig, ApiError, ApiResult, AppState};
use stafflane_queue::OperationQueue;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing()?;

    let api_config = ApiConfig::from_env()?;
    let queue = OperationQueue::from_env()?;
    register_builtin(&queue).await;
    queue.start()?;

    let app = create_router(AppState::new(queue.clone(), &api_config));

    let addr = api_config.bind_addr;
    tracing::info!(%addr, "Starting Stafflane API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    queue.shutdown().await;
    tracing::info!("Stafflane API server stopped");
    Ok(())
}
