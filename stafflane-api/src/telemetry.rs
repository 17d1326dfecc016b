//! Logging initialization

use crate::error::{ApiError, ApiResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "stafflane_queue=debug,stafflane_api=debug,tower_http=debug,info";

/// Install the global tracing subscriber.
///
/// Filtering comes from `RUST_LOG`. `STAFFLANE_LOG_FORMAT=json` switches the
/// formatter to JSON lines.
pub fn init_tracing() -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("STAFFLANE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(json, "Logging initialized");
    Ok(())
}
