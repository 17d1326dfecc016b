//! Stafflane API - REST/WebSocket layer over the operation queue
//!
//! Exposes operation submission, lookup and cancellation over REST, the
//! health and Prometheus endpoints, and a scoped WebSocket status stream.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_router;
pub use state::AppState;
