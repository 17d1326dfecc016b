//! Server configuration

use crate::error::{ApiError, ApiResult};
use std::net::SocketAddr;
use std::time::Duration;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default bind host.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Seconds without any client frame before a WebSocket is closed.
pub const DEFAULT_WS_HEARTBEAT_TIMEOUT_SECS: u64 = 35;

/// HTTP and WebSocket server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub ws_heartbeat_timeout: Duration,
}

impl ApiConfig {
    /// # Environment Variables
    /// - `STAFFLANE_API_BIND` (default: 0.0.0.0)
    /// - `PORT`, then `STAFFLANE_API_PORT` (default: 3000)
    /// - `STAFFLANE_WS_HEARTBEAT_TIMEOUT_SECS` (default: 35)
    pub fn from_env() -> ApiResult<Self> {
        let host = std::env::var("STAFFLANE_API_BIND").ok();
        let port = std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("STAFFLANE_API_PORT").ok());
        let heartbeat = std::env::var("STAFFLANE_WS_HEARTBEAT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_WS_HEARTBEAT_TIMEOUT_SECS);

        Ok(Self {
            bind_addr: resolve_bind_addr(host.as_deref(), port.as_deref())?,
            ws_heartbeat_timeout: Duration::from_secs(heartbeat),
        })
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            ws_heartbeat_timeout: Duration::from_secs(DEFAULT_WS_HEARTBEAT_TIMEOUT_SECS),
        }
    }
}

/// Build the bind address from optional host and port strings.
pub fn resolve_bind_addr(host: Option<&str>, port: Option<&str>) -> ApiResult<SocketAddr> {
    let host = host.unwrap_or(DEFAULT_BIND_HOST);
    let port = match port {
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", raw)))?,
        None => DEFAULT_PORT,
    };

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
