//! Shared router state

use crate::config::ApiConfig;
use stafflane_queue::OperationQueue;
use std::time::Duration;

/// State handed to every route.
#[derive(Clone, Debug)]
pub struct AppState {
    pub queue: OperationQueue,
    pub ws_heartbeat_timeout: Duration,
}

impl AppState {
    pub fn new(queue: OperationQueue, config: &ApiConfig) -> Self {
        Self {
            queue,
            ws_heartbeat_timeout: config.ws_heartbeat_timeout,
        }
    }
}
