//! Stafflane Queue - Priority Execution Engine
//!
//! In-memory operation queue for agent capabilities:
//!
//! - three FIFO priority lanes, each drained by its own worker pool
//! - a retry engine that classifies failures and schedules backoff
//! - per project/agent circuit breakers
//! - scoped status event fan-out to subscribers
//! - rolling metrics history plus a Prometheus registry
//!
//! ```ignore
//! let queue = OperationQueue::new(EngineConfig::from_env())?;
//! queue.register_fn("echo", |ctx| async move { Ok(ctx.params().clone()) }).await;
//! queue.start()?;
//! let op = queue.submit(OperationRequest::new("proj", "agent", "echo")).await?;
//! ```

pub mod circuit;
pub mod events;
mod jobs;
pub mod lane;
pub mod metrics;
pub mod publisher;
pub mod registry;
pub mod retry;
mod service;
pub mod table;
pub mod telemetry;
mod worker;

pub use circuit::{CircuitRegistry, CleanupStats, FailureHistory};
pub use events::{OperationEvent, QueueStatus, StatusEvent};
pub use lane::{Lane, LaneEntry, LaneSnapshot, Lanes};
pub use metrics::{
    MetricsAggregator, MetricsHistory, MetricsSnapshot, OperationMetrics, SystemMetrics,
};
pub use publisher::{StatusPublisher, SubscriberId, Subscription};
pub use registry::HandlerRegistry;
pub use retry::{backoff_delay, ResolvedPolicy, RetryDecision, RetryEngine};
pub use service::OperationQueue;
pub use table::{ActiveCounts, Applied, OperationTable};
pub use telemetry::QueueTelemetry;
