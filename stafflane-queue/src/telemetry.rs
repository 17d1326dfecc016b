//! Prometheus Metrics Definitions
//!
//! Each queue owns its own `Registry`, so several queues (for example in
//! tests) never collide on metric names.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use stafflane_core::{ErrorKind, OperationStatus, Priority, QueueError, QueueResult};
use std::time::Duration;

/// Handler execution buckets (seconds)
/// Covers: 10ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s, 60s, 120s, 300s
const EXECUTION_BUCKETS: &[f64] = &[
    0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn telemetry_error(metric: &str, err: prometheus::Error) -> QueueError {
    QueueError::Telemetry {
        reason: format!("Failed to register {metric}: {err}"),
    }
}

/// Container for all queue metrics.
#[derive(Clone)]
pub struct QueueTelemetry {
    registry: Registry,

    /// Operations reaching a status - labels: priority, status
    pub operations_total: IntCounterVec,

    /// Handler execution time - labels: capability
    pub execution_duration_seconds: HistogramVec,

    /// Scheduled retries - labels: kind
    pub retries_total: IntCounterVec,

    /// Executions rejected by an open circuit
    pub circuit_rejections_total: IntCounter,

    /// Ids waiting per lane - labels: priority
    pub lane_depth: IntGaugeVec,

    /// Handlers currently executing
    pub running_operations: IntGauge,

    /// Circuits currently open or half-open
    pub open_circuits: IntGauge,
}

impl QueueTelemetry {
    /// Create and register all metrics on a fresh registry.
    pub fn new() -> QueueResult<Self> {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new(
                "stafflane_operations_total",
                "Operations reaching each status",
            ),
            &["priority", "status"],
        )
        .map_err(|e| telemetry_error("operations_total", e))?;

        let execution_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "stafflane_execution_duration_seconds",
                "Handler execution time in seconds",
            )
            .buckets(EXECUTION_BUCKETS.to_vec()),
            &["capability"],
        )
        .map_err(|e| telemetry_error("execution_duration_seconds", e))?;

        let retries_total = IntCounterVec::new(
            Opts::new("stafflane_retries_total", "Retries scheduled by error kind"),
            &["kind"],
        )
        .map_err(|e| telemetry_error("retries_total", e))?;

        let circuit_rejections_total = IntCounter::new(
            "stafflane_circuit_rejections_total",
            "Executions rejected by an open circuit",
        )
        .map_err(|e| telemetry_error("circuit_rejections_total", e))?;

        let lane_depth = IntGaugeVec::new(
            Opts::new("stafflane_lane_depth", "Operations waiting per priority lane"),
            &["priority"],
        )
        .map_err(|e| telemetry_error("lane_depth", e))?;

        let running_operations = IntGauge::new(
            "stafflane_running_operations",
            "Handlers currently executing",
        )
        .map_err(|e| telemetry_error("running_operations", e))?;

        let open_circuits = IntGauge::new(
            "stafflane_open_circuits",
            "Circuits currently open or half-open",
        )
        .map_err(|e| telemetry_error("open_circuits", e))?;

        registry
            .register(Box::new(operations_total.clone()))
            .map_err(|e| telemetry_error("operations_total", e))?;
        registry
            .register(Box::new(execution_duration_seconds.clone()))
            .map_err(|e| telemetry_error("execution_duration_seconds", e))?;
        registry
            .register(Box::new(retries_total.clone()))
            .map_err(|e| telemetry_error("retries_total", e))?;
        registry
            .register(Box::new(circuit_rejections_total.clone()))
            .map_err(|e| telemetry_error("circuit_rejections_total", e))?;
        registry
            .register(Box::new(lane_depth.clone()))
            .map_err(|e| telemetry_error("lane_depth", e))?;
        registry
            .register(Box::new(running_operations.clone()))
            .map_err(|e| telemetry_error("running_operations", e))?;
        registry
            .register(Box::new(open_circuits.clone()))
            .map_err(|e| telemetry_error("open_circuits", e))?;

        Ok(Self {
            registry,
            operations_total,
            execution_duration_seconds,
            retries_total,
            circuit_rejections_total,
            lane_depth,
            running_operations,
            open_circuits,
        })
    }

    pub fn record_status(&self, priority: Priority, status: OperationStatus) {
        self.operations_total
            .with_label_values(&[priority.as_str(), status.as_str()])
            .inc();
    }

    pub fn record_execution(&self, capability: &str, duration: Duration) {
        self.execution_duration_seconds
            .with_label_values(&[capability])
            .observe(duration.as_secs_f64());
    }

    pub fn record_retry(&self, kind: ErrorKind) {
        self.retries_total.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn set_lane_depth(&self, priority: Priority, depth: usize) {
        self.lane_depth
            .with_label_values(&[priority.as_str()])
            .set(depth as i64);
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode(&self) -> QueueResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| QueueError::Telemetry {
                reason: format!("Failed to encode metrics: {e}"),
            })?;
        String::from_utf8(buffer).map_err(|e| QueueError::Telemetry {
            reason: format!("Metrics output is not UTF-8: {e}"),
        })
    }
}
