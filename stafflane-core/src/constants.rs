//! Constants for Stafflane
//!
//! Default values for every configuration knob. `config.rs` builds its
//! `Default` impls from these.

// ============================================================================
// WORKERS
// ============================================================================

/// Workers spawned per priority lane
pub const DEFAULT_WORKERS_PER_LANE: usize = 5;

/// Deadline for a single handler invocation in seconds (5 minutes)
pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 300;

/// Number of terminal operations kept readable after they finish
pub const DEFAULT_FINISHED_RETENTION: usize = 1000;

// ============================================================================
// RETRY
// ============================================================================

/// Base delay for linear/exponential backoff in milliseconds
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound on any computed retry delay in milliseconds
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;

/// Base delay used for RESOURCE_BUSY failures in milliseconds
pub const DEFAULT_RESOURCE_BUSY_BASE_DELAY_MS: u64 = 5_000;

/// Fractional jitter applied to exponential delays (±10%)
pub const DEFAULT_RETRY_JITTER: f64 = 0.1;

/// Largest jitter that keeps exponential delays monotone in the attempt number
pub const MAX_RETRY_JITTER: f64 = 0.3;

/// Keys with more total failures than this are limited to one retry
pub const DEFAULT_ADAPTIVE_TOTAL_FAILURE_LIMIT: u32 = 10;

/// Keys with more consecutive failures than this get a doubled base delay
pub const DEFAULT_ADAPTIVE_CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Minimum retries for deployment and maintenance operations
pub const CRITICAL_TYPE_MIN_RETRIES: u32 = 5;

/// Base delay for deployment and maintenance operations in milliseconds
pub const CRITICAL_TYPE_BASE_DELAY_MS: u64 = 2_000;

/// Retry cap for testing and documentation operations
pub const LIGHTWEIGHT_TYPE_MAX_RETRIES: u32 = 2;

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Consecutive failures that open a circuit
pub const DEFAULT_CIRCUIT_CONSECUTIVE_THRESHOLD: u32 = 5;

/// Failures within the window that open a circuit
pub const DEFAULT_CIRCUIT_WINDOW_THRESHOLD: u32 = 10;

/// Failure counting window in seconds (5 minutes)
pub const DEFAULT_CIRCUIT_FAILURE_WINDOW_SECS: u64 = 300;

/// Time an open circuit waits before allowing a trial call, in seconds
pub const DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS: u64 = 60;

/// Breakers older than this are dropped by cleanup, in seconds (30 minutes)
pub const DEFAULT_CIRCUIT_BREAKER_TTL_SECS: u64 = 1_800;

/// Failure records idle longer than this are dropped, in seconds (1 hour)
pub const DEFAULT_CIRCUIT_RECORD_IDLE_TTL_SECS: u64 = 3_600;

/// Cleanup job period in seconds (5 minutes)
pub const DEFAULT_CIRCUIT_CLEANUP_INTERVAL_SECS: u64 = 300;

// ============================================================================
// PUBLISHER
// ============================================================================

/// Per-subscriber channel capacity
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Queue status broadcast period in seconds
pub const DEFAULT_QUEUE_STATUS_INTERVAL_SECS: u64 = 5;

// ============================================================================
// METRICS
// ============================================================================

/// Metrics sampling period in seconds
pub const DEFAULT_METRICS_SAMPLE_INTERVAL_SECS: u64 = 60;

/// Full-resolution history window in seconds (1 hour)
pub const DEFAULT_METRICS_FULL_WINDOW_SECS: u64 = 3_600;

/// Downsampled history window in seconds (24 hours)
pub const DEFAULT_METRICS_DOWNSAMPLED_WINDOW_SECS: u64 = 86_400;

/// Spacing of downsampled history points in seconds (15 minutes)
pub const DEFAULT_METRICS_DOWNSAMPLE_INTERVAL_SECS: u64 = 900;

// ============================================================================
// HEALTH
// ============================================================================

/// Queue depth per lane above which the engine reports degraded
pub const DEGRADED_QUEUE_DEPTH: usize = 1_000;
