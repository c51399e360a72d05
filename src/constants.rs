// src/constants.rs
//
// Central location for the tunables used throughout fsload. Keeping the
// magic numbers in one place makes tuning and maintenance easier.

use std::time::Duration;

// =============================================================================
// Scheduling
// =============================================================================

/// One scheduling tick: the window over which `target_rate` emissions are
/// spread evenly.
pub const TICK_DURATION: Duration = Duration::from_secs(1);

/// Flat buffer subtracted from every pacing sleep to cover the cost of the
/// pacing calculation itself.
pub const PACING_SLACK: Duration = Duration::from_micros(50);

/// Sleep between scheduler loop iterations while waiting for the next tick.
pub const SCHEDULER_IDLE_SLEEP: Duration = Duration::from_micros(50);

/// CREATE + PUT emissions allowed per tick before the oracle is told to
/// stop handing out writes.
pub const DEFAULT_MAX_WRITES_PER_TICK: usize = 30;

/// A consistency probe performs four HTTP requests but enqueues one task.
pub const CONSISTENCY_REQUEST_WEIGHT: i64 = 4;

/// Window at the start of a run during which every fresh-file decision is
/// promoted to a consistency probe.
pub const CONSISTENCY_WARMUP: Duration = Duration::from_secs(5);

/// Length of generated file names.
pub const FILE_NAME_LEN: usize = 15;

/// Request-rate ramp cadence: `ramp_factor` grows once per this interval
/// when the request ramp is enabled.
pub const RAMP_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// Executor
// =============================================================================

/// Per-request timeout on the shared HTTP client. Generous because the
/// server adds hundreds of milliseconds of artificial latency per request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Idle connections kept per host; sized for the peak in-flight task count.
pub const POOL_MAX_IDLE_PER_HOST: usize = 512;

/// Upper bound on the randomized busy-wait jitter while a filename is
/// already in flight.
pub const IN_FLIGHT_JITTER_MAX_MS: u64 = 100;

// =============================================================================
// Payload sizing
// =============================================================================

/// Probability of keeping a drawn size that landed in the upper half of the
/// range; otherwise it is halved, skewing the population toward small files.
pub const LARGE_SIZE_KEEP_PROBABILITY: f64 = 0.2;

/// Chance (1-in-N) of overriding a drawn size with `HUGE_FILE_SIZE` when
/// large uploads are enabled.
pub const HUGE_FILE_ODDS: u32 = 100;

/// Fixed size used for the occasional oversized upload.
pub const HUGE_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// File-size ramp cadence: `max_file_size` is multiplied by 3/2 every
/// interval while the file ramp is enabled.
pub const FILE_RAMP_INTERVAL: Duration = Duration::from_secs(15);

// =============================================================================
// Aggregation
// =============================================================================

/// Lifetime failures tolerated before the aggregator closes the shutdown
/// signal.
pub const MAX_FAILURES_BEFORE_EXIT: u64 = 1000;

/// Poll interval of the tick-roller task.
pub const ROLL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Number of per-tick samples kept in each rolling window.
pub const ROLLING_WINDOW_TICKS: usize = 4;

/// Capacity of each error ring buffer.
pub const ERROR_RING_CAPACITY: usize = 64;

/// Errors shown per table in the dashboard.
pub const ERRORS_DISPLAYED: usize = 5;

/// Grace period for draining the result stream after shutdown is signaled.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Dashboard repaint interval.
pub const DASHBOARD_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Channel capacities
// =============================================================================

/// Scheduled requests waiting for the executor.
pub const REQUEST_QUEUE_CAPACITY: usize = 50_000;

/// Outcomes waiting for the aggregator.
pub const RESULT_STREAM_CAPACITY: usize = 15_000;

/// Failure/success fan-out to the oracle; lossy under backlog.
pub const FEEDBACK_STREAM_CAPACITY: usize = 1_000;

// =============================================================================
// File server
// =============================================================================

/// Concurrent in-flight requests admitted before the server throttles.
pub const SERVER_MAX_CONNECTIONS: usize = 15;

/// Artificial latency added to every admitted request.
pub const SERVER_BASE_LATENCY: Duration = Duration::from_millis(333);

/// Default listen port.
pub const SERVER_DEFAULT_PORT: u16 = 1234;

/// Default URL prefix under which files are addressed.
pub const DEFAULT_PATH_PREFIX: &str = "api/fileserver";

// =============================================================================
// Histograms
// =============================================================================

/// Latency histogram bounds: 1 µs to 1 hour, 3 significant digits.
pub const HIST_MIN_US: u64 = 1;
pub const HIST_MAX_US: u64 = 3_600_000_000;
pub const HIST_SIGFIGS: u8 = 3;
