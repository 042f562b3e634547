use std::collections::HashMap;
use std::time::Duration;

/// Rolling view of the run handed to progress consumers once per second.
#[derive(Debug, Clone)]
pub struct LiveMetrics {
    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,

    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub checks_failed_total: u64,
    pub iterations_total: u64,
    pub iterations_per_sec_now: f64,

    /// Aggregate requests/sec statistics across progress intervals.
    pub req_per_sec_avg: f64,
    pub req_per_sec_stdev: f64,
    pub req_per_sec_max: f64,
    pub req_per_sec_stdev_pct: f64,

    /// Whole-run latency stats (milliseconds) so far.
    pub latency_mean_ms: f64,
    pub latency_stdev_ms: f64,
    pub latency_max_ms: u64,
    pub latency_p50_ms: u64,
    pub latency_p75_ms: u64,
    pub latency_p90_ms: u64,
    pub latency_p99_ms: u64,

    /// Interval-only latency percentiles, absent when nothing landed.
    pub latency_p50_ms_now: Option<f64>,
    pub latency_p95_ms_now: Option<f64>,

    /// Failed requests/sec observed during the last progress interval.
    pub failed_rps_now: f64,
    /// Failed requests / total requests during the last interval (0..=1).
    pub error_rate_now: f64,
    /// Error breakdown during the last interval, keyed by status/kind.
    pub errors_now: HashMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone)]
pub enum ShapeProgress {
    ConstantVus {
        vus: u64,
        duration: Option<Duration>,
    },
    RampingVus {
        total_duration: Duration,
        stage: Option<StageProgress>,
    },
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub profile: String,
    pub metrics: LiveMetrics,
    pub progress: ShapeProgress,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
