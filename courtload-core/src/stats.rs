use hdrhistogram::Histogram;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use courtload_http::HttpTransportErrorKind;
use courtload_metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricsRegistry};

use crate::checks::Endpoint;

#[derive(Debug, Default)]
struct CheckCounters {
    total: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct CheckHandle {
    counters: Arc<CheckCounters>,
}

#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub name: String,
    pub total: u64,
    pub failed: u64,
}

/// One completed call against the scoring API, as seen by the stats sink.
#[derive(Debug, Clone, Copy)]
pub struct ApiCallMeta {
    pub endpoint: Endpoint,
    pub status: Option<u16>,
    /// If set, the call failed before a status was available.
    pub transport_error_kind: Option<HttpTransportErrorKind>,
    pub elapsed: Duration,
    pub body_len: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LatencySnapshot {
    pub mean_ms: f64,
    pub stdev_ms: f64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p75_ms: u64,
    pub p90_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub iterations_total: u64,
    pub checks_total: u64,
    pub checks_failed: u64,
    pub checks_by_name: Vec<CheckSummary>,
    pub run_duration_ms: u64,
    pub rps: f64,
    pub req_per_sec_avg: f64,
    pub req_per_sec_stdev: f64,
    pub req_per_sec_max: f64,
    pub req_per_sec_stdev_pct: f64,
    pub latency_p50_ms: Option<f64>,
    pub latency_p75_ms: Option<f64>,
    pub latency_p90_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub latency_mean_ms: Option<f64>,
    pub latency_stdev_ms: Option<f64>,
    pub latency_max_ms: Option<u64>,

    pub metrics: Vec<MetricSeriesSummary>,
}

/// Shared per-run aggregation sink. Every virtual user writes into it
/// concurrently; lost updates are prevented by atomics and coarse locks.
#[derive(Debug)]
pub struct RunStats {
    requests_total: AtomicU64,
    iterations_total: AtomicU64,
    checks_total: AtomicU64,
    checks_failed: AtomicU64,
    checks_by_name: Mutex<HashMap<Arc<str>, Arc<CheckCounters>>>,
    http_errors_total: AtomicU64,
    status_2xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    latency_us: Mutex<Histogram<u64>>,
    latency_us_window: Mutex<Histogram<u64>>,

    rps_samples: Mutex<RpsAgg>,

    metrics: Arc<MetricsRegistry>,
    metric_http_req_duration: MetricHandle,
    metric_http_req_failed: MetricHandle,
    metric_checks: MetricHandle,
    metric_api_errors: MetricHandle,
    metric_match_processing: MetricHandle,
    metric_response_size: MetricHandle,
    metric_iterations: MetricHandle,
    metric_iteration_duration: MetricHandle,
    metric_matches_sent: MetricHandle,
    metric_new_games_sent: MetricHandle,
    metric_score_updates_sent: MetricHandle,
}

#[derive(Debug, Default, Clone, Copy)]
struct RpsAgg {
    count: u64,
    mean: f64,
    m2: f64,
    max: f64,
}

impl RpsAgg {
    fn record(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }

        self.count = self.count.saturating_add(1);
        let delta = sample - self.mean;
        self.mean += delta / (self.count as f64);
        let delta2 = sample - self.mean;
        self.m2 += delta * delta2;
        self.max = self.max.max(sample);
    }

    fn summary(&self) -> (f64, f64, f64, f64) {
        if self.count == 0 {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let avg = self.mean;
        let stdev = if self.count >= 2 {
            (self.m2 / ((self.count - 1) as f64)).sqrt()
        } else {
            0.0
        };

        let stdev_pct = if avg > 0.0 {
            (stdev / avg) * 100.0
        } else {
            0.0
        };
        (avg, stdev, self.max, stdev_pct)
    }
}

impl Default for RunStats {
    fn default() -> Self {
        fn new_hist() -> Histogram<u64> {
            // Track up to 60s in microseconds (with 3 sigfigs).
            Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)
                .unwrap_or_else(|err| panic!("failed to init histogram: {err}"))
        }

        let metrics: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::default());
        let metric_http_req_duration = metrics.handle(MetricKind::Trend, "http_req_duration");
        let metric_http_req_failed = metrics.handle(MetricKind::Rate, "http_req_failed");
        let metric_checks = metrics.handle(MetricKind::Rate, "checks");
        let metric_api_errors = metrics.handle(MetricKind::Rate, "api_errors");
        let metric_match_processing = metrics.handle(MetricKind::Trend, "match_processing_duration");
        let metric_response_size = metrics.handle(MetricKind::Trend, "api_response_size_bytes");
        let metric_iterations = metrics.handle(MetricKind::Counter, "iterations");
        let metric_iteration_duration = metrics.handle(MetricKind::Trend, "iteration_duration");
        let metric_matches_sent = metrics.handle(MetricKind::Counter, "matches_sent");
        let metric_new_games_sent = metrics.handle(MetricKind::Counter, "new_games_sent");
        let metric_score_updates_sent = metrics.handle(MetricKind::Counter, "score_updates_sent");

        Self {
            requests_total: AtomicU64::new(0),
            iterations_total: AtomicU64::new(0),
            checks_total: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            checks_by_name: Mutex::new(HashMap::new()),
            http_errors_total: AtomicU64::new(0),
            status_2xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            latency_us: Mutex::new(new_hist()),
            latency_us_window: Mutex::new(new_hist()),

            rps_samples: Mutex::new(RpsAgg::default()),

            metrics,
            metric_http_req_duration,
            metric_http_req_failed,
            metric_checks,
            metric_api_errors,
            metric_match_processing,
            metric_response_size,
            metric_iterations,
            metric_iteration_duration,
            metric_matches_sent,
            metric_new_games_sent,
            metric_score_updates_sent,
        }
    }
}

impl RunStats {
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations_total.load(Ordering::Relaxed)
    }

    pub fn checks_failed_total(&self) -> u64 {
        self.checks_failed.load(Ordering::Relaxed)
    }

    pub fn failed_requests_total(&self) -> u64 {
        self.http_errors_total.load(Ordering::Relaxed)
            + self.status_4xx.load(Ordering::Relaxed)
            + self.status_5xx.load(Ordering::Relaxed)
    }

    pub fn record_iteration(&self, elapsed: Duration) {
        self.iterations_total.fetch_add(1, Ordering::Relaxed);
        self.metric_iterations.add(1.0);

        let ms = elapsed.as_secs_f64() * 1000.0;
        self.metric_iteration_duration.add(ms);
    }

    /// End-to-end time to replay one full match against the API.
    pub fn record_match_processing(&self, elapsed: Duration, tags: &[(String, String)]) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.metric_match_processing.add_with_tags(ms, tags);
    }

    /// Outcome of the primary correctness predicate for one call.
    pub fn record_primary_result(&self, ok: bool, tags: &[(String, String)]) {
        self.metric_api_errors.add_bool_with_tags(!ok, tags);
    }

    pub fn record_rps_sample(&self, rps_now: f64) {
        let mut agg = self
            .rps_samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        agg.record(rps_now);
    }

    fn record_http_status(&self, status: u16) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        match status {
            200..=299 => {
                self.status_2xx.fetch_add(1, Ordering::Relaxed);
            }
            400..=499 => {
                self.status_4xx.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.status_5xx.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn record_http_error(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.http_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_call(&self, call: ApiCallMeta, tags: &[(String, String)]) {
        let transport_error = call.transport_error_kind.is_some();

        if transport_error {
            self.record_http_error();
            let kind = call
                .transport_error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "transport_error".to_string());
            let h = self.check_handle(&format!("http_error:{kind}"));
            self.record_check_handle(&h, false);
        } else if let Some(status) = call.status {
            self.record_http_status(status);
            if status >= 400 {
                let h = self.check_handle(&format!("http_status:{status}"));
                self.record_check_handle(&h, false);
            }
        }
        self.record_latency(call.elapsed);

        let duration_ms = call.elapsed.as_secs_f64() * 1000.0;

        let mut merged_tags: Vec<(String, String)> = Vec::with_capacity(tags.len() + 2);
        merged_tags.extend_from_slice(tags);
        merged_tags.push(("endpoint".to_string(), call.endpoint.to_string()));
        if let Some(status) = call.status {
            merged_tags.push(("status".to_string(), status.to_string()));
        }

        self.metric_http_req_duration
            .add_with_tags(duration_ms, &merged_tags);
        self.metric_response_size
            .add_with_tags(call.body_len as f64, &merged_tags);

        let failed = transport_error || call.status.is_some_and(|s| s >= 400);
        self.metric_http_req_failed
            .add_bool_with_tags(failed, &merged_tags);

        let counter = match call.endpoint {
            Endpoint::MatchResults => Some(&self.metric_matches_sent),
            Endpoint::NewGame => Some(&self.metric_new_games_sent),
            Endpoint::UpdateScore => Some(&self.metric_score_updates_sent),
            Endpoint::Health => None,
        };
        if let Some(counter) = counter {
            counter.add_with_tags(1.0, tags);
        }
    }

    pub fn check_handle(&self, name: &str) -> CheckHandle {
        let counters = {
            let mut map = self
                .checks_by_name
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(v) = map.get(name) {
                v.clone()
            } else {
                let key: Arc<str> = Arc::from(name);
                let v = Arc::new(CheckCounters::default());
                map.insert(key, v.clone());
                v
            }
        };

        CheckHandle { counters }
    }

    pub fn record_check_handle(&self, handle: &CheckHandle, ok: bool) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.checks_failed.fetch_add(1, Ordering::Relaxed);
        }

        self.metric_checks.add_bool(ok);

        handle.counters.total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            handle.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let us = elapsed.as_micros();
        if us == 0 {
            return;
        }

        let value = us as u64;

        {
            let mut h = self
                .latency_us
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = h.record(value);
        }

        {
            let mut h = self
                .latency_us_window
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = h.record(value);
        }
    }

    /// (avg, stdev, max, stdev_pct) across the RPS samples recorded so far.
    pub fn req_per_sec_summary(&self) -> (f64, f64, f64, f64) {
        let agg = self
            .rps_samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        agg.summary()
    }

    /// Whole-run latency stats so far, in milliseconds.
    pub fn latency_snapshot_ms(&self) -> LatencySnapshot {
        let h = self
            .latency_us
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        #[allow(clippy::len_zero)]
        if h.len() == 0 {
            return LatencySnapshot::default();
        }

        LatencySnapshot {
            mean_ms: h.mean() / 1000.0,
            stdev_ms: h.stdev() / 1000.0,
            max_ms: h.max() / 1000,
            p50_ms: h.value_at_quantile(0.50) / 1000,
            p75_ms: h.value_at_quantile(0.75) / 1000,
            p90_ms: h.value_at_quantile(0.90) / 1000,
            p99_ms: h.value_at_quantile(0.99) / 1000,
        }
    }

    /// Drains the live window histogram, returning interval p50/p95 in ms.
    pub fn take_latency_window_ms(&self) -> (Option<f64>, Option<f64>) {
        let mut h = self
            .latency_us_window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        #[allow(clippy::len_zero)]
        let out = if h.len() == 0 {
            (None, None)
        } else {
            let p50 = h.value_at_quantile(0.50) as f64 / 1000.0;
            let p95 = h.value_at_quantile(0.95) as f64 / 1000.0;
            (Some(p50), Some(p95))
        };

        h.reset();
        out
    }

    pub fn errors_snapshot(&self) -> HashMap<String, u64> {
        let map = self
            .checks_by_name
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut out: HashMap<String, u64> = HashMap::new();
        for (name, counters) in map.iter() {
            let failed = counters.failed.load(Ordering::Relaxed);
            if failed == 0 {
                continue;
            }
            out.insert(name.to_string(), failed);
        }
        out
    }

    pub fn summarize(&self, elapsed: Duration) -> RunSummary {
        let duration_ms = elapsed.as_millis() as u64;
        let secs = elapsed.as_secs_f64().max(1e-9);

        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let checks_total = self.checks_total.load(Ordering::Relaxed);
        let checks_failed = self.checks_failed.load(Ordering::Relaxed);

        let checks_by_name = {
            let map = self
                .checks_by_name
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut out = Vec::with_capacity(map.len());
            for (name, counters) in map.iter() {
                out.push(CheckSummary {
                    name: name.to_string(),
                    total: counters.total.load(Ordering::Relaxed),
                    failed: counters.failed.load(Ordering::Relaxed),
                });
            }
            out.sort_by(|a, b| a.name.cmp(&b.name));
            out
        };

        let (p50_ms, p75_ms, p90_ms, p95_ms, p99_ms, mean_ms, stdev_ms, max_ms) = {
            let h = self
                .latency_us
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            #[allow(clippy::len_zero)]
            if h.len() == 0 {
                (None, None, None, None, None, None, None, None)
            } else {
                (
                    Some(h.value_at_quantile(0.50) as f64 / 1000.0),
                    Some(h.value_at_quantile(0.75) as f64 / 1000.0),
                    Some(h.value_at_quantile(0.90) as f64 / 1000.0),
                    Some(h.value_at_quantile(0.95) as f64 / 1000.0),
                    Some(h.value_at_quantile(0.99) as f64 / 1000.0),
                    Some(h.mean() / 1000.0),
                    Some(h.stdev() / 1000.0),
                    Some(h.max() / 1000),
                )
            }
        };

        let (req_per_sec_avg, req_per_sec_stdev, req_per_sec_max, req_per_sec_stdev_pct) = {
            let agg = self
                .rps_samples
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            agg.summary()
        };

        RunSummary {
            requests_total,
            failed_requests_total: self.failed_requests_total(),
            iterations_total: self.iterations_total(),
            checks_total,
            checks_failed,
            checks_by_name,
            run_duration_ms: duration_ms,
            rps: (requests_total as f64) / secs,
            req_per_sec_avg,
            req_per_sec_stdev,
            req_per_sec_max,
            req_per_sec_stdev_pct,
            latency_p50_ms: p50_ms,
            latency_p75_ms: p75_ms,
            latency_p90_ms: p90_ms,
            latency_p95_ms: p95_ms,
            latency_p99_ms: p99_ms,
            latency_mean_ms: mean_ms,
            latency_stdev_ms: stdev_ms,
            latency_max_ms: max_ms,

            metrics: self.metrics.summarize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtload_metrics::MetricValues;

    #[test]
    fn api_call_feeds_endpoint_counter_and_failure_rate() {
        let stats = RunStats::default();

        stats.record_api_call(
            ApiCallMeta {
                endpoint: Endpoint::MatchResults,
                status: Some(200),
                transport_error_kind: None,
                elapsed: Duration::from_millis(12),
                body_len: 42,
            },
            &[],
        );
        stats.record_api_call(
            ApiCallMeta {
                endpoint: Endpoint::MatchResults,
                status: Some(500),
                transport_error_kind: None,
                elapsed: Duration::from_millis(30),
                body_len: 0,
            },
            &[],
        );

        assert_eq!(stats.requests_total(), 2);
        assert_eq!(stats.failed_requests_total(), 1);

        let summary = stats.summarize(Duration::from_secs(1));
        let matches = summary
            .metrics
            .iter()
            .find(|m| m.name == "matches_sent" && m.tags.is_empty())
            .unwrap_or_else(|| panic!("missing matches_sent"));
        assert!(matches!(
            matches.values,
            MetricValues::Counter { value } if value == 2.0
        ));

        let failed = summary
            .metrics
            .iter()
            .find(|m| m.name == "http_req_failed" && m.tags.is_empty())
            .unwrap_or_else(|| panic!("missing http_req_failed"));
        assert!(matches!(
            failed.values,
            MetricValues::Rate { total: 2, trues: 1, .. }
        ));
    }

    #[test]
    fn transport_error_counts_as_failed_request_and_check() {
        let stats = RunStats::default();
        stats.record_api_call(
            ApiCallMeta {
                endpoint: Endpoint::NewGame,
                status: None,
                transport_error_kind: Some(HttpTransportErrorKind::Timeout),
                elapsed: Duration::from_millis(3000),
                body_len: 0,
            },
            &[],
        );

        assert_eq!(stats.failed_requests_total(), 1);
        let errors = stats.errors_snapshot();
        assert_eq!(errors.get("http_error:timeout"), Some(&1));
    }

    #[test]
    fn named_checks_aggregate() {
        let stats = RunStats::default();
        let h = stats.check_handle("status is 200");
        stats.record_check_handle(&h, true);
        stats.record_check_handle(&h, true);
        stats.record_check_handle(&h, false);

        let summary = stats.summarize(Duration::from_secs(1));
        assert_eq!(summary.checks_total, 3);
        assert_eq!(summary.checks_failed, 1);
        let by_name = &summary.checks_by_name;
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].total, 3);
        assert_eq!(by_name[0].failed, 1);
    }

    #[test]
    fn summary_reports_latency_percentiles() {
        let stats = RunStats::default();
        for ms in [10u64, 20, 30, 40, 50] {
            stats.record_latency(Duration::from_millis(ms));
        }

        let summary = stats.summarize(Duration::from_secs(2));
        assert!(summary.latency_p50_ms.is_some());
        assert!(summary.latency_max_ms.unwrap_or(0) >= 49);
    }
}
